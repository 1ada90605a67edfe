//! The worker contract's fixed vocabulary — variable names, the checkpoint
//! line format, and the names of the individual checks.
//!
//! Both sides of the protocol depend on these: the orchestrator's
//! environment policies set them up, the worker verifies them.

use crate::stage::ContractLevel;

/// Marker variable a credentialed stage must carry.
pub const BADGE_VAR: &str = "CATWALK_BADGE";

/// The only accepted badge value.
pub const BADGE_VALUE: &str = "crew";

/// Variable that must be absent at the handshake and sealed levels.
pub const STOWAWAY_VAR: &str = "CATWALK_STOWAWAY";

/// Path variable checked at the credentialed levels.
pub const PATH_VAR: &str = "PATH";

/// Home variable checked at the credentialed levels.
pub const HOME_VAR: &str = "HOME";

/// Optional reference value for the path check. When present in the worker's
/// environment, `PATH` must match it exactly; otherwise `PATH` merely has to
/// contain the home directory.
pub const EXPECT_PATH_VAR: &str = "CATWALK_EXPECT_PATH";

/// Optional reference value for the home check. When present, `HOME` must
/// match it exactly; otherwise `HOME` is compared against the passwd entry
/// for the worker's effective uid.
pub const EXPECT_HOME_VAR: &str = "CATWALK_EXPECT_HOME";

/// The closed set of variables a sealed (level 4) worker accepts.
pub const SEALED_ALLOW_LIST: [&str; 3] = [PATH_VAR, HOME_VAR, BADGE_VAR];

const CHECKPOINT_PREFIX: &str = "::catwalk checkpoint -";
const CHECKPOINT_SUFFIX: &str = "::";

/// The checkpoint line a stage emits to prove data passed through it, without
/// the trailing newline. A downstream stage reads and strips it.
pub fn checkpoint_line(level: ContractLevel) -> String {
    format!("{}{}{}", CHECKPOINT_PREFIX, level.digit(), CHECKPOINT_SUFFIX)
}

/// Parse a checkpoint line back to the level that emitted it. Returns `None`
/// for anything that is not checkpoint-shaped.
pub fn parse_checkpoint(line: &str) -> Option<ContractLevel> {
    let body = line
        .strip_prefix(CHECKPOINT_PREFIX)?
        .strip_suffix(CHECKPOINT_SUFFIX)?;
    let digit: u8 = body.parse().ok()?;
    ContractLevel::from_digit(digit)
}

/// One verifiable rule of the worker contract. Used to name the zero-length
/// marker files an external harness observes, one per passed check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Check {
    /// No descriptor above stderr is open at exec time.
    Descriptors,
    /// The badge variable is present with the expected value.
    Badge,
    /// The path variable passes the reference or home-fragment rule.
    Path,
    /// The home variable passes the reference or passwd rule.
    Home,
    /// The stowaway variable is absent.
    NoStowaway,
    /// The environment is exactly the sealed allow-list.
    SealedEnv,
    /// The upstream checkpoint line arrived first and was stripped.
    Handshake,
}

impl Check {
    /// Stable name used in marker-file names and diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Check::Descriptors => "descriptors",
            Check::Badge => "badge",
            Check::Path => "path",
            Check::Home => "home",
            Check::NoStowaway => "no-stowaway",
            Check::SealedEnv => "sealed-env",
            Check::Handshake => "handshake",
        }
    }
}

impl std::fmt::Display for Check {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_round_trips() {
        for level in ContractLevel::ALL {
            let line = checkpoint_line(level);
            assert_eq!(parse_checkpoint(&line), Some(level));
        }
    }

    #[test]
    fn ordinary_text_is_not_a_checkpoint() {
        assert_eq!(parse_checkpoint("hello"), None);
        assert_eq!(parse_checkpoint(""), None);
        assert_eq!(parse_checkpoint("::catwalk checkpoint -9::"), None);
        assert_eq!(parse_checkpoint("::catwalk checkpoint -2"), None);
    }
}
