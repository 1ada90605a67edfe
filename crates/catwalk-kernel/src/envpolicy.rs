//! Per-stage environment policy — a pure function from the inherited
//! environment to the environment a stage execs with.
//!
//! The orchestrator snapshots its own environment once, resolves every
//! stage's policy against that snapshot before the first fork, and hands the
//! resolved map to `execve` as an explicit argument. Nothing reads or
//! mutates the process-global environment after construction, so resolution
//! is reproducible regardless of the order stages are spawned in.

use std::collections::{BTreeMap, BTreeSet};

/// Whether a policy starts from the inherited environment or from nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    /// Start from the inherited environment, then apply set/unset.
    Inherit,
    /// Start empty and apply only the set list. Used when a stage's
    /// contract demands an exact closed set of variables.
    Replace,
}

/// The environment one stage runs with. Constructed before any fork,
/// read-only thereafter.
#[derive(Debug, Clone)]
pub struct EnvPolicy {
    mode: EnvMode,
    set: Vec<(String, String)>,
    unset: Vec<String>,
    /// Declarative record of the exact variable set a `Replace` policy is
    /// meant to produce; checked by [`EnvPolicy::resolves_exactly`].
    exact_allow: Option<BTreeSet<String>>,
}

impl EnvPolicy {
    /// Policy that passes the inherited environment through.
    pub fn inherit() -> Self {
        Self {
            mode: EnvMode::Inherit,
            set: Vec::new(),
            unset: Vec::new(),
            exact_allow: None,
        }
    }

    /// Policy that starts from an empty environment.
    pub fn replace() -> Self {
        Self {
            mode: EnvMode::Replace,
            set: Vec::new(),
            unset: Vec::new(),
            exact_allow: None,
        }
    }

    /// Set (or overwrite) a variable.
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set.push((key.into(), value.into()));
        self
    }

    /// Remove a variable after the set list is applied.
    pub fn unset(mut self, key: impl Into<String>) -> Self {
        self.unset.push(key.into());
        self
    }

    /// Declare the exact set of variables this policy must resolve to.
    pub fn exact<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exact_allow = Some(keys.into_iter().map(Into::into).collect());
        self
    }

    pub fn mode(&self) -> EnvMode {
        self.mode
    }

    /// Resolve the final environment for a stage. Pure: depends only on
    /// `self` and `inherited`.
    pub fn resolve(&self, inherited: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        let mut env = match self.mode {
            EnvMode::Inherit => inherited.clone(),
            EnvMode::Replace => BTreeMap::new(),
        };
        for (key, value) in &self.set {
            env.insert(key.clone(), value.clone());
        }
        for key in &self.unset {
            env.remove(key);
        }
        env
    }

    /// True if `resolved` carries exactly the declared allow-list (always
    /// true when no allow-list was declared).
    pub fn resolves_exactly(&self, resolved: &BTreeMap<String, String>) -> bool {
        match &self.exact_allow {
            None => true,
            Some(allow) => {
                resolved.len() == allow.len() && resolved.keys().all(|k| allow.contains(k))
            }
        }
    }
}

/// The PATH a credentialed stage runs with: the home directory first, then
/// the usual system directories.
pub fn default_path(home: &str) -> String {
    format!("{home}:/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn inherited() -> BTreeMap<String, String> {
        [
            ("HOME", "/home/amy"),
            ("PATH", "/usr/bin:/bin"),
            ("CATWALK_STOWAWAY", "hidden"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
    }

    #[test]
    fn inherit_applies_set_then_unset() {
        let policy = EnvPolicy::inherit()
            .set("CATWALK_BADGE", "crew")
            .set("PATH", "/home/amy:/usr/bin")
            .unset("CATWALK_STOWAWAY");
        let env = policy.resolve(&inherited());

        assert_eq!(env.get("CATWALK_BADGE").map(String::as_str), Some("crew"));
        assert_eq!(
            env.get("PATH").map(String::as_str),
            Some("/home/amy:/usr/bin")
        );
        assert_eq!(env.get("HOME").map(String::as_str), Some("/home/amy"));
        assert!(!env.contains_key("CATWALK_STOWAWAY"));
    }

    #[test]
    fn replace_starts_empty() {
        let policy = EnvPolicy::replace()
            .set("HOME", "/home/amy")
            .set("PATH", "/home/amy:/bin")
            .set("CATWALK_BADGE", "crew")
            .exact(["HOME", "PATH", "CATWALK_BADGE"]);
        let env = policy.resolve(&inherited());

        assert_eq!(env.len(), 3);
        assert!(!env.contains_key("CATWALK_STOWAWAY"));
        assert!(policy.resolves_exactly(&env));
    }

    #[test]
    fn exact_allow_list_rejects_drift() {
        let policy = EnvPolicy::replace()
            .set("HOME", "/home/amy")
            .exact(["HOME", "PATH"]);
        let env = policy.resolve(&inherited());
        assert!(!policy.resolves_exactly(&env), "PATH was never set");
    }

    // Resolution is a pure function of the snapshot: resolving twice, or
    // resolving other policies in between, changes nothing.
    #[rstest]
    #[case(EnvPolicy::inherit().set("A", "1"))]
    #[case(EnvPolicy::replace().set("A", "1"))]
    #[case(EnvPolicy::inherit().unset("HOME"))]
    fn resolve_is_deterministic(#[case] policy: EnvPolicy) {
        let snapshot = inherited();
        let first = policy.resolve(&snapshot);
        let _ = EnvPolicy::inherit().set("B", "2").resolve(&snapshot);
        let second = policy.resolve(&snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn default_path_leads_with_home() {
        let path = default_path("/home/amy");
        assert!(path.starts_with("/home/amy:"));
        assert!(path.contains("/usr/bin"));
    }
}
