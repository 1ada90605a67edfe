//! Individual contract checks — descriptor probing and environment
//! credential rules.
//!
//! Everything here is a pure function of its arguments except
//! [`open_descriptors_above_stderr`], which probes the calling process's own
//! descriptor table, and [`passwd_home`], which reads the passwd database.

use std::collections::BTreeMap;
use std::os::fd::RawFd;

use catwalk_types::{
    ContractViolation, BADGE_VALUE, BADGE_VAR, HOME_VAR, PATH_VAR, SEALED_ALLOW_LIST, STOWAWAY_VAR,
};
use nix::fcntl::{fcntl, FcntlArg};

/// Highest descriptor number the leak probe inspects.
pub const DEFAULT_FD_PROBE_BOUND: RawFd = 64;

/// Scan descriptor numbers above stderr up to `bound` and report the ones
/// that are open. The probe is `fcntl(F_GETFD)` — it observes validity
/// without reading, writing, or changing any flag.
pub fn open_descriptors_above_stderr(bound: RawFd) -> Vec<RawFd> {
    (3..=bound)
        .filter(|&fd| fcntl(fd, FcntlArg::F_GETFD).is_ok())
        .collect()
}

/// Home directory from the passwd entry for the effective uid.
pub fn passwd_home() -> Option<String> {
    nix::unistd::User::from_uid(nix::unistd::geteuid())
        .ok()
        .flatten()
        .map(|user| user.dir.to_string_lossy().into_owned())
}

/// The badge variable must be present and carry the expected value.
pub fn badge(env: &BTreeMap<String, String>) -> Result<(), ContractViolation> {
    match env.get(BADGE_VAR) {
        None => Err(ContractViolation::BadgeMissing {
            var: BADGE_VAR.into(),
        }),
        Some(value) if value != BADGE_VALUE => Err(ContractViolation::BadgeWrong {
            var: BADGE_VAR.into(),
            found: value.clone(),
            expected: BADGE_VALUE.into(),
        }),
        Some(_) => Ok(()),
    }
}

/// PATH must match the reference exactly when one was pre-supplied, and
/// otherwise contain the home directory. With no home expectation derivable
/// either, only presence is checked.
pub fn path(
    env: &BTreeMap<String, String>,
    reference: Option<&str>,
    home: Option<&str>,
) -> Result<(), ContractViolation> {
    let found = env.get(PATH_VAR).ok_or_else(|| ContractViolation::PathMissing {
        var: PATH_VAR.into(),
    })?;
    match (reference, home) {
        (Some(expected), _) if found != expected => Err(ContractViolation::PathWrong {
            var: PATH_VAR.into(),
            found: found.clone(),
            expected: expected.into(),
        }),
        (Some(_), _) => Ok(()),
        (None, Some(home)) if !found.contains(home) => Err(ContractViolation::PathLacksHome {
            var: PATH_VAR.into(),
            found: found.clone(),
            home: home.into(),
        }),
        (None, _) => Ok(()),
    }
}

/// HOME must match the reference when one was pre-supplied, and otherwise
/// the expectation derived from the running user's identity. With neither
/// available only presence is checked.
pub fn home(
    env: &BTreeMap<String, String>,
    expected: Option<&str>,
) -> Result<(), ContractViolation> {
    let found = env.get(HOME_VAR).ok_or_else(|| ContractViolation::HomeMissing {
        var: HOME_VAR.into(),
    })?;
    match expected {
        Some(want) if found != want => Err(ContractViolation::HomeWrong {
            var: HOME_VAR.into(),
            found: found.clone(),
            expected: want.into(),
        }),
        _ => Ok(()),
    }
}

/// The stowaway variable must be absent.
pub fn no_stowaway(env: &BTreeMap<String, String>) -> Result<(), ContractViolation> {
    if env.contains_key(STOWAWAY_VAR) {
        Err(ContractViolation::Stowaway {
            var: STOWAWAY_VAR.into(),
        })
    } else {
        Ok(())
    }
}

/// The environment must contain exactly the sealed allow-list — no more,
/// no fewer.
pub fn sealed_env(env: &BTreeMap<String, String>) -> Result<(), ContractViolation> {
    let extra: Vec<String> = env
        .keys()
        .filter(|k| !SEALED_ALLOW_LIST.contains(&k.as_str()))
        .cloned()
        .collect();
    let missing: Vec<String> = SEALED_ALLOW_LIST
        .iter()
        .filter(|k| !env.contains_key(**k))
        .map(|k| k.to_string())
        .collect();
    if extra.is_empty() && missing.is_empty() {
        Ok(())
    } else {
        Err(ContractViolation::NotSealed { extra, missing })
    }
}
