//! The orchestrator — pipe creation, the fork loop, stream rewiring, exec,
//! wait, and result aggregation.
//!
//! Order of operations:
//!
//! 1. Open both files and create all N−1 pipes up front (fail fast; RAII
//!    closes whatever was created on partial failure).
//! 2. Resolve every stage's environment and build its exec image *before*
//!    the first fork — a child only duplicates descriptors, sweeps the
//!    table, and execs.
//! 3. Fork each stage. The child rewires stdin/stdout, closes every other
//!    tracked descriptor, and execs the worker; an exec failure makes the
//!    child report and exit 127, it never continues as a second parent.
//! 4. The parent drops its copies of all descriptors (it never touches
//!    pipeline data), then blocking-waits on each recorded pid.
//!
//! A setup failure before the pipeline exists is fatal: already-forked
//! children are reaped and the error is returned. One child failing to exec
//! is not: the other stages run, everything is waited, and the aggregate
//! result names the failing stage.

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::ffi::CString;
use std::fs::{File, OpenOptions};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use catwalk_types::{
    ContractLevel, PipelineResult, SetupError, StageReport, StageSpec, BADGE_VALUE, BADGE_VAR,
    HOME_VAR, PATH_VAR, SEALED_ALLOW_LIST, STOWAWAY_VAR,
};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::{dup2, execve, fork, ForkResult, Pid};

use crate::envpolicy::{default_path, EnvPolicy};
use crate::pipe::{create_pipes, FdTable};
use crate::worker::passwd_home;

/// Exit code a child reports when it cannot exec the worker.
pub const EXEC_FAILURE_CODE: i32 = 127;

/// A forked stage awaiting its wait. Created at fork time, consumed when
/// the exit status is collected.
#[derive(Debug)]
struct ProcessHandle {
    pid: Pid,
    stage: usize,
}

/// Everything a child needs at exec time, prepared before any fork.
struct ExecImage {
    prog: CString,
    argv: Vec<CString>,
    envp: Vec<CString>,
}

/// An immutable pipeline plan: which worker binary to run and, per stage,
/// the contract level and environment policy.
pub struct Pipeline {
    worker: PathBuf,
    stages: Vec<(ContractLevel, EnvPolicy)>,
}

impl Pipeline {
    pub fn new(worker: impl Into<PathBuf>, stages: Vec<(ContractLevel, EnvPolicy)>) -> Self {
        Self {
            worker: worker.into(),
            stages,
        }
    }

    /// The canonical three-stage pipeline: a credentialed stage, a
    /// handshake stage, a sealed stage. Policies follow the contract: the
    /// first stage gets the badge and a home-led PATH, the second sheds the
    /// stowaway variable, the last runs with exactly the sealed set.
    pub fn canonical(worker: impl Into<PathBuf>) -> Self {
        let home = passwd_home()
            .or_else(|| std::env::var("HOME").ok())
            .unwrap_or_else(|| "/".into());
        let path = default_path(&home);

        let stages = vec![
            (
                ContractLevel::Badged,
                EnvPolicy::inherit()
                    .set(BADGE_VAR, BADGE_VALUE)
                    .set(PATH_VAR, path.clone())
                    .set(HOME_VAR, home.clone()),
            ),
            (
                ContractLevel::Handshake,
                EnvPolicy::inherit().unset(STOWAWAY_VAR),
            ),
            (
                ContractLevel::Sealed,
                EnvPolicy::replace()
                    .set(PATH_VAR, path)
                    .set(HOME_VAR, home)
                    .set(BADGE_VAR, BADGE_VALUE)
                    .exact(SEALED_ALLOW_LIST),
            ),
        ];
        Self::new(worker, stages)
    }

    /// Number of stages in the plan.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run the pipeline: input file in, output file out. Blocks until every
    /// stage has been waited for.
    #[tracing::instrument(level = "debug", skip_all, fields(stages = self.stages.len()))]
    pub fn run(&self, input: &Path, output: &Path) -> Result<PipelineResult, SetupError> {
        if self.stages.is_empty() {
            return Err(SetupError::NoStages);
        }

        let levels: Vec<ContractLevel> = self.stages.iter().map(|(l, _)| *l).collect();
        let specs = StageSpec::plan(&levels, input, output);

        let input_fd: OwnedFd = File::open(input)
            .map_err(|source| SetupError::InputFile {
                path: input.to_path_buf(),
                source,
            })?
            .into();
        let output_fd: OwnedFd = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(output)
            .map_err(|source| SetupError::OutputFile {
                path: output.to_path_buf(),
                source,
            })?
            .into();

        let table = FdTable::new(create_pipes(self.stages.len() - 1)?, input_fd, output_fd);
        tracing::debug!(pipes = table.pipe_count(), "pipeline descriptors ready");

        // Resolve all environments and build all exec images before the
        // first fork: a child touches no allocator, only dup2/close/exec.
        let snapshot: BTreeMap<String, String> = std::env::vars().collect();
        let images = self
            .stages
            .iter()
            .map(|(level, policy)| self.exec_image(*level, policy, &snapshot))
            .collect::<Result<Vec<_>, _>>()?;

        let mut handles: Vec<ProcessHandle> = Vec::with_capacity(self.stages.len());
        for (spec, image) in specs.iter().zip(&images) {
            match unsafe { fork() } {
                Ok(ForkResult::Parent { child }) => {
                    tracing::debug!(stage = spec.index, pid = child.as_raw(), "forked stage");
                    handles.push(ProcessHandle {
                        pid: child,
                        stage: spec.index,
                    });
                }
                Ok(ForkResult::Child) => child_exec(&table, spec, image),
                Err(errno) => {
                    let err = SetupError::Fork {
                        stage: spec.index,
                        source: errno.into(),
                    };
                    // close our pipe ends first so already-forked children
                    // see EOF/EPIPE and can die, then reap them
                    drop(table);
                    reap(&handles);
                    return Err(err);
                }
            }
        }

        // The parent never reads or writes pipeline data; holding any write
        // end here would keep downstream readers from ever seeing EOF.
        drop(table);
        tracing::debug!("parent closed all pipe descriptors");

        let mut result = PipelineResult::new();
        for handle in handles {
            let status = waitpid(handle.pid, None).map_err(|errno| SetupError::Wait {
                stage: handle.stage,
                source: errno.into(),
            })?;
            let code = exit_code_of(&status);
            tracing::debug!(stage = handle.stage, pid = handle.pid.as_raw(), code, "stage exited");
            result.record(StageReport {
                stage: handle.stage,
                pid: handle.pid.as_raw(),
                code,
            });
        }
        Ok(result)
    }

    fn exec_image(
        &self,
        level: ContractLevel,
        policy: &EnvPolicy,
        snapshot: &BTreeMap<String, String>,
    ) -> Result<ExecImage, SetupError> {
        let prog = cstring(self.worker.as_os_str().as_bytes(), "worker path")?;
        let argv = vec![prog.clone(), cstring(format!("-{level}").as_bytes(), "level flag")?];
        let resolved = policy.resolve(snapshot);
        let envp = resolved
            .iter()
            .map(|(k, v)| cstring(format!("{k}={v}").as_bytes(), k))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(ExecImage { prog, argv, envp })
    }
}

fn cstring(bytes: &[u8], what: &str) -> Result<CString, SetupError> {
    CString::new(bytes).map_err(|_| SetupError::BadEncoding { what: what.into() })
}

/// Child-side: rewire, sweep, exec. Never returns; on any failure the child
/// reports and exits with [`EXEC_FAILURE_CODE`] instead of unwinding back
/// into the parent's logic.
fn child_exec(table: &FdTable, spec: &StageSpec, image: &ExecImage) -> ! {
    if let Err(err) = wire_and_exec(table, spec, image) {
        eprintln!("catwalk: stage {}: {}", spec.index, err);
    }
    std::process::exit(EXEC_FAILURE_CODE);
}

fn wire_and_exec(
    table: &FdTable,
    spec: &StageSpec,
    image: &ExecImage,
) -> Result<Infallible, SetupError> {
    dup2(table.stdin_fd(&spec.input), 0).map_err(|e| SetupError::Wire(e.into()))?;
    dup2(table.stdout_fd(&spec.output), 1).map_err(|e| SetupError::Wire(e.into()))?;
    // the dup2'd copies at 0/1 are ours; every tracked original goes
    table.close_unused(&[]);
    execve(&image.prog, &image.argv, &image.envp).map_err(|e| SetupError::Exec {
        worker: PathBuf::from(
            std::str::from_utf8(image.prog.as_bytes()).unwrap_or("<worker>"),
        ),
        source: e.into(),
    })
}

fn reap(handles: &[ProcessHandle]) {
    for handle in handles {
        let _ = waitpid(handle.pid, None);
    }
}

/// Reduce a wait status to an exit code, reporting signal deaths the way
/// shells do.
fn exit_code_of(status: &WaitStatus) -> i32 {
    match status {
        WaitStatus::Exited(_, code) => *code,
        WaitStatus::Signaled(_, signal, _) => 128 + *signal as i32,
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_pipeline_has_three_stages() {
        let pipeline = Pipeline::canonical("/usr/local/bin/stagehand");
        assert_eq!(pipeline.len(), 3);
        let levels: Vec<_> = pipeline.stages.iter().map(|(l, _)| *l).collect();
        assert_eq!(
            levels,
            vec![
                ContractLevel::Badged,
                ContractLevel::Handshake,
                ContractLevel::Sealed
            ]
        );
    }

    #[test]
    fn canonical_sealed_policy_resolves_to_exactly_three_vars() {
        let pipeline = Pipeline::canonical("stagehand");
        let snapshot: BTreeMap<String, String> =
            [("TERM".to_string(), "xterm".to_string())].into();
        let (_, policy) = &pipeline.stages[2];
        let resolved = policy.resolve(&snapshot);
        assert_eq!(resolved.len(), 3);
        assert!(policy.resolves_exactly(&resolved));
        assert!(!resolved.contains_key("TERM"));
    }

    #[test]
    fn empty_pipeline_is_a_setup_error() {
        let pipeline = Pipeline::new("stagehand", vec![]);
        let err = pipeline
            .run(Path::new("/dev/null"), Path::new("/dev/null"))
            .unwrap_err();
        assert!(matches!(err, SetupError::NoStages));
    }

    #[test]
    fn missing_input_file_is_fatal_before_any_fork() {
        let pipeline = Pipeline::new(
            "stagehand",
            vec![(ContractLevel::Open, EnvPolicy::inherit())],
        );
        let err = pipeline
            .run(
                Path::new("/nonexistent/input"),
                Path::new("/nonexistent/output"),
            )
            .unwrap_err();
        assert!(matches!(err, SetupError::InputFile { .. }));
    }

    #[test]
    fn signal_deaths_report_as_128_plus_signo() {
        let status = WaitStatus::Signaled(Pid::from_raw(1), nix::sys::signal::Signal::SIGKILL, false);
        assert_eq!(exit_code_of(&status), 137);
    }
}
