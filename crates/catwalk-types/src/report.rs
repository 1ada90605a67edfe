//! Pipeline results — per-stage exit statuses reduced to one verdict.

/// Exit status of one stage, recorded as its wait completes.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct StageReport {
    /// Stage index in the pipeline.
    pub stage: usize,
    /// OS process id the stage ran as.
    pub pid: i32,
    /// Exit code. Signal deaths are reported as 128 + signo.
    pub code: i32,
}

impl StageReport {
    /// True if the stage exited cleanly.
    pub fn ok(&self) -> bool {
        self.code == 0
    }
}

/// The aggregated outcome of a pipeline run, built incrementally as each
/// wait completes and finalized after all stages report.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct PipelineResult {
    /// One report per stage, in stage order.
    pub stages: Vec<StageReport>,
}

impl PipelineResult {
    /// Start an empty result; stages are recorded as their waits complete.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one stage's exit status.
    pub fn record(&mut self, report: StageReport) {
        self.stages.push(report);
        self.stages.sort_by_key(|r| r.stage);
    }

    /// True iff every stage exited 0.
    pub fn success(&self) -> bool {
        self.stages.iter().all(StageReport::ok)
    }

    /// The stages that failed, for diagnostics.
    pub fn failures(&self) -> impl Iterator<Item = &StageReport> {
        self.stages.iter().filter(|r| !r.ok())
    }

    /// The process exit code this result reduces to.
    pub fn exit_code(&self) -> i32 {
        if self.success() {
            0
        } else {
            1
        }
    }
}
