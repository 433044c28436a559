pub mod http;

use crate::reconcile::plan::WorkloadPlan;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

pub use self::http::HttpSupervisor;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor unreachable for `{workload}`: {reason}")]
    Unreachable { workload: String, reason: String },
    #[error("command in `{workload}` timed out after {timeout:?}")]
    Timeout { workload: String, timeout: Duration },
    #[error("supervisor rejected request for `{workload}`: {status} {detail}")]
    Rejected {
        workload: String,
        status: u16,
        detail: String,
    },
    #[error("supervisor protocol error: {0}")]
    Protocol(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HealthStatus {
    Up,
    Down,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            HealthStatus::Up => "UP",
            HealthStatus::Down => "DOWN",
        }
    }
}

impl Display for HealthStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a synchronous command execution inside a workload.
#[derive(Clone, Debug)]
pub struct ExecOutput {
    pub exit_code: i32,
    pub stdout: String,
}

impl ExecOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Options for a bounded synchronous command execution.
#[derive(Clone, Debug, Default)]
pub struct ExecRequest {
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub timeout: Option<Duration>,
}

/// The container supervisor the engine drives. The engine only ever issues
/// "set desired plan" and "read actual plan / health" calls plus bounded
/// command execution; process lifecycle belongs to the supervisor.
#[async_trait]
pub trait Supervisor: Send + Sync {
    async fn can_connect(&self, workload: &str) -> bool;

    /// Submits the desired plan as a combine operation and triggers a
    /// replan so running processes converge on it.
    async fn submit_plan(&self, workload: &str, plan: &WorkloadPlan)
        -> Result<(), SupervisorError>;

    /// The plan currently applied at the supervisor, if any.
    async fn actual_plan(&self, workload: &str) -> Result<Option<WorkloadPlan>, SupervisorError>;

    async fn health(&self, workload: &str) -> Result<HealthStatus, SupervisorError>;

    async fn exec(&self, workload: &str, request: ExecRequest)
        -> Result<ExecOutput, SupervisorError>;
}

/// Staging of support files (scripts, trust material) into a workload's
/// execution context.
#[async_trait]
pub trait FileStaging: Send + Sync {
    async fn stage(
        &self,
        workload: &str,
        contents: &str,
        dest_path: &str,
        permissions: u32,
    ) -> Result<(), SupervisorError>;
}

pub type DynSupervisor = Arc<dyn Supervisor>;
pub type DynFileStaging = Arc<dyn FileStaging>;
