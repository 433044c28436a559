pub mod actions;
pub mod environment;
pub mod frontend;
pub mod gms;
pub mod kafka_setup;
pub mod opensearch_setup;
pub mod postgres_setup;
pub mod truststore;
pub mod upgrade;

use crate::config::{OperatorConfig, ProxyConfig};
use crate::registry::store::{StateStore, StateStoreError};
use crate::registry::StateSnapshot;
use crate::secrets::{SecretContentError, SecretStore};
use crate::supervisor::{FileStaging, Supervisor};
use std::collections::BTreeMap;
use thiserror::Error;

/// Closed set of supervised workloads.
///
/// `WORKLOAD_ORDER` is the one total order used everywhere: initialization
/// priority, plan construction and drift auditing. Setup jobs come first,
/// then the migration, then the long-running services in dependency order.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub enum WorkloadKind {
    PostgresqlSetup,
    KafkaSetup,
    OpensearchSetup,
    Upgrade,
    Gms,
    Frontend,
    Actions,
}

pub const WORKLOAD_ORDER: [WorkloadKind; 7] = [
    WorkloadKind::PostgresqlSetup,
    WorkloadKind::KafkaSetup,
    WorkloadKind::OpensearchSetup,
    WorkloadKind::Upgrade,
    WorkloadKind::Gms,
    WorkloadKind::Frontend,
    WorkloadKind::Actions,
];

/// Health check exposed by a long-running workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthcheckSpec {
    pub endpoint: &'static str,
    pub port: u16,
}

/// Static definition of a workload, immutable across the process lifetime.
#[derive(Clone, Copy, Debug)]
pub struct WorkloadSpec {
    pub name: &'static str,
    pub command: &'static str,
    pub healthcheck: Option<HealthcheckSpec>,
}

/// Idle command for jobs that only run actions on a trigger basis.
const IDLE_COMMAND: &str = "/usr/bin/tail -f /dev/null";

const POSTGRESQL_SETUP_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-postgresql-setup",
    command: IDLE_COMMAND,
    healthcheck: None,
};

const KAFKA_SETUP_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-kafka-setup",
    command: IDLE_COMMAND,
    healthcheck: None,
};

const OPENSEARCH_SETUP_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-opensearch-setup",
    command: IDLE_COMMAND,
    healthcheck: None,
};

const UPGRADE_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-upgrade",
    command: IDLE_COMMAND,
    healthcheck: None,
};

const GMS_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-gms",
    command: "/bin/sh -c /datahub/datahub-gms/scripts/start.sh",
    healthcheck: Some(HealthcheckSpec {
        endpoint: "/health",
        port: 8080,
    }),
};

const FRONTEND_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-frontend",
    command: "/bin/sh -c /start.sh",
    healthcheck: Some(HealthcheckSpec {
        endpoint: "/admin",
        port: 9002,
    }),
};

const ACTIONS_SPEC: WorkloadSpec = WorkloadSpec {
    name: "datahub-actions",
    command: "/bin/sh -c /start_datahub_actions.sh",
    healthcheck: None,
};

impl WorkloadKind {
    pub fn spec(self) -> &'static WorkloadSpec {
        match self {
            WorkloadKind::PostgresqlSetup => &POSTGRESQL_SETUP_SPEC,
            WorkloadKind::KafkaSetup => &KAFKA_SETUP_SPEC,
            WorkloadKind::OpensearchSetup => &OPENSEARCH_SETUP_SPEC,
            WorkloadKind::Upgrade => &UPGRADE_SPEC,
            WorkloadKind::Gms => &GMS_SPEC,
            WorkloadKind::Frontend => &FRONTEND_SPEC,
            WorkloadKind::Actions => &ACTIONS_SPEC,
        }
    }

    pub fn name(self) -> &'static str {
        self.spec().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        WORKLOAD_ORDER
            .into_iter()
            .find(|kind| kind.name() == name)
    }

    /// Whether the workload may be initialized. Pure and total: absent
    /// inputs evaluate to `false`, never to an error.
    pub fn is_ready(self, ctx: &EvalContext<'_>) -> bool {
        match self {
            WorkloadKind::PostgresqlSetup => postgres_setup::is_ready(ctx),
            WorkloadKind::KafkaSetup => kafka_setup::is_ready(ctx),
            WorkloadKind::OpensearchSetup => opensearch_setup::is_ready(ctx),
            WorkloadKind::Upgrade => upgrade::is_ready(ctx),
            WorkloadKind::Gms => gms::is_ready(ctx),
            WorkloadKind::Frontend => frontend::is_ready(ctx),
            WorkloadKind::Actions => actions::is_ready(ctx),
        }
    }

    /// Whether the workload may run: readiness plus the workload's own
    /// completion flags (trust material staged where applicable).
    pub fn is_enabled(self, ctx: &EvalContext<'_>) -> bool {
        match self {
            WorkloadKind::PostgresqlSetup => postgres_setup::is_ready(ctx),
            WorkloadKind::KafkaSetup => kafka_setup::is_ready(ctx),
            WorkloadKind::OpensearchSetup => opensearch_setup::is_ready(ctx),
            WorkloadKind::Upgrade => upgrade::is_ready(ctx),
            WorkloadKind::Gms => gms::is_enabled(ctx),
            WorkloadKind::Frontend => frontend::is_enabled(ctx),
            WorkloadKind::Actions => actions::is_ready(ctx),
        }
    }

    /// Compiles the workload's full environment. Returns `Ok(None)` iff the
    /// workload is not enabled; callers must not treat `None` as an error.
    /// Never returns a partially-built environment.
    pub fn compile_environment(
        self,
        ctx: &EvalContext<'_>,
    ) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
        match self {
            WorkloadKind::PostgresqlSetup => postgres_setup::compile_environment(ctx),
            WorkloadKind::KafkaSetup => kafka_setup::compile_environment(ctx),
            WorkloadKind::OpensearchSetup => opensearch_setup::compile_environment(ctx),
            WorkloadKind::Upgrade => upgrade::compile_environment(ctx),
            WorkloadKind::Gms => gms::compile_environment(ctx),
            WorkloadKind::Frontend => frontend::compile_environment(ctx),
            WorkloadKind::Actions => actions::compile_environment(ctx),
        }
    }

    /// Runs the workload's one-time setup action if it is ready and the
    /// durable completion flag is not yet set. Returns whether the
    /// side-effecting action ran and succeeded; failures leave every flag
    /// untouched so the next pass retries from scratch.
    pub async fn run_initialization(
        self,
        ctx: &mut InitContext<'_>,
    ) -> Result<bool, InitializationError> {
        match self {
            WorkloadKind::PostgresqlSetup => postgres_setup::run_initialization(ctx).await,
            WorkloadKind::KafkaSetup => kafka_setup::run_initialization(ctx).await,
            WorkloadKind::OpensearchSetup => opensearch_setup::run_initialization(ctx).await,
            WorkloadKind::Upgrade => upgrade::run_initialization(ctx).await,
            WorkloadKind::Gms => gms::run_initialization(ctx).await,
            WorkloadKind::Frontend => frontend::run_initialization(ctx).await,
            WorkloadKind::Actions => actions::run_initialization(ctx).await,
        }
    }
}

/// Inputs for the pure predicates and the environment compiler.
#[derive(Clone, Copy)]
pub struct EvalContext<'a> {
    pub snapshot: &'a StateSnapshot,
    pub operator: &'a OperatorConfig,
    pub proxy: &'a ProxyConfig,
    pub secrets: &'a dyn SecretStore,
}

/// Inputs for the initialization runner. Flag writes go through the
/// snapshot and must be persisted whole via `persist` before the write is
/// considered durable.
pub struct InitContext<'a> {
    pub snapshot: &'a mut StateSnapshot,
    pub operator: &'a OperatorConfig,
    pub proxy: &'a ProxyConfig,
    pub secrets: &'a dyn SecretStore,
    pub supervisor: &'a dyn Supervisor,
    pub staging: &'a dyn FileStaging,
    pub store: &'a dyn StateStore,
}

impl<'a> InitContext<'a> {
    pub fn eval(&self) -> EvalContext<'_> {
        EvalContext {
            snapshot: self.snapshot,
            operator: self.operator,
            proxy: self.proxy,
            secrets: self.secrets,
        }
    }

    pub fn persist(&mut self, workload: &'static str) -> Result<(), InitializationError> {
        self.store
            .replace(self.snapshot)
            .map_err(|source| InitializationError::Persist { workload, source })
    }
}

#[derive(Debug, Error)]
pub enum EnvironmentError {
    #[error(transparent)]
    Secret(#[from] SecretContentError),
    #[error("required configuration `{0}` is not set")]
    MissingConfig(&'static str),
    #[error("proxy URL `{value}` is invalid: {source}")]
    InvalidProxy {
        value: String,
        source: url::ParseError,
    },
}

#[derive(Debug, Error)]
pub enum InitializationError {
    #[error("failed to initialize {workload}: {reason}")]
    Failed {
        workload: &'static str,
        reason: String,
    },
    #[error("{workload} initialization reached an impossible state: {reason}")]
    BadLogic {
        workload: &'static str,
        reason: String,
    },
    #[error("failed to persist state after initializing {workload}: {source}")]
    Persist {
        workload: &'static str,
        source: StateStoreError,
    },
}
