//! One-shot schema bootstrap for the relational database.

use crate::registry::{DependencyKind, Flag};
use crate::workload::truststore::{run_script, stage_runner, RUNNER_DEST_PATH};
use crate::workload::{EnvironmentError, EvalContext, InitContext, InitializationError};
use crate::workload_event;
use std::collections::BTreeMap;
use std::time::Duration;

const WORKLOAD: &str = "datahub-postgresql-setup";
const INIT_COMMAND: &str = "/init.sh";
const EXEC_TIMEOUT: Duration = Duration::from_secs(600);

pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot
        .dependency_initialized(DependencyKind::Database)
        .is_attempted()
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_ready(ctx) {
        return Ok(None);
    }

    let Some(conn) = ctx.snapshot.database.as_ref() else {
        return Ok(None);
    };

    Ok(Some(BTreeMap::from([
        ("POSTGRES_USERNAME".to_string(), conn.username.clone()),
        ("POSTGRES_PASSWORD".to_string(), conn.password.clone()),
        ("POSTGRES_HOST".to_string(), conn.host.clone()),
        ("POSTGRES_PORT".to_string(), conn.port.to_string()),
        ("DATAHUB_DB_NAME".to_string(), conn.dbname.clone()),
    ])))
}

pub(super) async fn run_initialization(
    ctx: &mut InitContext<'_>,
) -> Result<bool, InitializationError> {
    if !is_ready(&ctx.eval()) {
        workload_event!(
            info,
            "initialization_skipped",
            workload = WORKLOAD,
            reason = "not ready"
        );
        return Ok(false);
    }

    if ctx
        .snapshot
        .dependency_initialized(DependencyKind::Database)
        .is_done()
    {
        workload_event!(
            debug,
            "initialization_skipped",
            workload = WORKLOAD,
            reason = "already initialized"
        );
        return Ok(false);
    }

    let environment =
        compile_environment(&ctx.eval())
            .map_err(|err| InitializationError::Failed {
                workload: WORKLOAD,
                reason: err.to_string(),
            })?
            .ok_or_else(|| InitializationError::BadLogic {
                workload: WORKLOAD,
                reason: "database bootstrap attempted before it is ready".to_string(),
            })?;

    workload_event!(info, "initialization_started", workload = WORKLOAD);
    stage_runner(ctx, WORKLOAD, 0o744).await?;
    run_script(
        ctx,
        WORKLOAD,
        vec![RUNNER_DEST_PATH.to_string(), INIT_COMMAND.to_string()],
        environment,
        None,
        EXEC_TIMEOUT,
    )
    .await?;

    if let Some(conn) = ctx.snapshot.database.as_mut() {
        conn.initialized = Flag::Done;
    }
    ctx.persist(WORKLOAD)?;
    workload_event!(info, "initialization_succeeded", workload = WORKLOAD);
    Ok(true)
}
