//! One-shot index bootstrap for the search backend.

use crate::registry::{DependencyKind, Flag};
use crate::workload::environment::extend_static;
use crate::workload::truststore::{
    run_script, stage_runner, OPENSEARCH_CERTIFICATES_PATH, RUNNER_DEST_PATH,
};
use crate::workload::{EnvironmentError, EvalContext, InitContext, InitializationError};
use crate::workload_event;
use std::collections::BTreeMap;
use std::time::Duration;

const WORKLOAD: &str = "datahub-opensearch-setup";
const CREATE_INDICES_COMMAND: &str = "/create-indices.sh";
const EXEC_TIMEOUT: Duration = Duration::from_secs(600);

pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot
        .dependency_initialized(DependencyKind::Opensearch)
        .is_attempted()
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_ready(ctx) {
        return Ok(None);
    }

    let Some(conn) = ctx.snapshot.opensearch.as_ref() else {
        return Ok(None);
    };

    let mut env = BTreeMap::from([
        ("ELASTICSEARCH_HOST".to_string(), conn.host.clone()),
        ("ELASTICSEARCH_PORT".to_string(), conn.port.to_string()),
        ("ELASTICSEARCH_USERNAME".to_string(), conn.username.clone()),
        ("ELASTICSEARCH_PASSWORD".to_string(), conn.password.clone()),
        (
            "INDEX_PREFIX".to_string(),
            ctx.operator
                .opensearch_index_prefix
                .clone()
                .unwrap_or_default(),
        ),
    ]);
    extend_static(
        &mut env,
        &[
            ("SKIP_ELASTICSEARCH_CHECK", "false"),
            ("ELASTICSEARCH_INSECURE", "false"),
            ("ELASTICSEARCH_USE_SSL", "true"),
            ("DATAHUB_ANALYTICS_ENABLED", "true"),
            ("USE_AWS_ELASTICSEARCH", "true"),
        ],
    );

    Ok(Some(env))
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
        .dependency_initialized(DependencyKind::Opensearch)
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

    let mut environment =
        compile_environment(&ctx.eval())
            .map_err(|err| InitializationError::Failed {
                workload: WORKLOAD,
                reason: err.to_string(),
            })?
            .ok_or_else(|| InitializationError::BadLogic {
                workload: WORKLOAD,
                reason: "index bootstrap attempted before it is ready".to_string(),
            })?;

    let certificates = ctx
        .snapshot
        .opensearch
        .as_ref()
        .map(|conn| conn.tls_ca.clone())
        .ok_or_else(|| InitializationError::BadLogic {
            workload: WORKLOAD,
            reason: "index bootstrap attempted without a search descriptor".to_string(),
        })?;

    // The bootstrap script talks to the cluster over TLS; point curl at the
    // staged certificate bundle.
    environment.insert(
        "CURL_CA_BUNDLE".to_string(),
        OPENSEARCH_CERTIFICATES_PATH.to_string(),
    );

    workload_event!(info, "initialization_started", workload = WORKLOAD);
    stage_runner(ctx, WORKLOAD, 0o755).await?;
    ctx.staging
        .stage(
            WORKLOAD,
            &certificates,
            OPENSEARCH_CERTIFICATES_PATH,
            0o644,
        )
        .await
        .map_err(|err| InitializationError::Failed {
            workload: WORKLOAD,
            reason: err.to_string(),
        })?;
    run_script(
        ctx,
        WORKLOAD,
        vec![
            RUNNER_DEST_PATH.to_string(),
            CREATE_INDICES_COMMAND.to_string(),
        ],
        environment,
        None,
        EXEC_TIMEOUT,
    )
    .await?;

    if let Some(conn) = ctx.snapshot.opensearch.as_mut() {
        conn.initialized = Flag::Done;
    }
    ctx.persist(WORKLOAD)?;
    workload_event!(info, "initialization_succeeded", workload = WORKLOAD);
    Ok(true)
}
