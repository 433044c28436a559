//! One-shot topic bootstrap for the message broker.

use crate::registry::{DependencyKind, Flag};
use crate::workload::environment::{extend_static, kafka_topic_names, sasl_jaas_config};
use crate::workload::truststore::{run_script, stage_runner, RUNNER_DEST_PATH};
use crate::workload::{EnvironmentError, EvalContext, InitContext, InitializationError};
use crate::workload_event;
use std::collections::BTreeMap;
use std::time::Duration;

const WORKLOAD: &str = "datahub-kafka-setup";
const SETUP_COMMAND: &str = "/opt/kafka/kafka-setup.sh";
const SETUP_WORKING_DIR: &str = "/opt/kafka";
const EXEC_TIMEOUT: Duration = Duration::from_secs(600);

pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot
        .dependency_initialized(DependencyKind::Kafka)
        .is_attempted()
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_ready(ctx) {
        return Ok(None);
    }

    let Some(conn) = ctx.snapshot.kafka.as_ref() else {
        return Ok(None);
    };

    let mut env = BTreeMap::from([
        (
            "KAFKA_BOOTSTRAP_SERVER".to_string(),
            conn.bootstrap_server.clone(),
        ),
        // Not read by the setup container, but required to be present.
        ("KAFKA_ZOOKEEPER_CONNECT".to_string(), String::new()),
        (
            "KAFKA_PROPERTIES_SASL_JAAS_CONFIG".to_string(),
            sasl_jaas_config(&conn.username, &conn.password),
        ),
    ]);
    extend_static(
        &mut env,
        &[
            ("MAX_MESSAGE_BYTES", "5242880"),
            ("USE_CONFLUENT_SCHEMA_REGISTRY", "false"),
            ("KAFKA_PROPERTIES_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            ("KAFKA_PROPERTIES_SASL_MECHANISM", "SCRAM-SHA-512"),
        ],
    );
    env.extend(kafka_topic_names(ctx.operator.kafka_topic_prefix.as_deref()));

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
        .dependency_initialized(DependencyKind::Kafka)
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
                reason: "topic bootstrap attempted before it is ready".to_string(),
            })?;

    workload_event!(info, "initialization_started", workload = WORKLOAD);
    stage_runner(ctx, WORKLOAD, 0o744).await?;
    run_script(
        ctx,
        WORKLOAD,
        vec![RUNNER_DEST_PATH.to_string(), SETUP_COMMAND.to_string()],
        environment,
        Some(SETUP_WORKING_DIR),
        EXEC_TIMEOUT,
    )
    .await?;

    if let Some(conn) = ctx.snapshot.kafka.as_mut() {
        conn.initialized = Flag::Done;
    }
    ctx.persist(WORKLOAD)?;
    workload_event!(info, "initialization_succeeded", workload = WORKLOAD);
    Ok(true)
}
