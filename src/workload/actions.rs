//! The event actions worker. No one-time setup of its own; it rides on the
//! metadata service being enabled.

use crate::registry::DependencyKind;
use crate::workload::environment::{extend_static, kafka_topic_names};
use crate::workload::{gms, EnvironmentError, EvalContext, InitContext, InitializationError};
use std::collections::BTreeMap;

pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot.flags.ran_upgrade.is_done()
        && ctx
            .snapshot
            .dependency_initialized(DependencyKind::Kafka)
            .is_done()
        && gms::is_enabled(ctx)
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_ready(ctx) {
        return Ok(None);
    }

    let Some(kafka) = ctx.snapshot.kafka.as_ref() else {
        return Ok(None);
    };

    let mut env = BTreeMap::from([
        (
            "KAFKA_BOOTSTRAP_SERVER".to_string(),
            kafka.bootstrap_server.clone(),
        ),
        (
            "KAFKA_PROPERTIES_SASL_USERNAME".to_string(),
            kafka.username.clone(),
        ),
        (
            "KAFKA_PROPERTIES_SASL_PASSWORD".to_string(),
            kafka.password.clone(),
        ),
    ]);
    extend_static(
        &mut env,
        &[
            ("DATAHUB_TELEMETRY_ENABLED", "false"),
            ("DATAHUB_GMS_PROTOCOL", "http"),
            ("DATAHUB_GMS_HOST", "localhost"),
            ("DATAHUB_GMS_PORT", "8080"),
            (
                "SCHEMA_REGISTRY_URL",
                "http://localhost:8080/schema-registry/api/",
            ),
            ("KAFKA_AUTO_OFFSET_POLICY", "latest"),
            ("KAFKA_PROPERTIES_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            ("KAFKA_PROPERTIES_SASL_MECHANISM", "SCRAM-SHA-512"),
        ],
    );
    env.extend(kafka_topic_names(ctx.operator.kafka_topic_prefix.as_deref()));

    Ok(Some(env))
}

pub(super) async fn run_initialization(
    _ctx: &mut InitContext<'_>,
) -> Result<bool, InitializationError> {
    Ok(false)
}
