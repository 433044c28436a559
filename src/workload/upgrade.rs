//! Full-system migration job. Its completion flag gates every long-running
//! workload, making it the global serialization point of the priority order.

use crate::registry::Flag;
use crate::workload::environment::{
    extend_static, jdbc_postgres_url, kafka_topic_names, sasl_jaas_config,
};
use crate::workload::truststore::{install_truststore, run_script, stage_runner, RUNNER_DEST_PATH};
use crate::workload::{EnvironmentError, EvalContext, InitContext, InitializationError};
use crate::workload_event;
use std::collections::BTreeMap;
use std::time::Duration;

const WORKLOAD: &str = "datahub-upgrade";
const UPGRADE_JAR: &str = "/datahub/datahub-upgrade/bin/datahub-upgrade.jar";
const EXEC_TIMEOUT: Duration = Duration::from_secs(180);

/// The migration touches the schema, the topics and the indices at once, so
/// it only becomes ready after every bootstrap job has confirmed completion.
pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot.all_dependencies_initialized()
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_ready(ctx) {
        return Ok(None);
    }

    let (Some(db), Some(kafka), Some(search)) = (
        ctx.snapshot.database.as_ref(),
        ctx.snapshot.kafka.as_ref(),
        ctx.snapshot.opensearch.as_ref(),
    ) else {
        return Ok(None);
    };

    let mut env = BTreeMap::from([
        ("EBEAN_DATASOURCE_USERNAME".to_string(), db.username.clone()),
        ("EBEAN_DATASOURCE_PASSWORD".to_string(), db.password.clone()),
        (
            "EBEAN_DATASOURCE_HOST".to_string(),
            format!("{}:{}", db.host, db.port),
        ),
        (
            "EBEAN_DATASOURCE_URL".to_string(),
            jdbc_postgres_url(&db.host, db.port, &db.dbname),
        ),
        (
            "KAFKA_BOOTSTRAP_SERVER".to_string(),
            kafka.bootstrap_server.clone(),
        ),
        (
            "SPRING_KAFKA_PROPERTIES_SASL_JAAS_CONFIG".to_string(),
            sasl_jaas_config(&kafka.username, &kafka.password),
        ),
        ("ELASTICSEARCH_HOST".to_string(), search.host.clone()),
        ("ELASTICSEARCH_PORT".to_string(), search.port.to_string()),
        (
            "ELASTICSEARCH_USERNAME".to_string(),
            search.username.clone(),
        ),
        (
            "ELASTICSEARCH_PASSWORD".to_string(),
            search.password.clone(),
        ),
    ]);
    extend_static(
        &mut env,
        &[
            ("DATAHUB_ANALYTICS_ENABLED", "true"),
            ("SCHEMA_REGISTRY_SYSTEM_UPDATE", "true"),
            ("SPRING_KAFKA_PROPERTIES_AUTO_REGISTER_SCHEMAS", "true"),
            ("SPRING_KAFKA_PROPERTIES_USE_LATEST_VERSION", "true"),
            ("SCHEMA_REGISTRY_TYPE", "INTERNAL"),
            ("ELASTICSEARCH_BUILD_INDICES_CLONE_INDICES", "false"),
            ("ELASTICSEARCH_INDEX_BUILDER_MAPPINGS_REINDEX", "true"),
            ("ELASTICSEARCH_INDEX_BUILDER_SETTINGS_REINDEX", "true"),
            (
                "ELASTICSEARCH_BUILD_INDICES_ALLOW_DOC_COUNT_MISMATCH",
                "false",
            ),
            (
                "ENTITY_REGISTRY_CONFIG_PATH",
                "/datahub/datahub-gms/resources/entity-registry.yml",
            ),
            ("DATAHUB_GMS_HOST", "localhost"),
            ("DATAHUB_GMS_PORT", "8080"),
            ("EBEAN_DATASOURCE_DRIVER", "org.postgresql.Driver"),
            ("KAFKA_PRODUCER_COMPRESSION_TYPE", "none"),
            ("KAFKA_PRODUCER_MAX_REQUEST_SIZE", "5242880"),
            ("KAFKA_CONSUMER_MAX_PARTITION_FETCH_BYTES", "5242880"),
            (
                "KAFKA_SCHEMAREGISTRY_URL",
                "http://localhost:8080/schema-registry/api/",
            ),
            ("SKIP_ELASTICSEARCH_CHECK", "true"),
            ("ELASTICSEARCH_INSECURE", "false"),
            ("ELASTICSEARCH_USE_SSL", "true"),
            ("GRAPH_SERVICE_IMPL", "elasticsearch"),
            ("SPRING_KAFKA_PROPERTIES_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            ("SPRING_KAFKA_PROPERTIES_SASL_MECHANISM", "SCRAM-SHA-512"),
        ],
    );
    if let Some(prefix) = ctx.operator.opensearch_index_prefix.as_deref() {
        env.insert("INDEX_PREFIX".to_string(), prefix.to_string());
    }
    env.extend(kafka_topic_names(ctx.operator.kafka_topic_prefix.as_deref()));

    Ok(Some(env))
}

/// The "initialization" here runs a migration for the whole ecosystem; the
/// semantics are loosened to fit the workload pattern. Trust material is
/// staged first (behind its own durable flag), then the migration runs, and
/// only migration success sets `ran-upgrade`.
pub(super) async fn run_initialization(
    ctx: &mut InitContext<'_>,
) -> Result<bool, InitializationError> {
    if ctx.snapshot.flags.ran_upgrade.is_done() {
        workload_event!(
            debug,
            "initialization_skipped",
            workload = WORKLOAD,
            reason = "migration already ran"
        );
        return Ok(false);
    }

    if !is_ready(&ctx.eval()) {
        workload_event!(
            info,
            "initialization_skipped",
            workload = WORKLOAD,
            reason = "dependencies not initialized"
        );
        return Ok(false);
    }

    if !ctx.snapshot.flags.upgrade_truststore_initialized.is_done() {
        let certificates = ctx
            .snapshot
            .opensearch
            .as_ref()
            .map(|conn| conn.tls_ca.clone())
            .ok_or_else(|| InitializationError::BadLogic {
                workload: WORKLOAD,
                reason: "migration attempted without a search descriptor".to_string(),
            })?;

        install_truststore(ctx, WORKLOAD, &certificates).await?;
        ctx.snapshot.flags.upgrade_truststore_initialized = Flag::Done;
        ctx.persist(WORKLOAD)?;
        workload_event!(info, "truststore_initialized", workload = WORKLOAD);
    }

    let environment =
        compile_environment(&ctx.eval())
            .map_err(|err| InitializationError::Failed {
                workload: WORKLOAD,
                reason: err.to_string(),
            })?
            .ok_or_else(|| InitializationError::BadLogic {
                workload: WORKLOAD,
                reason: "migration attempted before it is ready".to_string(),
            })?;

    workload_event!(info, "migration_started", workload = WORKLOAD);
    stage_runner(ctx, WORKLOAD, 0o755).await?;
    run_script(
        ctx,
        WORKLOAD,
        vec![
            RUNNER_DEST_PATH.to_string(),
            "java".to_string(),
            "-jar".to_string(),
            UPGRADE_JAR.to_string(),
            "-u".to_string(),
            "SystemUpdate".to_string(),
        ],
        environment,
        None,
        EXEC_TIMEOUT,
    )
    .await?;

    ctx.snapshot.flags.ran_upgrade = Flag::Done;
    ctx.persist(WORKLOAD)?;
    workload_event!(info, "migration_succeeded", workload = WORKLOAD);
    Ok(true)
}
