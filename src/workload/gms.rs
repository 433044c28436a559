//! The metadata service itself.

use crate::registry::{DependencyKind, Flag};
use crate::workload::environment::{
    extend_static, jdbc_postgres_url, kafka_topic_names, sasl_jaas_config,
};
use crate::workload::truststore::install_truststore;
use crate::workload::{EnvironmentError, EvalContext, InitContext, InitializationError};
use crate::workload_event;
use std::collections::BTreeMap;

const WORKLOAD: &str = "datahub-gms";
const ENCRYPTION_KEY: &str = "gms-key";

pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot.flags.ran_upgrade.is_done()
        && ctx
            .snapshot
            .dependency_initialized(DependencyKind::Database)
            .is_done()
        && ctx
            .snapshot
            .dependency_initialized(DependencyKind::Kafka)
            .is_done()
        && ctx
            .snapshot
            .dependency_initialized(DependencyKind::Opensearch)
            .is_done()
}

pub(super) fn is_enabled(ctx: &EvalContext<'_>) -> bool {
    is_ready(ctx) && ctx.snapshot.flags.gms_truststore_initialized.is_done()
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_enabled(ctx) {
        return Ok(None);
    }

    let (Some(db), Some(kafka), Some(search)) = (
        ctx.snapshot.database.as_ref(),
        ctx.snapshot.kafka.as_ref(),
        ctx.snapshot.opensearch.as_ref(),
    ) else {
        return Ok(None);
    };

    let secret_id = ctx
        .operator
        .encryption_keys_secret_id
        .as_deref()
        .ok_or(EnvironmentError::MissingConfig("encryption_keys_secret_id"))?;
    let encryption_secret = ctx.secrets.get_secret(secret_id)?;
    let service_key = encryption_secret.require(ENCRYPTION_KEY)?;

    let mut env = BTreeMap::from([
        ("EBEAN_DATASOURCE_PORT".to_string(), db.port.to_string()),
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
        (
            "SECRET_SERVICE_ENCRYPTION_KEY".to_string(),
            service_key.to_string(),
        ),
    ]);
    extend_static(
        &mut env,
        &[
            ("DATAHUB_TELEMETRY_ENABLED", "false"),
            ("SHOW_SEARCH_FILTERS_V2", "true"),
            ("SHOW_BROWSE_V2", "true"),
            ("BACKFILL_BROWSE_PATHS_V2", "true"),
            ("ENABLE_PROMETHEUS", "false"),
            ("MCE_CONSUMER_ENABLED", "true"),
            ("MAE_CONSUMER_ENABLED", "true"),
            ("PE_CONSUMER_ENABLED", "true"),
            (
                "ENTITY_REGISTRY_CONFIG_PATH",
                "/datahub/datahub-gms/resources/entity-registry.yml",
            ),
            ("DATAHUB_ANALYTICS_ENABLED", "true"),
            ("EBEAN_DATASOURCE_DRIVER", "org.postgresql.Driver"),
            ("KAFKA_PRODUCER_COMPRESSION_TYPE", "none"),
            ("KAFKA_CONSUMER_STOP_ON_DESERIALIZATION_ERROR", "true"),
            ("KAFKA_PRODUCER_MAX_REQUEST_SIZE", "5242880"),
            ("KAFKA_CONSUMER_MAX_PARTITION_FETCH_BYTES", "5242880"),
            (
                "KAFKA_SCHEMAREGISTRY_URL",
                "http://localhost:8080/schema-registry/api/",
            ),
            ("SCHEMA_REGISTRY_TYPE", "INTERNAL"),
            ("SPRING_KAFKA_PROPERTIES_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            ("SPRING_KAFKA_PROPERTIES_SASL_MECHANISM", "SCRAM-SHA-512"),
            ("SKIP_ELASTICSEARCH_CHECK", "true"),
            ("ELASTICSEARCH_USE_SSL", "true"),
            ("GRAPH_SERVICE_IMPL", "elasticsearch"),
            ("UI_INGESTION_ENABLED", "true"),
            ("ENTITY_SERVICE_ENABLE_RETENTION", "false"),
            ("ELASTICSEARCH_QUERY_MAX_TERM_BUCKET_SIZE", "20"),
            ("ELASTICSEARCH_QUERY_EXACT_MATCH_EXCLUSIVE", "false"),
            ("ELASTICSEARCH_QUERY_EXACT_MATCH_WITH_PREFIX", "true"),
            ("ELASTICSEARCH_QUERY_EXACT_MATCH_FACTOR", "2"),
            ("ELASTICSEARCH_QUERY_EXACT_MATCH_PREFIX_FACTOR", "1.6"),
            ("ELASTICSEARCH_QUERY_EXACT_MATCH_CASE_FACTOR", "0.7"),
            ("ELASTICSEARCH_QUERY_EXACT_MATCH_ENABLE_STRUCTURED", "true"),
            ("ELASTICSEARCH_SEARCH_GRAPH_TIMEOUT_SECONDS", "50"),
            ("ELASTICSEARCH_SEARCH_GRAPH_BATCH_SIZE", "1000"),
            ("ELASTICSEARCH_SEARCH_GRAPH_MAX_RESULT", "10000"),
            ("SEARCH_SERVICE_ENABLE_CACHE", "false"),
            ("LINEAGE_SEARCH_CACHE_ENABLED", "false"),
            ("ELASTICSEARCH_INDEX_BUILDER_MAPPINGS_REINDEX", "true"),
            ("ELASTICSEARCH_INDEX_BUILDER_SETTINGS_REINDEX", "true"),
            ("ALWAYS_EMIT_CHANGE_LOG", "false"),
            ("GRAPH_SERVICE_DIFF_MODE_ENABLED", "true"),
            ("GRAPHQL_QUERY_INTROSPECTION_ENABLED", "true"),
            // Required for access tokens, i.e. service accounts.
            ("METADATA_SERVICE_AUTH_ENABLED", "true"),
        ],
    );
    if let Some(prefix) = ctx.operator.opensearch_index_prefix.as_deref() {
        env.insert("INDEX_PREFIX".to_string(), prefix.to_string());
    }
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

    // The only initialization step is the truststore for search SSL.
    if ctx.snapshot.flags.gms_truststore_initialized.is_done() {
        workload_event!(
            debug,
            "initialization_skipped",
            workload = WORKLOAD,
            reason = "already initialized"
        );
        return Ok(false);
    }

    let certificates = ctx
        .snapshot
        .opensearch
        .as_ref()
        .map(|conn| conn.tls_ca.clone())
        .ok_or_else(|| InitializationError::BadLogic {
            workload: WORKLOAD,
            reason: "truststore staging attempted without a search descriptor".to_string(),
        })?;

    install_truststore(ctx, WORKLOAD, &certificates).await?;
    ctx.snapshot.flags.gms_truststore_initialized = Flag::Done;
    ctx.persist(WORKLOAD)?;
    workload_event!(info, "truststore_initialized", workload = WORKLOAD);
    Ok(true)
}
