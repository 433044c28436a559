//! The web frontend.

use crate::registry::{DependencyKind, Flag};
use crate::workload::environment::{
    extend_static, kafka_topic_names, oidc_environment, proxy_environment, sasl_jaas_config,
};
use crate::workload::truststore::install_truststore;
use crate::workload::{gms, EnvironmentError, EvalContext, InitContext, InitializationError};
use crate::workload_event;
use std::collections::BTreeMap;

const WORKLOAD: &str = "datahub-frontend";
const ENCRYPTION_KEY: &str = "frontend-key";

/// The metadata service host the frontend proxies to. Kept out of the
/// egress proxy path.
const GMS_HOST: &str = "localhost";

pub(super) fn is_ready(ctx: &EvalContext<'_>) -> bool {
    ctx.snapshot.flags.ran_upgrade.is_done()
        && ctx
            .snapshot
            .dependency_initialized(DependencyKind::Kafka)
            .is_done()
        && ctx
            .snapshot
            .dependency_initialized(DependencyKind::Opensearch)
            .is_done()
        && gms::is_enabled(ctx)
}

pub(super) fn is_enabled(ctx: &EvalContext<'_>) -> bool {
    is_ready(ctx) && ctx.snapshot.flags.frontend_truststore_initialized.is_done()
}

pub(super) fn compile_environment(
    ctx: &EvalContext<'_>,
) -> Result<Option<BTreeMap<String, String>>, EnvironmentError> {
    if !is_enabled(ctx) {
        return Ok(None);
    }

    let (Some(kafka), Some(search)) = (
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
    let play_secret = encryption_secret.require(ENCRYPTION_KEY)?;

    let mut env = BTreeMap::from([
        ("DATAHUB_SECRET".to_string(), play_secret.to_string()),
        (
            "KAFKA_BOOTSTRAP_SERVER".to_string(),
            kafka.bootstrap_server.clone(),
        ),
        (
            "SPRING_KAFKA_PROPERTIES_SASL_JAAS_CONFIG".to_string(),
            sasl_jaas_config(&kafka.username, &kafka.password),
        ),
        ("ELASTIC_CLIENT_HOST".to_string(), search.host.clone()),
        ("ELASTIC_CLIENT_PORT".to_string(), search.port.to_string()),
        (
            "ELASTIC_CLIENT_USERNAME".to_string(),
            search.username.clone(),
        ),
        (
            "ELASTIC_CLIENT_PASSWORD".to_string(),
            search.password.clone(),
        ),
    ]);
    extend_static(
        &mut env,
        &[
            ("THEME_V2_DEFAULT", "true"),
            ("ENABLE_PROMETHEUS", "false"),
            ("DATAHUB_GMS_HOST", GMS_HOST),
            ("DATAHUB_GMS_PORT", "8080"),
            ("DATAHUB_APP_VERSION", "1.1.0"),
            ("DATAHUB_PLAY_MEM_BUFFER_SIZE", "10MB"),
            ("DATAHUB_ANALYTICS_ENABLED", "true"),
            ("ENFORCE_VALID_EMAIL", "true"),
            ("KAFKA_PRODUCER_COMPRESSION_TYPE", "none"),
            ("KAFKA_PRODUCER_MAX_REQUEST_SIZE", "5242880"),
            ("KAFKA_CONSUMER_MAX_PARTITION_FETCH_BYTES", "5242880"),
            ("SPRING_KAFKA_PROPERTIES_SECURITY_PROTOCOL", "SASL_PLAINTEXT"),
            ("SPRING_KAFKA_PROPERTIES_SASL_MECHANISM", "SCRAM-SHA-512"),
            ("ELASTIC_CLIENT_USE_SSL", "true"),
            ("AUTH_SESSION_TTL_HOURS", "24"),
            // Required for access tokens, i.e. service accounts.
            ("METADATA_SERVICE_AUTH_ENABLED", "true"),
        ],
    );
    if ctx.operator.use_play_cache_session_store {
        env.insert(
            "PAC4J_SESSIONSTORE_PROVIDER".to_string(),
            "PlayCacheSessionStore".to_string(),
        );
    }
    if let Some(prefix) = ctx.operator.opensearch_index_prefix.as_deref() {
        env.insert("ELASTIC_INDEX_PREFIX".to_string(), prefix.to_string());
    }
    env.extend(kafka_topic_names(ctx.operator.kafka_topic_prefix.as_deref()));
    env.extend(proxy_environment(ctx.proxy, &[GMS_HOST])?);

    if let Some(oidc_secret_id) = ctx.operator.oidc_secret_id.as_deref() {
        env.extend(oidc_environment(
            ctx.secrets,
            oidc_secret_id,
            ctx.operator.external_fe_hostname.as_deref(),
        )?);
    }

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
    if ctx.snapshot.flags.frontend_truststore_initialized.is_done() {
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
    ctx.snapshot.flags.frontend_truststore_initialized = Flag::Done;
    ctx.persist(WORKLOAD)?;
    workload_event!(info, "truststore_initialized", workload = WORKLOAD);
    Ok(true)
}
