//! Shared environment builders: topic naming, datasource URLs, vendor auth
//! strings, proxy exceptions and the optional single-sign-on block.

use crate::config::ProxyConfig;
use crate::secrets::SecretStore;
use crate::workload::EnvironmentError;
use std::collections::BTreeMap;
use url::Url;

/// Well-known Kafka topic environment variables and their canonical names.
/// With a prefix configured, every name is rewritten as `prefix_name`.
const TOPIC_DEFAULTS: [(&str, &str); 7] = [
    ("METADATA_CHANGE_PROPOSAL_TOPIC_NAME", "MetadataChangeProposal_v1"),
    (
        "FAILED_METADATA_CHANGE_PROPOSAL_TOPIC_NAME",
        "FailedMetadataChangeProposal_v1",
    ),
    (
        "METADATA_CHANGE_LOG_VERSIONED_TOPIC_NAME",
        "MetadataChangeLog_Versioned_v1",
    ),
    (
        "METADATA_CHANGE_LOG_TIMESERIES_TOPIC_NAME",
        "MetadataChangeLog_Timeseries_v1",
    ),
    ("PLATFORM_EVENT_TOPIC_NAME", "PlatformEvent_v1"),
    ("DATAHUB_UPGRADE_HISTORY_TOPIC_NAME", "DataHubUpgradeHistory_v1"),
    ("DATAHUB_USAGE_EVENT_NAME", "DataHubUsageEvent_v1"),
];

/// Topic-name variables shared by every Kafka-speaking workload.
pub fn kafka_topic_names(prefix: Option<&str>) -> BTreeMap<String, String> {
    let mut names: BTreeMap<String, String> = TOPIC_DEFAULTS
        .iter()
        .map(|(key, default)| {
            let value = match prefix {
                Some(prefix) => format!("{prefix}_{default}"),
                None => (*default).to_string(),
            };
            ((*key).to_string(), value)
        })
        .collect();

    // The tracking topic aliases the usage-event topic.
    if let Some(usage) = names.get("DATAHUB_USAGE_EVENT_NAME").cloned() {
        names.insert("DATAHUB_TRACKING_TOPIC".to_string(), usage);
    }

    names
}

/// SCRAM login module auth-config string consumed by the Kafka clients.
pub fn sasl_jaas_config(username: &str, password: &str) -> String {
    format!(
        "org.apache.kafka.common.security.scram.ScramLoginModule required \
         username=\"{username}\" password=\"{password}\";"
    )
}

pub fn jdbc_postgres_url(host: &str, port: u16, dbname: &str) -> String {
    format!("jdbc:postgresql://{host}:{port}/{dbname}")
}

/// Proxy variables plus the egress exception list. Intra-cluster hostnames
/// are appended to the exception list so local calls never traverse the
/// proxy; entries are joined by `|` as the frontend runtime expects.
pub fn proxy_environment(
    proxy: &ProxyConfig,
    local_hosts: &[&str],
) -> Result<BTreeMap<String, String>, EnvironmentError> {
    let mut vars = BTreeMap::new();
    let mut no_proxy_hosts: Vec<String> = vec!["localhost".to_string()];

    if let Some(raw) = proxy.no_proxy.as_deref() {
        no_proxy_hosts.extend(
            raw.split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(str::to_string),
        );
    }
    for host in local_hosts {
        if !no_proxy_hosts.iter().any(|existing| existing == host) {
            no_proxy_hosts.push((*host).to_string());
        }
    }

    if let Some(raw) = proxy.http_proxy.as_deref() {
        let (host, port) = split_proxy_url(raw)?;
        vars.insert("HTTP_PROXY_HOST".to_string(), host);
        vars.insert("HTTP_PROXY_PORT".to_string(), port);
    }
    if let Some(raw) = proxy.https_proxy.as_deref() {
        let (host, port) = split_proxy_url(raw)?;
        vars.insert("HTTPS_PROXY_HOST".to_string(), host);
        vars.insert("HTTPS_PROXY_PORT".to_string(), port);
    }

    vars.insert(
        "HTTP_NON_PROXY_HOSTS".to_string(),
        no_proxy_hosts.join("|"),
    );

    Ok(vars)
}

fn split_proxy_url(raw: &str) -> Result<(String, String), EnvironmentError> {
    let url = Url::parse(raw).map_err(|source| EnvironmentError::InvalidProxy {
        value: raw.to_string(),
        source,
    })?;
    let host = url
        .host_str()
        .ok_or_else(|| EnvironmentError::InvalidProxy {
            value: raw.to_string(),
            source: url::ParseError::EmptyHost,
        })?
        .to_string();
    let port = url
        .port()
        .map(|port| port.to_string())
        .unwrap_or_default();
    Ok((host, port))
}

/// Single-sign-on variables, active only when an OIDC secret is configured.
/// Malformed secret contents abort compilation; no partial block is emitted.
pub fn oidc_environment(
    secrets: &dyn SecretStore,
    secret_id: &str,
    external_fe_hostname: Option<&str>,
) -> Result<BTreeMap<String, String>, EnvironmentError> {
    let secret = secrets.get_secret(secret_id)?;
    let client_id = secret.require("client-id")?;
    let client_secret = secret.require("client-secret")?;

    // OIDC mandates TLS, so an externally reachable frontend hostname
    // switches the redirect base to HTTPS.
    let base_url = match external_fe_hostname {
        Some(hostname) => format!("https://{hostname}"),
        None => "http://localhost:9002".to_string(),
    };

    Ok(BTreeMap::from([
        ("AUTH_OIDC_ENABLED".to_string(), "true".to_string()),
        (
            "AUTH_OIDC_DISCOVERY_URI".to_string(),
            "https://accounts.google.com/.well-known/openid-configuration".to_string(),
        ),
        ("AUTH_OIDC_BASE_URL".to_string(), base_url),
        (
            "AUTH_OIDC_SCOPE".to_string(),
            "openid profile email".to_string(),
        ),
        ("AUTH_OIDC_CLIENT_ID".to_string(), client_id.to_string()),
        (
            "AUTH_OIDC_CLIENT_SECRET".to_string(),
            client_secret.to_string(),
        ),
        ("AUTH_OIDC_USER_NAME_CLAIM".to_string(), "email".to_string()),
    ]))
}

/// Inserts static `(key, value)` pairs into an environment map.
pub fn extend_static(env: &mut BTreeMap<String, String>, entries: &[(&str, &str)]) {
    for (key, value) in entries {
        env.insert((*key).to_string(), (*value).to_string());
    }
}
