//! Trust material staging and script execution for one-time setup actions.

use crate::supervisor::{ExecRequest, SupervisorError};
use crate::workload::{InitContext, InitializationError};
use std::collections::BTreeMap;
use std::time::Duration;

pub const RUNNER_SCRIPT: &str = include_str!("../../scripts/runner.sh");
pub const TRUSTSTORE_INIT_SCRIPT: &str = include_str!("../../scripts/init-truststore.sh");

pub const RUNNER_DEST_PATH: &str = "/tmp/steward/runner.sh";
pub const TRUSTSTORE_INIT_SCRIPT_DEST_PATH: &str = "/tmp/steward/init-truststore.sh";
pub const OPENSEARCH_CERTIFICATES_PATH: &str = "/tmp/steward/opensearch_certificates.pem";
pub const OPENSEARCH_ROOT_CA_CERT_PATH: &str = "/tmp/steward/opensearch_root_ca_cert.pem";
pub const OPENSEARCH_ROOT_CA_CERT_ALIAS: &str = "opensearch-root-ca";

const TRUSTSTORE_EXEC_TIMEOUT: Duration = Duration::from_secs(120);

const CERTIFICATE_FOOTER: &str = "-----END CERTIFICATE-----";

/// Splits a PEM bundle into its component certificates. The input is not
/// validated beyond the footer markers.
pub fn split_certificates(bundle: &str) -> Vec<String> {
    bundle
        .split(CERTIFICATE_FOOTER)
        .filter(|chunk| !chunk.trim().is_empty())
        .map(|chunk| format!("{}\n{CERTIFICATE_FOOTER}", chunk.trim()))
        .collect()
}

/// The issuing root certificate is the second entry of the bundle the index
/// relation hands out (leaf first, root second).
pub fn root_ca_certificate(bundle: &str) -> Option<String> {
    split_certificates(bundle).into_iter().nth(1)
}

fn staging_failed(workload: &'static str, err: SupervisorError) -> InitializationError {
    InitializationError::Failed {
        workload,
        reason: err.to_string(),
    }
}

/// Stages the truststore bootstrap script plus the root CA certificate into
/// the workload and runs the script. Any failure aborts without touching
/// durable flags.
pub async fn install_truststore(
    ctx: &InitContext<'_>,
    workload: &'static str,
    tls_ca: &str,
) -> Result<(), InitializationError> {
    let root_ca = root_ca_certificate(tls_ca).ok_or_else(|| InitializationError::Failed {
        workload,
        reason: "TLS bundle does not contain a root CA certificate".to_string(),
    })?;

    ctx.staging
        .stage(
            workload,
            TRUSTSTORE_INIT_SCRIPT,
            TRUSTSTORE_INIT_SCRIPT_DEST_PATH,
            0o755,
        )
        .await
        .map_err(|err| staging_failed(workload, err))?;
    ctx.staging
        .stage(workload, &root_ca, OPENSEARCH_ROOT_CA_CERT_PATH, 0o644)
        .await
        .map_err(|err| staging_failed(workload, err))?;

    let environment = BTreeMap::from([
        (
            "CERT_PATH".to_string(),
            OPENSEARCH_ROOT_CA_CERT_PATH.to_string(),
        ),
        (
            "CERT_ALIAS".to_string(),
            OPENSEARCH_ROOT_CA_CERT_ALIAS.to_string(),
        ),
    ]);

    run_script(
        ctx,
        workload,
        vec![TRUSTSTORE_INIT_SCRIPT_DEST_PATH.to_string()],
        environment,
        None,
        TRUSTSTORE_EXEC_TIMEOUT,
    )
    .await
}

/// Stages the generic runner wrapper into the workload.
pub async fn stage_runner(
    ctx: &InitContext<'_>,
    workload: &'static str,
    permissions: u32,
) -> Result<(), InitializationError> {
    ctx.staging
        .stage(workload, RUNNER_SCRIPT, RUNNER_DEST_PATH, permissions)
        .await
        .map_err(|err| staging_failed(workload, err))
}

/// Runs a command through the supervisor with a bounded timeout, treating a
/// non-zero exit as initialization failure.
pub async fn run_script(
    ctx: &InitContext<'_>,
    workload: &'static str,
    command: Vec<String>,
    environment: BTreeMap<String, String>,
    working_dir: Option<&str>,
    timeout: Duration,
) -> Result<(), InitializationError> {
    let output = ctx
        .supervisor
        .exec(
            workload,
            ExecRequest {
                command,
                environment,
                working_dir: working_dir.map(str::to_string),
                timeout: Some(timeout),
            },
        )
        .await
        .map_err(|err| InitializationError::Failed {
            workload,
            reason: err.to_string(),
        })?;

    if !output.success() {
        return Err(InitializationError::Failed {
            workload,
            reason: format!(
                "command exited with status {}: {}",
                output.exit_code,
                output.stdout.trim()
            ),
        });
    }

    Ok(())
}
