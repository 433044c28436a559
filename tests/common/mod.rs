#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;
use std::time::Duration;
use steward::config::{
    DeferBackoff, ManagementConfig, OperatorConfig, ProxyConfig, StewardConfig, SupervisorConfig,
};
use steward::reconcile::WorkloadPlan;
use steward::registry::store::{StateStore, StateStoreError};
use steward::registry::{
    DatabaseDescriptor, Flag, KafkaDescriptor, OpensearchDescriptor, StateSnapshot,
};
use steward::secrets::{SecretBundle, SecretContentError, SecretStore};
use steward::supervisor::{
    ExecOutput, ExecRequest, FileStaging, HealthStatus, Supervisor, SupervisorError,
};

pub const LEAF_CERT: &str = "-----BEGIN CERTIFICATE-----\nleaf\n-----END CERTIFICATE-----";
pub const ROOT_CERT: &str = "-----BEGIN CERTIFICATE-----\nroot\n-----END CERTIFICATE-----";

pub fn tls_ca_bundle() -> String {
    format!("{LEAF_CERT}\n{ROOT_CERT}\n")
}

pub fn database_descriptor(initialized: Flag) -> DatabaseDescriptor {
    DatabaseDescriptor {
        host: "pg.local".to_string(),
        port: 5432,
        dbname: "datahub_db".to_string(),
        username: "db-user".to_string(),
        password: "db-pass".to_string(),
        initialized,
    }
}

pub fn kafka_descriptor(initialized: Flag) -> KafkaDescriptor {
    KafkaDescriptor {
        bootstrap_server: "broker-0:9092".to_string(),
        username: "kafka-user".to_string(),
        password: "kafka-pass".to_string(),
        initialized,
    }
}

pub fn opensearch_descriptor(initialized: Flag) -> OpensearchDescriptor {
    OpensearchDescriptor {
        host: "os.local".to_string(),
        port: 9200,
        username: "os-user".to_string(),
        password: "os-pass".to_string(),
        tls_ca: tls_ca_bundle(),
        initialized,
    }
}

/// Every descriptor present with the given initialization flag; durable
/// flags untouched.
pub fn snapshot_with_descriptors(initialized: Flag) -> StateSnapshot {
    StateSnapshot {
        database: Some(database_descriptor(initialized)),
        kafka: Some(kafka_descriptor(initialized)),
        opensearch: Some(opensearch_descriptor(initialized)),
        flags: Default::default(),
    }
}

/// Fully converged registry: everything initialized, every flag `Done`.
pub fn converged_snapshot() -> StateSnapshot {
    let mut snapshot = snapshot_with_descriptors(Flag::Done);
    snapshot.flags.ran_upgrade = Flag::Done;
    snapshot.flags.upgrade_truststore_initialized = Flag::Done;
    snapshot.flags.gms_truststore_initialized = Flag::Done;
    snapshot.flags.frontend_truststore_initialized = Flag::Done;
    snapshot
}

pub fn operator_config() -> OperatorConfig {
    OperatorConfig {
        encryption_keys_secret_id: Some("encryption-keys".to_string()),
        ..OperatorConfig::default()
    }
}

pub fn steward_config() -> StewardConfig {
    StewardConfig {
        supervisor: SupervisorConfig::default(),
        state_path: "state/steward.json".to_string(),
        secrets_dir: "secrets".to_string(),
        management: ManagementConfig::default(),
        audit_interval: Duration::from_secs(30),
        defer_backoff: DeferBackoff::default(),
        operator: operator_config(),
        proxy: ProxyConfig::default(),
    }
}

/// In-memory secret store with well-formed encryption keys by default.
pub struct MemorySecretStore {
    secrets: Mutex<BTreeMap<String, BTreeMap<String, String>>>,
}

impl MemorySecretStore {
    pub fn with_encryption_keys() -> Self {
        let store = Self {
            secrets: Mutex::new(BTreeMap::new()),
        };
        store.insert(
            "encryption-keys",
            &[("gms-key", "gms-secret"), ("frontend-key", "frontend-secret")],
        );
        store
    }

    pub fn empty() -> Self {
        Self {
            secrets: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn insert(&self, id: &str, entries: &[(&str, &str)]) {
        let mut guard = self.secrets.lock().unwrap();
        guard.insert(
            id.to_string(),
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
    }
}

impl SecretStore for MemorySecretStore {
    fn get_secret(&self, id: &str) -> Result<SecretBundle, SecretContentError> {
        let guard = self.secrets.lock().unwrap();
        match guard.get(id) {
            Some(entries) => Ok(SecretBundle::new(id, entries.clone())),
            None => Err(SecretContentError::Unreadable {
                id: id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such secret"),
            }),
        }
    }
}

/// In-memory state store with whole-object replace semantics.
pub struct MemoryStateStore {
    snapshot: Mutex<StateSnapshot>,
    replace_count: Mutex<u64>,
}

impl MemoryStateStore {
    pub fn new(snapshot: StateSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(snapshot),
            replace_count: Mutex::new(0),
        }
    }

    pub fn current(&self) -> StateSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    pub fn replace_count(&self) -> u64 {
        *self.replace_count.lock().unwrap()
    }
}

impl StateStore for MemoryStateStore {
    fn load(&self) -> Result<StateSnapshot, StateStoreError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    fn replace(&self, snapshot: &StateSnapshot) -> Result<(), StateStoreError> {
        *self.snapshot.lock().unwrap() = snapshot.clone();
        *self.replace_count.lock().unwrap() += 1;
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct ExecCall {
    pub workload: String,
    pub command: Vec<String>,
    pub environment: BTreeMap<String, String>,
    pub working_dir: Option<String>,
    pub timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct StagedFile {
    pub workload: String,
    pub dest_path: String,
    pub permissions: u32,
    pub contents: String,
}

/// Scriptable supervisor double. Reachable and healthy by default; submitted
/// plans become the actual plans so audits can compare against them.
#[derive(Default)]
pub struct MockSupervisor {
    unreachable: Mutex<BTreeSet<String>>,
    health: Mutex<BTreeMap<String, HealthStatus>>,
    plans: Mutex<BTreeMap<String, WorkloadPlan>>,
    failing_execs: Mutex<BTreeSet<String>>,
    exec_calls: Mutex<Vec<ExecCall>>,
    staged: Mutex<Vec<StagedFile>>,
}

impl MockSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_unreachable(&self, workload: &str) {
        self.unreachable.lock().unwrap().insert(workload.to_string());
    }

    pub fn set_reachable(&self, workload: &str) {
        self.unreachable.lock().unwrap().remove(workload);
    }

    pub fn set_health(&self, workload: &str, status: HealthStatus) {
        self.health
            .lock()
            .unwrap()
            .insert(workload.to_string(), status);
    }

    pub fn fail_exec_for(&self, workload: &str) {
        self.failing_execs
            .lock()
            .unwrap()
            .insert(workload.to_string());
    }

    pub fn clear_exec_failures(&self) {
        self.failing_execs.lock().unwrap().clear();
    }

    pub fn set_actual_plan(&self, workload: &str, plan: WorkloadPlan) {
        self.plans.lock().unwrap().insert(workload.to_string(), plan);
    }

    pub fn actual(&self, workload: &str) -> Option<WorkloadPlan> {
        self.plans.lock().unwrap().get(workload).cloned()
    }

    pub fn submitted_count(&self) -> usize {
        self.plans.lock().unwrap().len()
    }

    pub fn exec_calls(&self) -> Vec<ExecCall> {
        self.exec_calls.lock().unwrap().clone()
    }

    pub fn exec_calls_for(&self, workload: &str) -> Vec<ExecCall> {
        self.exec_calls
            .lock()
            .unwrap()
            .iter()
            .filter(|call| call.workload == workload)
            .cloned()
            .collect()
    }

    pub fn staged_files_for(&self, workload: &str) -> Vec<StagedFile> {
        self.staged
            .lock()
            .unwrap()
            .iter()
            .filter(|file| file.workload == workload)
            .cloned()
            .collect()
    }

    fn is_unreachable(&self, workload: &str) -> bool {
        self.unreachable.lock().unwrap().contains(workload)
    }

    fn unreachable_error(&self, workload: &str) -> SupervisorError {
        SupervisorError::Unreachable {
            workload: workload.to_string(),
            reason: "connection refused".to_string(),
        }
    }
}

#[async_trait]
impl Supervisor for MockSupervisor {
    async fn can_connect(&self, workload: &str) -> bool {
        !self.is_unreachable(workload)
    }

    async fn submit_plan(
        &self,
        workload: &str,
        plan: &WorkloadPlan,
    ) -> Result<(), SupervisorError> {
        if self.is_unreachable(workload) {
            return Err(self.unreachable_error(workload));
        }
        self.plans
            .lock()
            .unwrap()
            .insert(workload.to_string(), plan.clone());
        Ok(())
    }

    async fn actual_plan(&self, workload: &str) -> Result<Option<WorkloadPlan>, SupervisorError> {
        if self.is_unreachable(workload) {
            return Err(self.unreachable_error(workload));
        }
        Ok(self.plans.lock().unwrap().get(workload).cloned())
    }

    async fn health(&self, workload: &str) -> Result<HealthStatus, SupervisorError> {
        if self.is_unreachable(workload) {
            return Err(self.unreachable_error(workload));
        }
        Ok(self
            .health
            .lock()
            .unwrap()
            .get(workload)
            .copied()
            .unwrap_or(HealthStatus::Up))
    }

    async fn exec(
        &self,
        workload: &str,
        request: ExecRequest,
    ) -> Result<ExecOutput, SupervisorError> {
        if self.is_unreachable(workload) {
            return Err(self.unreachable_error(workload));
        }
        self.exec_calls.lock().unwrap().push(ExecCall {
            workload: workload.to_string(),
            command: request.command,
            environment: request.environment,
            working_dir: request.working_dir,
            timeout: request.timeout,
        });

        if self.failing_execs.lock().unwrap().contains(workload) {
            return Ok(ExecOutput {
                exit_code: 1,
                stdout: "simulated failure".to_string(),
            });
        }

        Ok(ExecOutput {
            exit_code: 0,
            stdout: String::new(),
        })
    }
}

#[async_trait]
impl FileStaging for MockSupervisor {
    async fn stage(
        &self,
        workload: &str,
        contents: &str,
        dest_path: &str,
        permissions: u32,
    ) -> Result<(), SupervisorError> {
        if self.is_unreachable(workload) {
            return Err(self.unreachable_error(workload));
        }
        self.staged.lock().unwrap().push(StagedFile {
            workload: workload.to_string(),
            dest_path: dest_path.to_string(),
            permissions,
            contents: contents.to_string(),
        });
        Ok(())
    }
}
