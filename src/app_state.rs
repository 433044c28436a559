use crate::config::StewardConfig;
use crate::reconcile::Status;
use crate::registry::{DependencyKind, StateStore};
use crate::secrets::SecretStore;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};

/// Discrete events that invoke a reconciliation pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    RelationChanged(DependencyKind),
    RelationRemoved(DependencyKind),
    Reconcile,
    WorkloadStarted(String),
}

/// Shared state between the reconciler loop and the management server.
///
/// `state_lock` serialises everything that read-modify-writes the persisted
/// snapshot: the reconciliation pass, the drift audit and relation intake.
/// There is never more than one mutator in flight.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<StewardConfig>,
    pub store: Arc<dyn StateStore>,
    pub secrets: Arc<dyn SecretStore>,
    pub status: Arc<RwLock<Status>>,
    pub state_lock: Arc<Mutex<()>>,
    pub triggers: mpsc::Sender<Trigger>,
}
