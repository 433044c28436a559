use crate::app_state::{AppState, Trigger};
use crate::config::StewardConfig;
use crate::error::{Error, Result};
use crate::management::ManagementServer;
use crate::metrics::metrics;
use crate::reconcile::{run_audit, run_pass, AuditClass, PassContext, PassOutcome, Status};
use crate::registry::{FileStateStore, StateStore};
use crate::retry::deferral_delay;
use crate::secrets::{DirSecretStore, SecretStore};
use crate::supervisor::HttpSupervisor;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::{interval, sleep_until, timeout, Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

const TRIGGER_QUEUE_DEPTH: usize = 64;
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub struct StewardApp {
    state: AppState,
    supervisor: Arc<HttpSupervisor>,
    triggers_rx: mpsc::Receiver<Trigger>,
    management: ManagementServer,
    shutdown: CancellationToken,
}

impl StewardApp {
    pub fn initialise(config: StewardConfig) -> Result<Self> {
        let request_timeout = config.supervisor_request_timeout()?;
        let supervisor = Arc::new(HttpSupervisor::new(
            &config.supervisor.base_url,
            request_timeout,
        )?);
        let store: Arc<dyn StateStore> = Arc::new(FileStateStore::new(&config.state_path));
        let secrets: Arc<dyn SecretStore> = Arc::new(DirSecretStore::new(&config.secrets_dir));
        let management = ManagementServer::build(&config.management)?;

        let (triggers_tx, triggers_rx) = mpsc::channel(TRIGGER_QUEUE_DEPTH);
        let config = Arc::new(config);

        let state = AppState {
            config,
            store,
            secrets,
            status: Arc::new(RwLock::new(Status::Waiting("starting".to_string()))),
            state_lock: Arc::new(Mutex::new(())),
            triggers: triggers_tx,
        };

        Ok(Self {
            state,
            supervisor,
            triggers_rx,
            management,
            shutdown: CancellationToken::new(),
        })
    }

    pub async fn run(self) -> Result<()> {
        let Self {
            state,
            supervisor,
            mut triggers_rx,
            management,
            shutdown,
        } = self;

        let management_state = state.clone();
        let management_shutdown = shutdown.clone();
        let mut management_task = tokio::spawn(async move {
            management
                .serve(management_state, management_shutdown)
                .await
        });

        let loop_state = ReconcilerLoop {
            state: state.clone(),
            supervisor,
        };

        let mut audit_ticker = interval(state.config.audit_interval);
        audit_ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The interval fires immediately; consume that tick and reconcile
        // once instead so startup goes through the full pass first.
        audit_ticker.tick().await;

        let mut defer_attempts: u32 = 0;
        let mut retry_at: Option<Instant> = None;
        loop_state
            .reconcile_once("startup", &mut defer_attempts, &mut retry_at)
            .await?;

        loop {
            let retry_deadline = retry_at.unwrap_or_else(Instant::now);

            tokio::select! {
                res = &mut management_task => {
                    tracing::warn!("management server task terminated unexpectedly");
                    match res {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => return Err(err),
                        Err(join_err) => {
                            return Err(crate::err!(
                                "management server task join error: {join_err}"
                            ))
                        }
                    }
                    break;
                }
                maybe_trigger = triggers_rx.recv() => {
                    let Some(trigger) = maybe_trigger else { break };
                    loop_state
                        .reconcile_once(trigger_label(&trigger), &mut defer_attempts, &mut retry_at)
                        .await?;
                }
                _ = sleep_until(retry_deadline), if retry_at.is_some() => {
                    retry_at = None;
                    loop_state
                        .reconcile_once("defer_retry", &mut defer_attempts, &mut retry_at)
                        .await?;
                }
                _ = audit_ticker.tick() => {
                    loop_state
                        .audit_once(&mut defer_attempts, &mut retry_at)
                        .await?;
                }
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("shutdown signal received");
                    break;
                }
            }
        }

        shutdown.cancel();
        if !management_task.is_finished() {
            match timeout(SHUTDOWN_GRACE, &mut management_task).await {
                Ok(Ok(Ok(()))) => {}
                Ok(Ok(Err(err))) => return Err(err),
                Ok(Err(join_err)) => {
                    tracing::warn!(error = %join_err, "management task cancelled");
                }
                Err(_) => {
                    tracing::warn!("management server did not stop within the grace period");
                    management_task.abort();
                }
            }
        }

        Ok(())
    }
}

struct ReconcilerLoop {
    state: AppState,
    supervisor: Arc<HttpSupervisor>,
}

impl ReconcilerLoop {
    fn pass_context(&self) -> PassContext<'_> {
        PassContext {
            config: &self.state.config,
            store: self.state.store.as_ref(),
            secrets: self.state.secrets.as_ref(),
            supervisor: self.supervisor.as_ref(),
            staging: self.supervisor.as_ref(),
        }
    }

    async fn set_status(&self, status: Status) {
        let mut guard = self.state.status.write().await;
        if *guard != status {
            tracing::info!(
                status = status.label(),
                reason = status.reason().unwrap_or(""),
                "status transition"
            );
        }
        *guard = status;
    }

    /// Runs one reconciliation pass under the state lock and folds the
    /// outcome into the reported status and the deferral schedule.
    async fn reconcile_once(
        &self,
        trigger: &str,
        defer_attempts: &mut u32,
        retry_at: &mut Option<Instant>,
    ) -> Result<()> {
        tracing::info!(trigger, "reconciliation pass starting");
        let outcome = {
            let _guard = self.state.state_lock.lock().await;
            run_pass(&self.pass_context()).await
        };

        match outcome {
            Ok(PassOutcome::Completed(status)) => {
                metrics().record_pass_completed();
                *defer_attempts = 0;
                *retry_at = None;
                self.set_status(status).await;
            }
            Ok(PassOutcome::Deferred { reason }) => {
                metrics().record_pass_deferred();
                let delay = deferral_delay(&self.state.config.defer_backoff, *defer_attempts);
                *defer_attempts = defer_attempts.saturating_add(1);
                *retry_at = Some(Instant::now() + delay);
                tracing::info!(
                    reason = reason.as_str(),
                    retry_in_secs = delay.as_secs_f64(),
                    "pass deferred"
                );
                self.set_status(Status::Waiting(reason)).await;
            }
            Err(err) => {
                metrics().record_pass_failed();
                tracing::error!(error = %err, "reconciliation pass failed");
                if is_fatal(&err) {
                    return Err(err);
                }
                self.set_status(Status::Waiting(format!("reconciliation failed: {err}")))
                    .await;
            }
        }

        Ok(())
    }

    /// Periodic drift and health audit; drift short-circuits into a full
    /// reconciliation pass.
    async fn audit_once(
        &self,
        defer_attempts: &mut u32,
        retry_at: &mut Option<Instant>,
    ) -> Result<()> {
        let report = {
            let _guard = self.state.state_lock.lock().await;
            run_audit(&self.pass_context()).await
        };

        let report = match report {
            Ok(report) => report,
            Err(err) => {
                tracing::error!(error = %err, "drift audit failed");
                if is_fatal(&err) {
                    return Err(err);
                }
                return Ok(());
            }
        };

        let current = self.state.status.read().await.clone();
        match report.classification {
            AuditClass::Invalid => {
                tracing::warn!("drift detected; re-running reconciliation");
                self.reconcile_once("drift_audit", defer_attempts, retry_at)
                    .await?;
            }
            AuditClass::NotReady => {
                if !matches!(current, Status::Blocked(_)) {
                    let detail = report
                        .findings
                        .iter()
                        .find(|finding| finding.class == AuditClass::NotReady)
                        .map(|finding| {
                            format!("{} for {}", finding.detail, finding.workload.name())
                        })
                        .unwrap_or_else(|| "supervisor unreachable".to_string());
                    self.set_status(Status::Waiting(detail)).await;
                }
            }
            AuditClass::Down => {
                if !matches!(current, Status::Blocked(_)) {
                    let unhealthy: Vec<&str> = report
                        .findings
                        .iter()
                        .filter(|finding| finding.class == AuditClass::Down)
                        .map(|finding| finding.workload.name())
                        .collect();
                    self.set_status(Status::Maintenance(format!(
                        "workload(s) unhealthy: {}",
                        unhealthy.join(", ")
                    )))
                    .await;
                }
            }
            AuditClass::Active => {
                // Only a converging deployment resolves to Active; a
                // blocked or freshly deferred one keeps its status.
                if matches!(current, Status::Maintenance(_) | Status::Active) {
                    self.set_status(Status::Active).await;
                }
            }
        }

        Ok(())
    }
}

fn trigger_label(trigger: &Trigger) -> &'static str {
    match trigger {
        Trigger::RelationChanged(_) => "relation_changed",
        Trigger::RelationRemoved(_) => "relation_removed",
        Trigger::Reconcile => "reconcile_requested",
        Trigger::WorkloadStarted(_) => "workload_started",
    }
}

/// Errors that cannot be retried away by a later pass.
fn is_fatal(err: &Error) -> bool {
    matches!(
        err,
        Error::StateStore(_) | Error::Config(_) | Error::BadLogic(_)
    )
}
