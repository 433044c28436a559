use crate::app_state::{AppState, Trigger};
use crate::config::ManagementConfig;
use crate::error::{Context, Result};
use crate::metrics::metrics;
use crate::reconcile::Status;
use crate::registry::{apply_relation_event, DependencyKind, RelationEvent};
use crate::workload::{EvalContext, WorkloadKind, WORKLOAD_ORDER};
use axum::body::Body;
use axum::extract::Path;
use axum::http::{
    header::{CONTENT_TYPE, RETRY_AFTER},
    StatusCode,
};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Extension, Json, Router};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub struct ManagementServer {
    addr: SocketAddr,
}

impl ManagementServer {
    pub fn build(config: &ManagementConfig) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", config.host, config.port)
            .parse()
            .with_context(|| {
                format!(
                    "invalid management listen address {}:{}",
                    config.host, config.port
                )
            })?;
        Ok(Self { addr })
    }

    pub async fn serve(self, state: AppState, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("failed to bind management listener on {}", self.addr))?;

        let router = Router::new()
            .route("/livez", get(live))
            .route("/readyz", get(ready))
            .route("/statusz", get(status_report))
            .route("/metrics", get(metrics_endpoint))
            .route(
                "/v1/relations/:kind",
                put(relation_changed).delete(relation_removed),
            )
            .route("/v1/reconcile", post(reconcile_now))
            .route("/v1/workloads/:name/started", post(workload_started))
            .layer(Extension(state));

        tracing::info!("management server listening on {}", self.addr);

        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
            .context("management server exited abnormally")?;

        Ok(())
    }
}

/// Retry-After hint advertised while the service is not yet active.
pub fn retry_after_hint_seconds(audit_interval: Duration) -> u64 {
    let secs = audit_interval.as_secs();
    if secs == 0 {
        1
    } else {
        secs
    }
}

async fn live() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "ok" })))
}

async fn ready(Extension(state): Extension<AppState>) -> Response {
    let status = state.status.read().await.clone();
    let payload = Json(json!({
        "state": status.label(),
        "reason": status.reason(),
    }));

    match status {
        Status::Active => (StatusCode::OK, payload).into_response(),
        _ => {
            let mut response = payload.into_response();
            *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
            let retry_after = retry_after_hint_seconds(state.config.audit_interval);
            if let Ok(value) = axum::http::HeaderValue::from_str(&retry_after.to_string()) {
                response.headers_mut().insert(RETRY_AFTER, value);
            }
            response
        }
    }
}

async fn status_report(Extension(state): Extension<AppState>) -> Response {
    let timestamp = Utc::now().to_rfc3339();
    let status = state.status.read().await.clone();

    let snapshot = match state.store.load() {
        Ok(snapshot) => snapshot,
        Err(err) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    };

    let eval = EvalContext {
        snapshot: &snapshot,
        operator: &state.config.operator,
        proxy: &state.config.proxy,
        secrets: state.secrets.as_ref(),
    };

    let workloads: Vec<_> = WORKLOAD_ORDER
        .iter()
        .map(|kind| {
            json!({
                "name": kind.name(),
                "ready": kind.is_ready(&eval),
                "enabled": kind.is_enabled(&eval),
            })
        })
        .collect();

    let missing: Vec<&str> = snapshot
        .missing_relations()
        .iter()
        .map(|kind| kind.as_str())
        .collect();

    (
        StatusCode::OK,
        Json(json!({
            "status": status.label(),
            "reason": status.reason(),
            "missing_relations": missing,
            "flags": {
                "ran_upgrade": snapshot.flags.ran_upgrade.as_str(),
                "upgrade_truststore": snapshot.flags.upgrade_truststore_initialized.as_str(),
                "gms_truststore": snapshot.flags.gms_truststore_initialized.as_str(),
                "frontend_truststore": snapshot.flags.frontend_truststore_initialized.as_str(),
            },
            "workloads": workloads,
            "ts": timestamp,
        })),
    )
        .into_response()
}

async fn metrics_endpoint() -> Response {
    let mut body = String::new();
    metrics().render(&mut body);

    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/plain; version=0.0.4")
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[derive(Debug, Deserialize)]
struct RelationChangePayload {
    #[serde(default)]
    endpoints: Option<String>,
    #[serde(default)]
    bootstrap_servers: Option<String>,
    username: String,
    password: String,
    #[serde(default)]
    tls_ca: Option<String>,
}

fn relation_event_from_payload(
    kind: DependencyKind,
    payload: RelationChangePayload,
) -> std::result::Result<RelationEvent, &'static str> {
    match kind {
        DependencyKind::Database => Ok(RelationEvent::DatabaseChanged {
            endpoints: payload.endpoints.ok_or("`endpoints` is required")?,
            username: payload.username,
            password: payload.password,
        }),
        DependencyKind::Kafka => Ok(RelationEvent::KafkaChanged {
            bootstrap_servers: payload
                .bootstrap_servers
                .ok_or("`bootstrap_servers` is required")?,
            username: payload.username,
            password: payload.password,
        }),
        DependencyKind::Opensearch => Ok(RelationEvent::OpensearchChanged {
            endpoints: payload.endpoints.ok_or("`endpoints` is required")?,
            username: payload.username,
            password: payload.password,
            tls_ca: payload.tls_ca.ok_or("`tls_ca` is required")?,
        }),
    }
}

async fn relation_changed(
    Path(kind): Path<String>,
    Extension(state): Extension<AppState>,
    Json(payload): Json<RelationChangePayload>,
) -> Response {
    let Some(kind) = DependencyKind::parse(&kind) else {
        return unknown_relation(&kind);
    };

    let event = match relation_event_from_payload(kind, payload) {
        Ok(event) => event,
        Err(detail) => {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": detail })),
            )
                .into_response();
        }
    };

    apply_and_trigger(&state, event, Trigger::RelationChanged(kind)).await
}

async fn relation_removed(
    Path(kind): Path<String>,
    Extension(state): Extension<AppState>,
) -> Response {
    let Some(kind) = DependencyKind::parse(&kind) else {
        return unknown_relation(&kind);
    };

    apply_and_trigger(
        &state,
        RelationEvent::Removed { kind },
        Trigger::RelationRemoved(kind),
    )
    .await
}

async fn apply_and_trigger(state: &AppState, event: RelationEvent, trigger: Trigger) -> Response {
    let kind = event.kind();

    {
        let _guard = state.state_lock.lock().await;
        let mut snapshot = match state.store.load() {
            Ok(snapshot) => snapshot,
            Err(err) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": err.to_string() })),
                )
                    .into_response();
            }
        };

        if let Err(err) = apply_relation_event(&mut snapshot, event) {
            return (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }

        if let Err(err) = state.store.replace(&snapshot) {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
        }
    }

    tracing::info!(relation = kind.as_str(), "relation state updated");
    enqueue_trigger(state, trigger).await
}

async fn reconcile_now(Extension(state): Extension<AppState>) -> Response {
    enqueue_trigger(&state, Trigger::Reconcile).await
}

async fn workload_started(
    Path(name): Path<String>,
    Extension(state): Extension<AppState>,
) -> Response {
    if WorkloadKind::from_name(&name).is_none() {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("unknown workload `{name}`") })),
        )
            .into_response();
    }

    enqueue_trigger(&state, Trigger::WorkloadStarted(name)).await
}

async fn enqueue_trigger(state: &AppState, trigger: Trigger) -> Response {
    match state.triggers.send(trigger).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(json!({ "status": "accepted" })),
        )
            .into_response(),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "reconciler is shutting down" })),
        )
            .into_response(),
    }
}

fn unknown_relation(kind: &str) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": format!("unknown relation `{kind}`") })),
    )
        .into_response()
}
