//! HTTP surface: the Discord interaction endpoint and a health check.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::channels::discord::interactions::{
    verify_signature, Interaction, InteractionResponse, DiscordPresenter, PING,
};
use crate::channels::discord::MessagePayload;
use crate::tickets::EventRouter;

/// Discord drops interactions that are not answered within three seconds.
pub const RESPONSE_DEADLINE: Duration = Duration::from_millis(2500);

pub struct InteractionState {
    pub router: Arc<EventRouter>,
    pub presenter: Arc<DiscordPresenter>,
    pub public_key: String,
    pub response_deadline: Duration,
}

impl InteractionState {
    pub fn new(router: Arc<EventRouter>, presenter: Arc<DiscordPresenter>, public_key: impl Into<String>) -> Self {
        Self {
            router,
            presenter,
            public_key: public_key.into(),
            response_deadline: RESPONSE_DEADLINE,
        }
    }
}

pub fn build_router(state: Arc<InteractionState>) -> Router {
    Router::new()
        .route("/interactions", post(handle_interaction))
        .route("/health", get(health_check))
        .with_state(state)
}

pub async fn run_server(address: &str, state: Arc<InteractionState>) -> std::io::Result<()> {
    let listener = match tokio::net::TcpListener::bind(address).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind to {}: {} - is another instance running?", address, e);
            return Err(e);
        }
    };
    info!("Interaction endpoint listening on {}", address);
    axum::serve(listener, build_router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(std::io::Error::other)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}

pub async fn health_check(State(state): State<Arc<InteractionState>>) -> (StatusCode, Json<serde_json::Value>) {
    let tickets = state.router.service().tickets().await;
    let pending_closes = state.router.service().scheduler().pending_count().await;
    (
        StatusCode::OK,
        Json(serde_json::json!({
            "status": "ok",
            "service": "ticketdesk",
            "version": env!("CARGO_PKG_VERSION"),
            "active_tickets": tickets.len(),
            "pending_closes": pending_closes
        })),
    )
}

async fn handle_interaction(
    State(state): State<Arc<InteractionState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    let (Some(signature), Some(timestamp)) = (header("x-signature-ed25519"), header("x-signature-timestamp")) else {
        return (StatusCode::UNAUTHORIZED, "missing request signature").into_response();
    };
    if !verify_signature(&state.public_key, signature, timestamp, &body) {
        warn!("Rejected interaction with invalid signature");
        return (StatusCode::UNAUTHORIZED, "invalid request signature").into_response();
    }

    let interaction: Interaction = match serde_json::from_slice(&body) {
        Ok(i) => i,
        Err(e) => {
            warn!("Malformed interaction payload: {e}");
            return (StatusCode::BAD_REQUEST, "malformed interaction").into_response();
        }
    };

    if interaction.kind == PING {
        debug!("Answering interaction ping");
        return Json(InteractionResponse::pong()).into_response();
    }

    let Some(event) = interaction.to_event() else {
        debug!("Interaction {} has no guild member, ignoring", interaction.id);
        return Json(InteractionResponse::message(MessagePayload::ephemeral(
            "This only works inside the server.",
        )))
        .into_response();
    };

    let mut rx = state.presenter.begin(&interaction.id).await;

    let router = Arc::clone(&state.router);
    let presenter = Arc::clone(&state.presenter);
    let interaction_id = interaction.id.clone();
    tokio::spawn(async move {
        router.route(event).await;
        presenter.finish(&interaction_id).await;
    });

    if let Ok(Ok(response)) = tokio::time::timeout(state.response_deadline, &mut rx).await {
        return Json(response).into_response();
    }

    let response = match state
        .presenter
        .take_unanswered(&interaction.id, interaction.kind)
        .await
    {
        Some(ack) => {
            debug!("Interaction {} still running, deferring", interaction.id);
            ack
        }
        None => rx
            .try_recv()
            .unwrap_or_else(|_| InteractionResponse::acknowledge(interaction.kind)),
    };
    Json(response).into_response()
}
