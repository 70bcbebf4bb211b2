use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use log::{debug, error, info, warn};
use serde::Deserialize;
use serde_json::json;

use election_core::*;

use crate::service::export;

pub const FORWARDED_FOR: &str = "x-forwarded-for";
pub const CONNECTING_IP: &str = "cf-connecting-ip";
pub const ADMIN_TOKEN: &str = "x-admin-token";

const SUCCESS_MESSAGE: &str = "Your vote has been recorded successfully";

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<ElectionCore<MemoryStore>>,
    pub admin_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    pub search: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/cast-vote", post(cast_vote))
        .route("/results", get(results))
        .route("/healthz", get(healthz))
        .route("/admin/close", post(admin_close))
        .route("/admin/reset", post(admin_reset))
        .route("/admin/voters", get(admin_voters))
        .route("/admin/voters.csv", get(admin_voters_csv))
        .with_state(state)
}

pub async fn serve(addr: SocketAddr, state: AppState) -> std::io::Result<()> {
    let app = router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("ballotbox listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("serve: cannot listen for shutdown signal: {}", e);
            }
            info!("serve: shutting down");
        })
        .await
}

/// The origin of a request, from the proxy headers.
pub fn origin_from_headers(headers: &HeaderMap) -> String {
    let read = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
    resolve_origin(read(FORWARDED_FOR), read(CONNECTING_IP))
}

pub fn status_for(kind: RejectionKind) -> StatusCode {
    if kind.is_server_fault() {
        StatusCode::INTERNAL_SERVER_ERROR
    } else {
        StatusCode::BAD_REQUEST
    }
}

fn rejection_response(rejection: &VoteRejection) -> Response {
    (
        status_for(rejection.kind),
        Json(json!({ "error": rejection.message, "kind": rejection.kind.code() })),
    )
        .into_response()
}

// Runs a blocking core operation off the async workers.
async fn run_core<T, F>(state: &AppState, f: F) -> Result<T, VoteRejection>
where
    T: Send + 'static,
    F: FnOnce(&ElectionCore<MemoryStore>) -> Result<T, VoteRejection> + Send + 'static,
{
    let core = state.core.clone();
    match tokio::task::spawn_blocking(move || f(&core)).await {
        Ok(res) => res,
        Err(e) => {
            error!("run_core: task failed: {}", e);
            Err(VoteRejection::internal_fault())
        }
    }
}

fn check_admin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    let expected = match &state.admin_token {
        Some(t) => t,
        None => {
            return Err((
                StatusCode::FORBIDDEN,
                Json(json!({ "error": "Administration is disabled" })),
            )
                .into_response())
        }
    };
    match headers.get(ADMIN_TOKEN).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => {
            debug!("check_admin: missing or wrong admin token");
            Err((
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Invalid admin token" })),
            )
                .into_response())
        }
    }
}

async fn cast_vote(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let submission: VoteSubmission = match serde_json::from_slice(&body) {
        Ok(s) => s,
        Err(e) => {
            warn!("cast_vote: malformed request body: {}", e);
            return rejection_response(&VoteRejection::internal_fault());
        }
    };
    let origin = origin_from_headers(&headers);
    match run_core(&state, move |core| core.cast_vote(&submission, &origin)).await {
        Ok(receipt) => (
            StatusCode::OK,
            Json(json!({ "success": true, "message": SUCCESS_MESSAGE, "receipt": receipt })),
        )
            .into_response(),
        Err(rejection) => rejection_response(&rejection),
    }
}

async fn results(State(state): State<AppState>) -> Response {
    match run_core(&state, |core| core.results()).await {
        Ok(res) => (StatusCode::OK, Json(res)).into_response(),
        Err(rejection) => rejection_response(&rejection),
    }
}

async fn healthz(State(state): State<AppState>) -> Response {
    match run_core(&state, |core| core.audit()).await {
        Ok(drift) => (
            StatusCode::OK,
            Json(json!({ "status": "ok", "tallyDrift": drift })),
        )
            .into_response(),
        Err(rejection) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "status": "error", "error": rejection.message })),
        )
            .into_response(),
    }
}

async fn admin_close(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_admin(&state, &headers) {
        return denied;
    }
    match run_core(&state, |core| core.close()).await {
        Ok(outcome) => {
            info!("admin_close: {:?}", outcome);
            (
                StatusCode::OK,
                Json(json!({
                    "closed": true,
                    "alreadyClosed": outcome == CloseOutcome::AlreadyClosed
                })),
            )
                .into_response()
        }
        Err(rejection) => rejection_response(&rejection),
    }
}

async fn admin_reset(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let Err(denied) = check_admin(&state, &headers) {
        return denied;
    }
    match run_core(&state, |core| core.reset()).await {
        Ok(()) => (StatusCode::OK, Json(json!({ "success": true }))).into_response(),
        Err(rejection) => rejection_response(&rejection),
    }
}

async fn admin_voters(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    if let Err(denied) = check_admin(&state, &headers) {
        return denied;
    }
    match run_core(&state, |core| core.voters()).await {
        Ok(voters) => {
            let voters = export::filter_voters(voters, params.search.as_deref());
            (StatusCode::OK, Json(voters)).into_response()
        }
        Err(rejection) => rejection_response(&rejection),
    }
}

async fn admin_voters_csv(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SearchParams>,
) -> Response {
    if let Err(denied) = check_admin(&state, &headers) {
        return denied;
    }
    let res = run_core(&state, move |core| {
        let voters = export::filter_voters(core.voters()?, params.search.as_deref());
        let nominees = core.store().nominees().map_err(|e| {
            warn!("admin_voters_csv: {}", e);
            VoteRejection::storage_unavailable()
        })?;
        let mut buf: Vec<u8> = Vec::new();
        export::write_voters_csv(&mut buf, &voters, &nominees).map_err(|e| {
            error!("admin_voters_csv: {}", e);
            VoteRejection::internal_fault()
        })?;
        Ok(buf)
    })
    .await;
    match res {
        Ok(buf) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=\"voters.csv\"",
                ),
            ],
            buf,
        )
            .into_response(),
        Err(rejection) => rejection_response(&rejection),
    }
}
