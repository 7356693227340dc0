use crate::cache::{ CacheManager, CachedResponse, FetchDecision, FetchRequest };
use crate::models::worker::{ VersionReply, WorkerMessage };
use std::error::Error;
use std::net::SocketAddr;
use std::sync::Arc;
use axum::{
    body::Bytes,
    routing::{ any, get, post },
    Router,
    extract::{ State, Query },
    response::{ IntoResponse, Response },
    http::{ header, HeaderMap, Method, StatusCode },
};
use serde::{ Deserialize, Serialize };
use tokio::sync::oneshot;
use tower_http::cors::{ Any, CorsLayer };
use url::Url;
use log::{ info, error, warn };

#[derive(Deserialize)]
pub struct FetchQuery {
    pub url: String,
}

#[derive(Serialize)]
struct MessageResponse {
    success: bool,
    message: String,
}

#[derive(Clone)]
struct AppState {
    cache: Arc<CacheManager>,
}

pub fn router(cache: Arc<CacheManager>) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/api/version", get(version_handler))
        .route("/api/worker", post(worker_message_handler))
        .route("/fetch", any(fetch_handler))
        .layer(cors)
        .with_state(AppState { cache })
}

pub async fn start_http_server(
    addr: &str,
    cache: Arc<CacheManager>
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let addr = addr.parse::<SocketAddr>()?;
    info!("Starting HTTP API server on: http://{}", addr);
    let app = router(cache);

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
        error!("Failed to bind HTTP server to {}: {}. Try a different port.", addr, e);
        e
    })?;
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app.into_make_service()).await {
            error!("HTTP server error: {}", e);
        }
    });

    info!("HTTP server started");
    Ok(())
}

async fn request_version(cache: &CacheManager) -> Option<VersionReply> {
    let (tx, rx) = oneshot::channel();
    cache.handle_message(WorkerMessage::GetVersion, Some(tx)).await;
    rx.await.ok()
}

async fn version_handler(State(state): State<AppState>) -> Response {
    match request_version(&state.cache).await {
        Some(reply) => axum::Json(reply).into_response(),
        None => StatusCode::INTERNAL_SERVER_ERROR.into_response(),
    }
}

async fn worker_message_handler(
    State(state): State<AppState>,
    axum::Json(message): axum::Json<WorkerMessage>
) -> Response {
    match message {
        WorkerMessage::GetVersion => version_handler(State(state)).await,
        WorkerMessage::SkipWaiting => {
            state.cache.handle_message(WorkerMessage::SkipWaiting, None).await;
            (
                StatusCode::ACCEPTED,
                axum::Json(MessageResponse {
                    success: true,
                    message: "Skip waiting requested".into(),
                }),
            ).into_response()
        }
    }
}

async fn fetch_handler(
    State(state): State<AppState>,
    method: Method,
    Query(query): Query<FetchQuery>,
    headers: HeaderMap,
    body: Bytes
) -> Response {
    let url = match Url::parse(&query.url) {
        Ok(u) => u,
        Err(e) => {
            return (StatusCode::BAD_REQUEST, format!("Invalid url '{}': {}", query.url, e)).into_response();
        }
    };

    let mut request = FetchRequest::new(method, url);
    if let Some(accept) = headers.get(header::ACCEPT) {
        request.headers.insert(header::ACCEPT, accept.clone());
    }
    if let Some(content_type) = headers.get(header::CONTENT_TYPE) {
        request.headers.insert(header::CONTENT_TYPE, content_type.clone());
    }
    request.body = body;

    match state.cache.route_fetch(&request).await {
        FetchDecision::Respond(response) => into_http_response(response),
        FetchDecision::PassThrough => {
            match state.cache.network().fetch(&request).await {
                Ok(response) => into_http_response(response),
                Err(e) => {
                    warn!("Pass-through fetch failed: {}", e);
                    (StatusCode::BAD_GATEWAY, e.to_string()).into_response()
                }
            }
        }
    }
}

fn into_http_response(response: CachedResponse) -> Response {
    let mut headers = response.headers;
    headers.remove(header::CONTENT_LENGTH);
    headers.remove(header::TRANSFER_ENCODING);
    headers.remove(header::CONNECTION);
    (response.status, headers, response.body).into_response()
}
