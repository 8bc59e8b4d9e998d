//! Development server (`drudge serve`).
//!
//! Serves the final tree with `tower-http`'s `ServeDir` and, with live reload
//! on, streams build events to browsers:
//!
//! | Path | Response |
//! |------|----------|
//! | `/__drudge/reload` | Server-sent events; a `reload` event per successful build |
//! | `/__drudge/livereload.js` | Client script subscribing to the stream |
//! | anything else | File from `dist_path`; HTML gets the client script injected |

use crate::orchestrator::Orchestrator;
use crate::watch::{self, BuildEvent, WatchError};
use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::future::IntoFuture;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tower_http::services::ServeDir;

pub const RELOAD_PATH: &str = "/__drudge/reload";
pub const SCRIPT_PATH: &str = "/__drudge/livereload.js";

const CLIENT_SCRIPT: &str = r#"(function () {
  var source = new EventSource("/__drudge/reload");
  source.addEventListener("reload", function () {
    window.location.reload();
  });
})();
"#;

#[derive(Error, Debug)]
pub enum ServeError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Watch(#[from] WatchError),
}

/// The server's routes for `dist`, fed by `events`.
pub fn router(dist: PathBuf, events: broadcast::Sender<BuildEvent>, live_reload: bool) -> Router {
    let files = Router::new()
        .fallback_service(ServeDir::new(dist).append_index_html_on_directories(true));
    if !live_reload {
        return files;
    }
    Router::new()
        .route(RELOAD_PATH, get(reload_stream))
        .route(SCRIPT_PATH, get(client_script))
        .with_state(events)
        .merge(files.layer(middleware::from_fn(inject_live_reload)))
}

async fn reload_stream(
    State(events): State<broadcast::Sender<BuildEvent>>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!("live-reload client connected");
    let stream = BroadcastStream::new(events.subscribe()).filter_map(|msg| async move {
        match msg {
            Ok(BuildEvent::Succeeded { run }) => {
                Some(Ok(Event::default().event("reload").data(run.to_string())))
            }
            Ok(BuildEvent::Failed { .. }) => None,
            Err(e) => {
                tracing::warn!("live-reload receiver lagged: {e}");
                None
            }
        }
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn client_script() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/javascript; charset=utf-8")],
        CLIENT_SCRIPT,
    )
}

async fn inject_live_reload(request: Request, next: Next) -> Response {
    let response = next.run(request).await;
    let is_html = response
        .headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.starts_with("text/html"));
    if !is_html {
        return response;
    }
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::error!("failed to read response body: {e}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    let html = inject_script(&String::from_utf8_lossy(&bytes));
    parts.headers.remove(header::CONTENT_LENGTH);
    Response::from_parts(parts, Body::from(html))
}

/// Insert the client script tag before the closing `</body>`, or at the end
/// when there is none.
pub fn inject_script(html: &str) -> String {
    let tag = format!(r#"<script src="{SCRIPT_PATH}"></script>"#);
    match html.to_ascii_lowercase().rfind("</body>") {
        Some(at) => format!("{}{tag}{}", &html[..at], &html[at..]),
        None => format!("{html}{tag}"),
    }
}

/// Build, then serve `dist_path` while rebuilding on change.
pub async fn serve(orchestrator: Orchestrator) -> Result<(), ServeError> {
    let config = orchestrator.config();
    let server = &config.server;
    let addr = format!("{}:{}", server.host, server.port);
    let (events, _) = broadcast::channel(16);
    let app = router(config.dist_path.clone(), events.clone(), server.live_reload);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.clone(),
            source,
        })?;
    tracing::info!(dist = %config.dist_path.display(), "serving at http://{addr}");

    let watcher = watch::watch(orchestrator.clone(), events);
    tokio::select! {
        served = axum::serve(listener, app).into_future() => served?,
        watched = watcher => watched?,
    }
    Ok(())
}
