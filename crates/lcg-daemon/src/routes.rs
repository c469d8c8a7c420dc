//! Read-only HTTP surface: liveness, the latest background-job results and a
//! live SSE feed of guard events. `main.rs` attaches middleware; tests drive
//! the bare router.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::{
    api_types::{HealthResponse, StreamQuery},
    state::{uptime_secs, AppState, BusMsg, StatusSnapshot},
};

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/health", get(health))
        .route("/v1/status", get(status))
        .route("/v1/stream", get(stream))
        .with_state(state)
}

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Json<HealthResponse> {
    let config_hash = st.status.read().await.config_hash.clone();
    Json(HealthResponse {
        ok: true,
        service: st.build.service.to_string(),
        version: st.build.version.to_string(),
        config_hash,
    })
}

pub(crate) async fn status(State(st): State<Arc<AppState>>) -> Json<StatusSnapshot> {
    let mut snap = st.status.read().await.clone();
    snap.daemon_uptime_secs = uptime_secs();
    Json(snap)
}

pub(crate) async fn stream(
    State(st): State<Arc<AppState>>,
    Query(q): Query<StreamQuery>,
) -> Response {
    let events = bus_events(&st, q.wanted());
    let mut resp = Sse::new(events).keep_alive(KeepAlive::new()).into_response();
    resp.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    resp
}

/// Subscribe to the bus and render each message as a named SSE event.
/// Lagged receivers skip what they missed.
fn bus_events(
    st: &AppState,
    wanted: Option<Vec<String>>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    BroadcastStream::new(st.bus.subscribe()).filter_map(move |msg| {
        let keep = match (&msg, &wanted) {
            (Ok(m), Some(names)) => names.iter().any(|n| n == m.event_name()),
            (Ok(_), None) => true,
            (Err(_), _) => false,
        };
        async move {
            let m: BusMsg = msg.ok().filter(|_| keep)?;
            let data = serde_json::to_string(&m).ok()?;
            Some(Ok(Event::default().event(m.event_name()).data(data)))
        }
    })
}
