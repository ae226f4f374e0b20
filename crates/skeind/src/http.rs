//! HTTP front-end.
//!
//! Thin glue over [`ConsistentStore`]:
//!
//! - `GET /{key}`: read a value
//! - `POST /{key}`: store the request body
//! - `DELETE /{key}`: delete a key
//! - `GET /stat/{key}`: the key's inode as JSON
//! - `GET /leader/{key}`: the key's leader and replicas as JSON
//! - `GET /log/{key}`: the leader's transaction chain for the key as JSON
//!
//! Every call accepts `?consistency=leader|lazy|all&fallback=true`. Successful
//! key operations carry a `Response-Time` header (milliseconds) and a `Vnode`
//! header naming the vnode that served them.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use skein_engine::{ConsistentStore, EngineError};
use skein_store::{StoreError, VnodeStore};
use skein_txlog::Tx;
use skein_types::{Consistency, Inode, LeaderInfo, RequestOptions, ResponseMeta, Vnode};
use tracing::{debug, info};

const RESPONSE_TIME: HeaderName = HeaderName::from_static("response-time");
const VNODE: HeaderName = HeaderName::from_static("vnode");

#[derive(Clone)]
struct AppState {
    store: Arc<ConsistentStore>,
}

/// HTTP server backed by a [`ConsistentStore`].
pub struct HttpServer {
    router: Router,
}

impl HttpServer {
    pub fn new(store: Arc<ConsistentStore>) -> Self {
        let state = AppState { store };
        let router = Router::new()
            .route("/{key}", get(get_value).post(set_value).delete(delete_value))
            .route("/stat/{key}", get(stat_key))
            .route("/leader/{key}", get(leader_of))
            .route("/log/{key}", get(log_of))
            .layer(DefaultBodyLimit::max(256 * 1024 * 1024))
            .with_state(state);
        Self { router }
    }

    /// The inner [`Router`], for driving with `tower::ServiceExt` in tests.
    pub fn into_router(self) -> Router {
        self.router
    }

    /// Serve until `shutdown` completes, then finish in-flight requests.
    pub async fn serve_with_shutdown(
        self,
        addr: &str,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> Result<(), std::io::Error> {
        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!(addr, "HTTP front-end listening");
        axum::serve(listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
    }
}

// -----------------------------------------------------------------------
// Request options
// -----------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ConsistencyParam {
    Leader,
    Lazy,
    All,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OptionsQuery {
    consistency: Option<ConsistencyParam>,
    fallback: bool,
}

impl From<OptionsQuery> for RequestOptions {
    fn from(q: OptionsQuery) -> Self {
        let consistency = match q.consistency {
            None | Some(ConsistencyParam::Leader) => Consistency::Leader,
            Some(ConsistencyParam::Lazy) => Consistency::Lazy,
            Some(ConsistencyParam::All) => Consistency::All,
        };
        RequestOptions {
            consistency,
            read_fallback: q.fallback,
        }
    }
}

fn meta_headers(meta: &ResponseMeta) -> [(HeaderName, HeaderValue); 2] {
    let millis = format!("{:.3}", meta.elapsed.as_secs_f64() * 1000.0);
    let value = |s: String| HeaderValue::from_str(&s).unwrap_or(HeaderValue::from_static("-"));
    [
        (RESPONSE_TIME, value(millis)),
        (VNODE, value(meta.vnode.short_id())),
    ]
}

// -----------------------------------------------------------------------
// JSON views
// -----------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
pub struct VnodeView {
    pub id: String,
    pub host: String,
}

impl From<&Vnode> for VnodeView {
    fn from(vn: &Vnode) -> Self {
        Self {
            id: vn.id.to_string(),
            host: vn.host.clone(),
        }
    }
}

/// An inode with hex block references.
#[derive(Debug, Serialize, Deserialize)]
pub struct InodeView {
    pub key: String,
    pub size: u64,
    pub inline: bool,
    pub blocks: Vec<String>,
    pub vnode: Option<VnodeView>,
}

impl InodeView {
    fn new(inode: &Inode, vnode: Option<&Vnode>) -> Self {
        Self {
            key: String::from_utf8_lossy(&inode.id).into_owned(),
            size: inode.size,
            inline: inode.inline,
            blocks: inode.block_ids().iter().map(ToString::to_string).collect(),
            vnode: vnode.map(VnodeView::from),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LeaderView {
    pub leader: VnodeView,
    pub replicas: Vec<VnodeView>,
}

impl From<&LeaderInfo> for LeaderView {
    fn from(info: &LeaderInfo) -> Self {
        Self {
            leader: VnodeView::from(&info.leader),
            replicas: info.replicas.iter().map(VnodeView::from).collect(),
        }
    }
}

/// A transaction without its payload.
#[derive(Debug, Serialize, Deserialize)]
pub struct TxView {
    pub key: String,
    pub hash: String,
    pub prev_hash: String,
    pub height: u64,
    pub timestamp: u64,
    pub data_hash: String,
    pub source: String,
}

impl From<&Tx> for TxView {
    fn from(tx: &Tx) -> Self {
        Self {
            key: String::from_utf8_lossy(&tx.key).into_owned(),
            hash: tx.hash().to_string(),
            prev_hash: tx.prev_hash.to_string(),
            height: tx.height,
            timestamp: tx.timestamp,
            data_hash: hex::encode(tx.data_hash()),
            source: hex::encode(&tx.source),
        }
    }
}

// -----------------------------------------------------------------------
// Handlers
// -----------------------------------------------------------------------

async fn get_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<OptionsQuery>,
) -> Result<Response, HttpError> {
    let (data, meta) = state.store.get(key.as_bytes(), q.into()).await?;
    debug!(%key, size = data.len(), vnode = %meta.vnode, "get");
    Ok((meta_headers(&meta), data).into_response())
}

async fn set_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<OptionsQuery>,
    body: Bytes,
) -> Result<Response, HttpError> {
    let meta = state.store.set(key.as_bytes(), body, q.into()).await?;
    Ok((StatusCode::CREATED, meta_headers(&meta)).into_response())
}

async fn delete_value(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<OptionsQuery>,
) -> Result<Response, HttpError> {
    let meta = state.store.delete(key.as_bytes(), q.into()).await?;
    Ok((StatusCode::NO_CONTENT, meta_headers(&meta)).into_response())
}

async fn stat_key(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Query(q): Query<OptionsQuery>,
) -> Result<Response, HttpError> {
    let (inode, meta) = state.store.stat(key.as_bytes(), q.into()).await?;
    let view = InodeView::new(&inode, Some(&meta.vnode));
    Ok((meta_headers(&meta), Json(view)).into_response())
}

async fn leader_of(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<LeaderView>, HttpError> {
    let info = state.store.lookup_leader(key.as_bytes())?;
    Ok(Json(LeaderView::from(&info)))
}

async fn log_of(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<Vec<TxView>>, HttpError> {
    let info = state.store.lookup_leader(key.as_bytes())?;
    let store = state.store.transport().store_for(&info.leader);
    let chain = store
        .transactions(key.as_bytes(), None)
        .await?
        .map(|tx| tx.map(|tx| TxView::from(&tx)))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Json(chain))
}

// -----------------------------------------------------------------------
// Errors
// -----------------------------------------------------------------------

/// Failure of an HTTP call, rendered as a JSON `{"error": ...}` body.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl HttpError {
    fn status_code(&self) -> StatusCode {
        match self {
            Self::Engine(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Engine(EngineError::EmptyPreferenceList { .. }) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Engine(e) if e.is_unavailable() => StatusCode::SERVICE_UNAVAILABLE,
            Self::Store(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Store(StoreError::Unavailable(_)) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::warn!(%status, error = %self, "request failed");
        }
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
