//! HTTP API over the data store
//!
//! Routes:
//! - `GET /users`, `GET /users/query?name=..&uid=..&gid=..&comment=..&home=..&shell=..`
//! - `GET /users/:uid`, `GET /users/:uid/groups`
//! - `GET /groups`, `GET /groups/query?name=..&gid=..&member=..[&member=..]`
//! - `GET /groups/:gid`
//! - `GET /health`, `POST /reload`
//!
//! List routes answer 404 when nothing matches. By-id routes answer 404 when
//! the id is unknown or ambiguous.

use anyhow::Result;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::dataset::Criteria;
use crate::error::StoreError;
use crate::record::{Record, RecordType};
use crate::store::{DataStore, TypeStatus};

/// Shared state of the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<DataStore>,
}

/// Error returned by handlers, rendered as a status code and message
#[derive(Debug)]
pub enum ApiError {
    Store(StoreError),
    NotFound(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        ApiError::Store(err)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(err) if err.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            ApiError::Store(err) => {
                if status.is_server_error() {
                    log::error!("Request failed: {}", err);
                } else {
                    log::debug!("Rejected request: {}", err);
                }
                err.to_string()
            }
            ApiError::NotFound(msg) => msg,
        };
        (status, message).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

/// Build the router for `store`
pub fn router(store: Arc<DataStore>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/users", get(handle_users))
        .route("/users/query", get(handle_users_query))
        .route("/users/:uid", get(handle_user_by_uid))
        .route("/users/:uid/groups", get(handle_user_groups))
        .route("/groups", get(handle_groups))
        .route("/groups/query", get(handle_groups_query))
        .route("/groups/:gid", get(handle_group_by_gid))
        .route("/health", get(handle_health))
        .route("/reload", post(handle_reload))
        .layer(cors)
        .with_state(AppState { store })
}

/// Bind `host:port` and serve until the process exits
pub async fn serve(store: Arc<DataStore>, host: &str, port: u16) -> Result<()> {
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", addr, e))?;

    log::info!("Server listening on {}", addr);

    axum::serve(listener, router(store))
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    Ok(())
}

fn non_empty(records: Vec<Arc<Record>>) -> ApiResult<Vec<Arc<Record>>> {
    if records.is_empty() {
        return Err(ApiError::NotFound("No results found.".to_string()));
    }
    Ok(Json(records))
}

fn unique(records: Vec<Arc<Record>>, what: &str) -> ApiResult<Arc<Record>> {
    let mut iter = records.into_iter();
    match (iter.next(), iter.next()) {
        (Some(record), None) => Ok(Json(record)),
        (None, _) => Err(ApiError::NotFound(format!("No {} found.", what))),
        (Some(_), Some(_)) => Err(ApiError::NotFound(format!(
            "Invalid number of results for {}.",
            what
        ))),
    }
}

fn criteria(params: Vec<(String, String)>) -> Criteria {
    params.into_iter().collect()
}

async fn handle_users(State(state): State<AppState>) -> ApiResult<Vec<Arc<Record>>> {
    log::info!("GET /users");
    non_empty(state.store.lookup(RecordType::Account, None)?)
}

async fn handle_users_query(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Vec<Arc<Record>>> {
    log::info!("GET /users/query {:?}", params);
    non_empty(state.store.query(RecordType::Account, &criteria(params))?)
}

async fn handle_user_by_uid(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Arc<Record>> {
    log::info!("GET /users/{}", uid);
    let found = state.store.lookup(RecordType::Account, Some(("uid", uid.as_str())))?;
    unique(found, &format!("user with uid {}", uid))
}

async fn handle_user_groups(
    State(state): State<AppState>,
    Path(uid): Path<String>,
) -> ApiResult<Vec<Arc<Record>>> {
    log::info!("GET /users/{}/groups", uid);
    match state.store.groups_for_user(&uid)? {
        Some(groups) => non_empty(groups),
        None => Err(ApiError::NotFound(format!("No user found with uid {}.", uid))),
    }
}

async fn handle_groups(State(state): State<AppState>) -> ApiResult<Vec<Arc<Record>>> {
    log::info!("GET /groups");
    non_empty(state.store.lookup(RecordType::Group, None)?)
}

async fn handle_groups_query(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> ApiResult<Vec<Arc<Record>>> {
    log::info!("GET /groups/query {:?}", params);
    non_empty(state.store.query(RecordType::Group, &criteria(params))?)
}

async fn handle_group_by_gid(
    State(state): State<AppState>,
    Path(gid): Path<String>,
) -> ApiResult<Arc<Record>> {
    log::info!("GET /groups/{}", gid);
    let found = state.store.lookup(RecordType::Group, Some(("gid", gid.as_str())))?;
    unique(found, &format!("group with gid {}", gid))
}

async fn handle_health(State(state): State<AppState>) -> impl IntoResponse {
    let status = state.store.status();
    let code = if status.iter().all(|s| s.available) {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(status))
}

async fn handle_reload(State(state): State<AppState>) -> Json<Vec<TypeStatus>> {
    log::info!("POST /reload");
    let store = state.store.clone();
    // Reading files blocks; keep it off the async workers
    let status = tokio::task::spawn_blocking(move || {
        store.reload_all();
        store.status()
    })
    .await;

    match status {
        Ok(status) => Json(status),
        Err(e) => {
            log::error!("Reload task failed: {}", e);
            Json(state.store.status())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn state() -> (TempDir, AppState) {
        let temp = TempDir::new().unwrap();
        fs::write(
            temp.path().join("passwd"),
            "root:x:0:0:root:/root:/bin/bash\n\
             alice:x:1000:1000:Alice:/home/alice:/bin/zsh\n\
             twin:x:1000:1000:Twin:/home/twin:/bin/zsh\n\
             bob:x:1001:1001:Bob:/home/bob:/bin/bash\n",
        )
        .unwrap();
        fs::write(
            temp.path().join("group"),
            "root:x:0:\ntest_users:x:999:AAAA,BBBB,CCCC\nbob:x:1001:\nwheel:x:10:bob\n",
        )
        .unwrap();
        let store = DataStore::with_paths(temp.path().join("passwd"), temp.path().join("group"));
        (
            temp,
            AppState {
                store: Arc::new(store),
            },
        )
    }

    fn params(pairs: &[(&str, &str)]) -> Query<Vec<(String, String)>> {
        Query(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn test_groups_query_member_subset() {
        let (_temp, state) = state();

        let Json(groups) = handle_groups_query(
            State(state.clone()),
            params(&[("gid", "999"), ("member", "AAAA"), ("member", "BBBB")]),
        )
        .await
        .unwrap();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name(), "test_users");

        let err = handle_groups_query(
            State(state),
            params(&[("gid", "999"), ("member", "AAAA"), ("member", "ZZZZ")]),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unknown_field_is_bad_request() {
        let (_temp, state) = state();
        let err = handle_users_query(State(state), params(&[("members", "x")]))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_user_by_uid() {
        let (_temp, state) = state();

        let Json(user) = handle_user_by_uid(State(state.clone()), Path("0".to_string()))
            .await
            .unwrap();
        assert_eq!(user.name(), "root");

        let err = handle_user_by_uid(State(state.clone()), Path("4242".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);

        // Two accounts share uid 1000
        let err = handle_user_by_uid(State(state), Path("1000".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_user_groups() {
        let (_temp, state) = state();
        let Json(groups) = handle_user_groups(State(state), Path("1001".to_string()))
            .await
            .unwrap();
        let names: Vec<&str> = groups.iter().map(|g| g.name()).collect();
        assert_eq!(names, vec!["bob", "wheel"]);
    }

    #[tokio::test]
    async fn test_missing_source_is_server_error() {
        let (temp, state) = state();
        fs::remove_file(temp.path().join("group")).unwrap();
        state.store.reload(RecordType::Group);

        let err = handle_groups(State(state.clone())).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);

        // Accounts keep working
        let Json(users) = handle_users(State(state)).await.unwrap();
        assert_eq!(users.len(), 4);
    }

    #[tokio::test]
    async fn test_reload_endpoint_reports_status() {
        let (temp, state) = state();
        fs::write(temp.path().join("group"), "solo:x:1:\n").unwrap();

        let Json(status) = handle_reload(State(state.clone())).await;
        assert_eq!(status.len(), 2);
        assert_eq!(status[1].record_type, RecordType::Group);
        assert_eq!(status[1].records, 1);

        let Json(group) = handle_group_by_gid(State(state), Path("1".to_string()))
            .await
            .unwrap();
        assert_eq!(group.name(), "solo");
    }

    #[test]
    fn test_record_json_body() {
        let record = crate::record::parse_line(RecordType::Group, "g:x:5:a,b").unwrap();
        let body = serde_json::to_string(&vec![Arc::new(record)]).unwrap();
        assert_eq!(body, r#"[{"name":"g","gid":"5","members":"a,b"}]"#);
    }
}
