//! Request handlers for the API endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;

use super::AppState;
use super::types::{ErrorResponse, RowRange, TableInfo, TableResponse};
use crate::sim::summary::RunSummary;

fn error(status: StatusCode, message: String) -> (StatusCode, Json<ErrorResponse>) {
    (status, Json(ErrorResponse { error: message }))
}

/// `GET /summary` → 200 + `RunSummary` JSON
pub async fn get_summary(State(state): State<Arc<AppState>>) -> Json<RunSummary> {
    Json(state.summary.clone())
}

/// `GET /tables` → 200 + `Vec<TableInfo>` JSON, default tables first
pub async fn list_tables(State(state): State<Arc<AppState>>) -> Json<Vec<TableInfo>> {
    Json(state.results.tables().map(TableInfo::from).collect())
}

/// Returns the rows of one table, optionally restricted to a row range.
///
/// `GET /tables/{name}` → 200 + `TableResponse` JSON
/// `GET /tables/{name}?from=N&to=M` → rows N..=M
/// `GET /tables/{name}?from=10&to=5` → 400 + `ErrorResponse`
/// Unknown `name` → 404 + `ErrorResponse`
pub async fn get_table(
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(range): Query<RowRange>,
) -> impl IntoResponse {
    let from = range.from.unwrap_or(0);
    let to = range.to.unwrap_or(usize::MAX);
    if from > to {
        return Err(error(
            StatusCode::BAD_REQUEST,
            format!("`from` ({from}) must be <= `to` ({to})"),
        ));
    }

    let Some(table) = state.results.table(&name) else {
        return Err(error(
            StatusCode::NOT_FOUND,
            format!("table \"{name}\" does not exist"),
        ));
    };

    Ok(Json(TableResponse {
        name: table.name().to_string(),
        columns: table.columns().to_vec(),
        rows: table.slice(from, to.saturating_add(1)).to_vec(),
    }))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::Request;
    use tower::util::ServiceExt;

    use super::*;
    use crate::api::router;
    use crate::config::RunConfig;
    use crate::runner::run_scripted;

    fn make_test_state() -> Arc<AppState> {
        let outcome = run_scripted(&RunConfig::single_zone().unwrap()).unwrap();
        Arc::new(AppState {
            summary: outcome.engine.summary(),
            results: outcome.engine.materialize().unwrap(),
        })
    }

    async fn get_json(uri: &str) -> (StatusCode, serde_json::Value) {
        let app = router(make_test_state());
        let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
        let resp = app.oneshot(req).await.unwrap();
        let status = resp.status();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[tokio::test]
    async fn summary_returns_200() {
        let (status, json) = get_json("/summary").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["global_steps"], 96);
        assert_eq!(json["exit_status"], 0);
    }

    #[tokio::test]
    async fn tables_lists_defaults_then_views() {
        let (status, json) = get_json("/tables").await;
        assert_eq!(status, StatusCode::OK);
        let names: Vec<&str> = json
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names.first(), Some(&"var"));
        assert_eq!(names.last(), Some(&"hourly_comfort"));
    }

    #[tokio::test]
    async fn table_range_query() {
        let (status, json) = get_json("/tables/var?from=5&to=10").await;
        assert_eq!(status, StatusCode::OK);
        let rows = json["rows"].as_array().unwrap();
        assert_eq!(rows.len(), 6);
        assert_eq!(rows[0]["global_step"], 6);
    }

    #[tokio::test]
    async fn unknown_table_returns_404() {
        let (status, json) = get_json("/tables/nope").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(json.get("error").is_some());
    }

    #[tokio::test]
    async fn invalid_range_returns_400() {
        let (status, _) = get_json("/tables/var?from=10&to=5").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
