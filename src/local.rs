//! Handlers for the local API routes. Each returns a status code and a JSON
//! body; failures never leak partial data.

use crate::db::Database;
use crate::models::Bill;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum LocalApiError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Database(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalResponse {
    pub status: u16,
    pub body: Value,
}

impl LocalResponse {
    fn ok(body: Value) -> Self {
        Self { status: 200, body }
    }

    fn error(status: u16, message: &str) -> Self {
        Self {
            status,
            body: json!({ "error": message }),
        }
    }
}

/// Everything the local routes read from.
pub struct LocalContext {
    pub bills_path: PathBuf,
    pub db: Database,
}

const DEFAULT_SEARCH_LIMIT: i64 = 20;

pub async fn route(ctx: &LocalContext, method: &str, url: &str) -> LocalResponse {
    let url = url.split('#').next().unwrap_or_default();
    let (path, query) = url.split_once('?').unwrap_or((url, ""));
    if method != "GET" {
        return LocalResponse::error(405, "Method not allowed");
    }
    match path.trim_end_matches('/') {
        "/api/bills" => bills(&ctx.bills_path).await,
        "/api/schedules" => schedules(&ctx.db).await,
        "/api/email-summaries" => match search_params(query) {
            Some((term, limit)) => search_email_summaries(&ctx.db, &term, limit).await,
            None => email_summaries(&ctx.db).await,
        },
        _ => LocalResponse::error(404, "Not found"),
    }
}

pub async fn bills(path: &Path) -> LocalResponse {
    match read_json(path).await {
        Ok(bills) => LocalResponse::ok(json!({ "bills": bills })),
        Err(e) => {
            tracing::error!(error = %e, "error reading bills");
            LocalResponse::error(500, "Failed to fetch bills")
        }
    }
}

pub async fn schedules(db: &Database) -> LocalResponse {
    let result = db
        .get_schedules()
        .await
        .map_err(LocalApiError::from)
        .and_then(|s| serde_json::to_value(s).map_err(LocalApiError::from));
    match result {
        Ok(list) => LocalResponse::ok(list),
        Err(e) => {
            tracing::error!(error = %e, "error fetching schedules");
            LocalResponse::error(500, "Failed to fetch schedules")
        }
    }
}

pub async fn email_summaries(db: &Database) -> LocalResponse {
    let result = db
        .get_email_summaries()
        .await
        .map_err(LocalApiError::from)
        .and_then(|s| serde_json::to_value(s).map_err(LocalApiError::from));
    match result {
        Ok(list) => LocalResponse::ok(list),
        Err(e) => {
            tracing::error!(error = %e, "error fetching email summaries");
            LocalResponse::error(500, "Internal Server Error")
        }
    }
}

/// Summaries whose subject or sender contains `term`.
pub async fn search_email_summaries(db: &Database, term: &str, limit: i64) -> LocalResponse {
    let result = db
        .search_email_summaries(term, limit)
        .await
        .map_err(LocalApiError::from)
        .and_then(|s| serde_json::to_value(s).map_err(LocalApiError::from));
    match result {
        Ok(list) => LocalResponse::ok(list),
        Err(e) => {
            tracing::error!(error = %e, term, "error searching email summaries");
            LocalResponse::error(500, "Internal Server Error")
        }
    }
}

/// `q` (required, non-empty) and optional `limit` from a query string.
fn search_params(query: &str) -> Option<(String, i64)> {
    let mut term = None;
    let mut limit = DEFAULT_SEARCH_LIMIT;
    for (key, value) in url::form_urlencoded::parse(query.as_bytes()) {
        match key.as_ref() {
            "q" if !value.trim().is_empty() => term = Some(value.into_owned()),
            "limit" => {
                if let Ok(n) = value.parse::<i64>() {
                    limit = n.clamp(1, 500);
                }
            }
            _ => {}
        }
    }
    term.map(|t| (t, limit))
}

async fn read_json(path: &Path) -> Result<Value, LocalApiError> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|source| LocalApiError::Io {
            path: path.to_path_buf(),
            source,
        })?;
    Ok(serde_json::from_str(&content)?)
}

/// Bills for the dashboard panel: overdue first, then pending, then paid,
/// each group by due date.
pub async fn read_bills(path: &Path) -> Result<Vec<Bill>, LocalApiError> {
    let value = read_json(path).await?;
    let mut bills = parse_bills(&value);
    bills.sort_by(|a, b| a.status.cmp(&b.status).then_with(|| a.due_date.cmp(&b.due_date)));
    Ok(bills)
}

/// Accepts a bare array or a `{ bills: [...] }` wrapper; undecodable entries
/// are skipped.
pub fn parse_bills(value: &Value) -> Vec<Bill> {
    let items = match value {
        Value::Array(items) => items,
        Value::Object(map) => match map.get("bills") {
            Some(Value::Array(items)) => items,
            _ => return Vec::new(),
        },
        _ => return Vec::new(),
    };
    items
        .iter()
        .filter_map(|item| serde_json::from_value(item.clone()).ok())
        .collect()
}
