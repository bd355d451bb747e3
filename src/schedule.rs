use crate::client::BackendClient;
use crate::db::Database;
use crate::models::{EventKind, ScheduleEvent};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// How many upcoming events the dashboard lists.
pub const UPCOMING_LIMIT: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TypeFilter {
    #[default]
    All,
    Only(EventKind),
}

/// Events at or after `now`, soonest first, at most `limit`. Events without
/// a readable date are dropped.
pub fn upcoming(events: &[ScheduleEvent], now: DateTime<Utc>, limit: usize) -> Vec<ScheduleEvent> {
    let mut dated: Vec<(DateTime<Utc>, &ScheduleEvent)> = events
        .iter()
        .filter_map(|e| e.when().map(|when| (when, e)))
        .filter(|(when, _)| *when >= now)
        .collect();
    dated.sort_by_key(|(when, _)| *when);
    dated
        .into_iter()
        .take(limit)
        .map(|(_, e)| e.clone())
        .collect()
}

/// Where the events panel reads schedules from: the local document store
/// when its database exists, the producer API otherwise.
pub enum ScheduleSource {
    Local(Database),
    Backend(Arc<BackendClient>),
}

impl ScheduleSource {
    pub async fn connect(database_url: &str, client: Arc<BackendClient>) -> Self {
        match Database::open_existing(database_url).await {
            Ok(db) => {
                tracing::info!(database = database_url, "reading schedules from local store");
                Self::Local(db)
            }
            Err(e) => {
                tracing::info!(error = %e, "local store unavailable, reading schedules from backend");
                Self::Backend(client)
            }
        }
    }

    pub async fn load(&self) -> Result<Vec<ScheduleEvent>> {
        match self {
            Self::Local(db) => db.get_schedules().await,
            Self::Backend(client) => Ok(client.schedules().await?),
        }
    }

    pub async fn close(&self) {
        if let Self::Local(db) = self {
            db.close().await;
        }
    }
}

pub fn filter_by_type(events: &[ScheduleEvent], filter: TypeFilter) -> Vec<ScheduleEvent> {
    events
        .iter()
        .filter(|e| match filter {
            TypeFilter::All => true,
            TypeFilter::Only(kind) => e.kind == kind,
        })
        .cloned()
        .collect()
}

pub fn event_icon(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Exam => "📝",
        EventKind::Meeting => "👥",
        EventKind::Assignment => "⏰",
        EventKind::Interview => "🤝",
        EventKind::Other => "📅",
    }
}
