use crate::models;
use anyhow::Result;
use sqlx::sqlite::SqlitePool;

/// Read side of the local document store the producer writes into.
///
/// Open it once at startup and pass it to whoever needs it; call `close`
/// before exiting so pending connections shut down cleanly.
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> Result<Self> {
        use sqlx::sqlite::SqliteConnectOptions;
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    /// Opens a database that must already exist; nothing is created.
    pub async fn open_existing(database_url: &str) -> Result<Self> {
        use sqlx::sqlite::SqliteConnectOptions;
        use std::str::FromStr;

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(false);

        let pool = SqlitePool::connect_with(options).await?;
        Ok(Self { pool })
    }

    pub async fn run_migrations(&self) -> Result<()> {
        let schema = include_str!("../schema.sql");
        sqlx::query(schema).execute(&self.pool).await?;
        Ok(())
    }

    pub async fn get_schedules(&self) -> Result<Vec<models::ScheduleEvent>> {
        let rows = sqlx::query_as::<_, models::ScheduleRow>(
            "SELECT type AS kind, scheduled_date, location, meeting_link, subject, processed_at
             FROM schedules
             ORDER BY scheduled_date DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(models::ScheduleEvent::from).collect())
    }

    pub async fn get_email_summaries(&self) -> Result<Vec<models::EmailSummary>> {
        let summaries = sqlx::query_as::<_, models::EmailSummary>(
            "SELECT id, subject, summary, category FROM emails ORDER BY date DESC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    /// Case-insensitive match against subject or sender, newest first.
    /// `%` and `_` in `query` match themselves.
    pub async fn search_email_summaries(
        &self,
        query: &str,
        limit: i64,
    ) -> Result<Vec<models::EmailSummary>> {
        let pattern = contains_pattern(query);
        let summaries = sqlx::query_as::<_, models::EmailSummary>(
            "SELECT id, subject, summary, category FROM emails
             WHERE subject LIKE ? ESCAPE '\\' OR sender LIKE ? ESCAPE '\\'
             ORDER BY date DESC
             LIMIT ?",
        )
        .bind(&pattern)
        .bind(&pattern)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(summaries)
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

/// `LIKE` pattern for "contains `term`", escaped with `\`.
fn contains_pattern(term: &str) -> String {
    let mut pattern = String::with_capacity(term.len() + 2);
    pattern.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EventKind;

    async fn open(dir: &tempfile::TempDir) -> Database {
        let url = format!("sqlite:{}", dir.path().join("dash.db").display());
        let db = Database::new(&url).await.unwrap();
        db.run_migrations().await.unwrap();
        db
    }

    async fn insert_email(db: &Database, id: &str, subject: &str, sender: &str, date: &str) {
        sqlx::query(
            "INSERT INTO emails (id, subject, sender, date, category, summary) VALUES (?, ?, ?, ?, 'work', 'sum')",
        )
        .bind(id)
        .bind(subject)
        .bind(sender)
        .bind(date)
        .execute(&db.pool)
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_schedules_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;
        sqlx::query(
            "INSERT INTO schedules (type, scheduled_date, subject) VALUES
             ('exam', '2024-03-02T09:00:00', 'Midterm'),
             ('party', '2024-03-05T09:00:00', NULL)",
        )
        .execute(&db.pool)
        .await
        .unwrap();

        let schedules = db.get_schedules().await.unwrap();
        assert_eq!(schedules.len(), 2);
        assert_eq!(schedules[0].kind, EventKind::Other);
        assert_eq!(schedules[0].subject, "Untitled Event");
        assert_eq!(schedules[1].kind, EventKind::Exam);
        assert_eq!(schedules[1].subject, "Midterm");
        db.close().await;
    }

    #[tokio::test]
    async fn test_email_summaries_and_search() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;
        insert_email(&db, "1", "Invoice March", "billing@acme.com", "2024-03-01").await;
        insert_email(&db, "2", "Team lunch", "boss@acme.com", "2024-03-05").await;

        let all = db.get_email_summaries().await.unwrap();
        let ids: Vec<_> = all.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);

        let found = db.search_email_summaries("billing", 10).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subject.as_deref(), Some("Invoice March"));

        assert_eq!(db.search_email_summaries("acme", 1).await.unwrap().len(), 1);
        db.close().await;
    }

    #[tokio::test]
    async fn test_search_escapes_like_wildcards() {
        let dir = tempfile::tempdir().unwrap();
        let db = open(&dir).await;
        insert_email(&db, "1", "Save 100% now", "deals@shop.com", "2024-03-01").await;
        insert_email(&db, "2", "Quarterly report", "first_last@corp.com", "2024-03-02").await;
        insert_email(&db, "3", "1000 reasons", "spam@junk.com", "2024-03-03").await;

        let percent = db.search_email_summaries("100%", 10).await.unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].id, "1");

        let underscore = db.search_email_summaries("t_l", 10).await.unwrap();
        assert_eq!(underscore.len(), 1);
        assert_eq!(underscore[0].id, "2");
        db.close().await;
    }

    #[test]
    fn test_contains_pattern() {
        assert_eq!(contains_pattern("acme"), "%acme%");
        assert_eq!(contains_pattern(r"50%_off\"), r"%50\%\_off\\%");
    }
}
