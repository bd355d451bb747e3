use clap::Parser;
use sqlx::Row;
use sqlx::sqlite::SqlitePoolOptions;

/// Looks up stored emails (or schedules) in the maildash database.
#[derive(Parser)]
#[command(name = "inspect_db")]
struct Args {
    /// Matched against sender and subject (or schedule subject)
    query: String,

    #[arg(long, default_value = "sqlite://maildash.db")]
    database_url: String,

    /// Search the schedules table instead of emails
    #[arg(long)]
    schedules: bool,

    #[arg(long, default_value_t = 5)]
    limit: i64,
}

const RULE: &str =
    "--------------------------------------------------------------------------------";

/// `%` and `_` in the query are matched literally.
fn like_contains(query: &str) -> String {
    let escaped: String = query
        .chars()
        .flat_map(|c| match c {
            '%' | '_' | '\\' => vec!['\\', c],
            _ => vec![c],
        })
        .collect();
    format!("%{}%", escaped)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let search_term = like_contains(&args.query);

    let pool = SqlitePoolOptions::new()
        .connect(&args.database_url)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to connect to database: {}", e))?;

    if args.schedules {
        let rows = sqlx::query(
            "SELECT type, scheduled_date, location, meeting_link, subject
             FROM schedules
             WHERE subject LIKE ? ESCAPE '\\'
             ORDER BY scheduled_date DESC
             LIMIT ?",
        )
        .bind(&search_term)
        .bind(args.limit)
        .fetch_all(&pool)
        .await?;

        if rows.is_empty() {
            println!("No schedules found matching '{}'", args.query);
        }
        for row in rows {
            let kind: Option<String> = row.get("type");
            let date: Option<String> = row.get("scheduled_date");
            let location: Option<String> = row.get("location");
            let link: Option<String> = row.get("meeting_link");
            let subject: Option<String> = row.get("subject");
            println!("{:?} [{:?}] {:?}", subject, kind, date);
            println!("  location: {:?}  link: {:?}", location, link);
        }
        return Ok(());
    }

    let rows = sqlx::query(
        "SELECT id, sender, subject, date, category, summary, body
         FROM emails
         WHERE sender LIKE ? ESCAPE '\\' OR subject LIKE ? ESCAPE '\\'
         ORDER BY date DESC
         LIMIT ?",
    )
    .bind(&search_term)
    .bind(&search_term)
    .bind(args.limit)
    .fetch_all(&pool)
    .await?;

    if rows.is_empty() {
        println!("No emails found matching '{}'", args.query);
    }
    for row in rows {
        let id: String = row.get("id");
        let sender: Option<String> = row.get("sender");
        let subject: Option<String> = row.get("subject");
        let date: Option<String> = row.get("date");
        let category: Option<String> = row.get("category");
        let summary: Option<String> = row.get("summary");
        let body: Option<String> = row.get("body");

        println!("ID: {}", id);
        println!("From: {:?}", sender);
        println!("Subject: {:?}", subject);
        println!("Date: {:?}", date);
        println!("Category: {:?}", category);
        println!("{}", RULE);
        println!("SUMMARY:");
        println!("{}", summary.as_deref().unwrap_or("(None)"));
        println!("{}", RULE);
        println!("BODY (Raw Debug):");
        println!("{:?}", body);
        println!("{}", RULE);
    }

    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_like_contains_escapes_wildcards() {
        assert_eq!(like_contains("acme"), "%acme%");
        assert_eq!(like_contains("100%_x"), r"%100\%\_x%");
    }
}
