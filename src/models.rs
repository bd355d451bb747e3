use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// A normalized, display-ready record of one processed email.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredEmail {
    pub id: String,
    pub subject: String,
    pub sender: String,
    pub date: String,
    pub body: String,
    pub category: String,
    pub processed_at: String,
    pub summary: String,
    pub has_attachments: bool,
    pub attachments: Vec<AttachmentRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AttachmentRef {
    pub filename: String,
    pub id: String,
}

/// One record as the producer sends it. Every field is optional and loosely
/// typed; `StoredEmail::from` turns it into the display model.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawEmail {
    #[serde(rename = "_id", default)]
    pub object_id: Option<Value>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub subject: Option<Value>,
    #[serde(default)]
    pub sender: Option<Value>,
    #[serde(default)]
    pub date: Option<Value>,
    #[serde(default)]
    pub body: Option<Value>,
    #[serde(default)]
    pub category: Option<Value>,
    #[serde(default)]
    pub processed_at: Option<Value>,
    #[serde(default)]
    pub summary: Option<Value>,
    #[serde(default)]
    pub has_attachments: Option<Value>,
    #[serde(default)]
    pub pdf_attachments: Option<Value>,
}

impl From<RawEmail> for StoredEmail {
    fn from(raw: RawEmail) -> Self {
        let id = text(raw.object_id.as_ref())
            .filter(|s| !s.is_empty())
            .or_else(|| text(raw.id.as_ref()))
            .unwrap_or_default();

        let attachments = match raw.pdf_attachments {
            Some(Value::Array(items)) => items
                .iter()
                .filter(|item| item.is_object())
                .map(|item| AttachmentRef {
                    filename: text(item.get("filename")).unwrap_or_default(),
                    id: text(item.get("id"))
                        .or_else(|| text(item.get("_id")))
                        .unwrap_or_default(),
                })
                .collect(),
            _ => Vec::new(),
        };

        Self {
            id,
            subject: text(raw.subject.as_ref()).unwrap_or_default(),
            sender: text(raw.sender.as_ref()).unwrap_or_default(),
            date: text(raw.date.as_ref()).unwrap_or_default(),
            body: text(raw.body.as_ref()).unwrap_or_default(),
            category: text(raw.category.as_ref()).unwrap_or_default(),
            processed_at: text(raw.processed_at.as_ref()).unwrap_or_default(),
            summary: text(raw.summary.as_ref()).unwrap_or_default(),
            has_attachments: matches!(raw.has_attachments, Some(Value::Bool(true))),
            attachments,
        }
    }
}

/// Reads a loosely typed JSON value as display text. Mongo extended JSON
/// (`{"$oid": ..}`, `{"$date": ..}`) is unwrapped.
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Object(map) => map
            .get("$oid")
            .or_else(|| map.get("$date"))
            .and_then(|inner| text(Some(inner))),
        Value::Null | Value::Array(_) => None,
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DashboardStats {
    #[serde(default)]
    pub total_emails: u64,
    #[serde(default)]
    pub category_distribution: std::collections::BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Meeting,
    Exam,
    Assignment,
    Interview,
    #[default]
    Other,
}

impl EventKind {
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "meeting" => Self::Meeting,
            "exam" => Self::Exam,
            "assignment" => Self::Assignment,
            "interview" => Self::Interview,
            _ => Self::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Meeting => "meeting",
            Self::Exam => "exam",
            Self::Assignment => "assignment",
            Self::Interview => "interview",
            Self::Other => "other",
        }
    }
}

const UNTITLED_EVENT: &str = "Untitled Event";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEvent {
    #[serde(rename = "type", default, deserialize_with = "lenient_kind")]
    pub kind: EventKind,
    #[serde(alias = "date", default)]
    pub scheduled_date: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(alias = "link", default)]
    pub meeting_link: Option<String>,
    #[serde(alias = "title", default = "untitled", deserialize_with = "lenient_subject")]
    pub subject: String,
    #[serde(default)]
    pub processed_at: Option<String>,
}

impl ScheduleEvent {
    pub fn when(&self) -> Option<DateTime<Utc>> {
        self.scheduled_date.as_deref().and_then(parse_timestamp)
    }
}

fn untitled() -> String {
    UNTITLED_EVENT.to_string()
}

fn lenient_kind<'de, D: Deserializer<'de>>(d: D) -> Result<EventKind, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.as_deref().map(EventKind::parse).unwrap_or_default())
}

fn lenient_subject<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(raw.filter(|s| !s.trim().is_empty()).unwrap_or_else(untitled))
}

/// Row shape of the local `schedules` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ScheduleRow {
    pub kind: Option<String>,
    pub scheduled_date: Option<String>,
    pub location: Option<String>,
    pub meeting_link: Option<String>,
    pub subject: Option<String>,
    pub processed_at: Option<String>,
}

impl From<ScheduleRow> for ScheduleEvent {
    fn from(row: ScheduleRow) -> Self {
        Self {
            kind: row.kind.as_deref().map(EventKind::parse).unwrap_or_default(),
            scheduled_date: row.scheduled_date,
            location: row.location,
            meeting_link: row.meeting_link,
            subject: row
                .subject
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(untitled),
            processed_at: row.processed_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EmailSummary {
    pub id: String,
    pub subject: Option<String>,
    pub summary: Option<String>,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentMeta {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub filename: String,
    #[serde(default)]
    pub email_id: Option<Value>,
    #[serde(default)]
    pub upload_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentContent {
    pub filename: String,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Overdue,
    #[default]
    Pending,
    Paid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bill {
    #[serde(default, deserialize_with = "lenient_text")]
    pub id: String,
    #[serde(alias = "title", default, deserialize_with = "lenient_text")]
    pub name: String,
    #[serde(default, deserialize_with = "lenient_amount")]
    pub amount: f64,
    #[serde(rename = "dueDate", alias = "due_date", default, deserialize_with = "lenient_text")]
    pub due_date: String,
    #[serde(default, deserialize_with = "lenient_text")]
    pub category: String,
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: BillStatus,
}

fn lenient_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    Ok(text(raw.as_ref()).unwrap_or_default())
}

fn lenient_amount<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    let raw = Option::<Value>::deserialize(d)?;
    Ok(match raw {
        Some(Value::Number(n)) => n.as_f64().unwrap_or_default(),
        Some(Value::String(s)) => s
            .trim()
            .trim_start_matches('$')
            .replace(',', "")
            .parse()
            .unwrap_or_default(),
        _ => 0.0,
    })
}

fn lenient_status<'de, D: Deserializer<'de>>(d: D) -> Result<BillStatus, D::Error> {
    let raw = Option::<String>::deserialize(d)?;
    Ok(match raw.as_deref().map(str::to_lowercase).as_deref() {
        Some("paid") => BillStatus::Paid,
        Some("overdue") => BillStatus::Overdue,
        _ => BillStatus::Pending,
    })
}

/// Parses the timestamp shapes the producer emits: RFC 3339, RFC 2822 mail
/// dates, naive ISO date-times (taken as UTC) and bare dates.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}
