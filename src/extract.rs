//! Heuristic fact extraction from stored email text.
//!
//! Everything here is pure: no function fails, and the same input always
//! yields the same output. Absent facts are `None`.

use std::sync::OnceLock;

use inflections::case::to_title_case;
use regex::Regex;

fn re_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]+>").unwrap())
}

fn re_whitespace() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\s+").unwrap())
}

fn re_slot() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)slot:\s*([0-9:.]+\s*(?:am|pm)\s*-\s*[0-9:.]+\s*(?:am|pm))").unwrap()
    })
}

fn re_time() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)[0-9]{1,2}[:.]?[0-9]{0,2}\s*(?:am|pm)").unwrap())
}

fn re_login() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(?:login|user|id)(?:\s+id)?:\s*([A-Z0-9]+)").unwrap())
}

fn re_password() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)password:\s*([a-zA-Z0-9]+)").unwrap())
}

fn re_meeting_link() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)https?://(?:[a-z0-9-]+\.)*(?:zoom\.us|meet\.google\.com|teams\.microsoft\.com|webex\.com)[^\s]*",
        )
        .unwrap()
    })
}

fn re_agenda() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)agenda:\s*([^.\n]+)").unwrap())
}

fn re_url() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"https?://[^\s]+").unwrap())
}

const EXAM_TOKENS: [&str; 3] = ["exam", "test", "quiz"];
const MEETING_TOKENS: [&str; 4] = ["meeting", "zoom", "webinar", "meet.google"];

/// Classification tag. Each kind owns its extraction strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InfoKind {
    Exam,
    Meeting,
}

impl InfoKind {
    /// Exam wins over meeting when both token sets occur.
    pub fn classify(subject: &str, body: &str) -> Option<Self> {
        let content = format!("{} {}", subject, body).to_lowercase();
        if EXAM_TOKENS.iter().any(|t| content.contains(t)) {
            Some(Self::Exam)
        } else if MEETING_TOKENS.iter().any(|t| content.contains(t)) {
            Some(Self::Meeting)
        } else {
            None
        }
    }

    fn extract(self, cleaned: &str) -> ExtractedInfo {
        match self {
            Self::Exam => ExtractedInfo::Exam(ExamDetails {
                time_slot: extract_time_slot(cleaned),
                login_id: first_capture(re_login(), cleaned),
                password: first_capture(re_password(), cleaned),
            }),
            Self::Meeting => ExtractedInfo::Meeting(MeetingDetails {
                time_slot: extract_time_slot(cleaned),
                link: re_meeting_link()
                    .find(cleaned)
                    .map(|m| m.as_str().to_string()),
                agenda: first_capture(re_agenda(), cleaned).filter(|a| !a.is_empty()),
            }),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExamDetails {
    pub time_slot: Option<String>,
    pub login_id: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeetingDetails {
    pub time_slot: Option<String>,
    pub link: Option<String>,
    pub agenda: Option<String>,
}

/// Structured facts pulled from one email, recomputed on every detail view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractedInfo {
    Exam(ExamDetails),
    Meeting(MeetingDetails),
}

impl ExtractedInfo {
    /// Present facts as (label, value) pairs in display order.
    pub fn facts(&self) -> Vec<(&'static str, &str)> {
        let mut facts = Vec::new();
        match self {
            Self::Exam(d) => {
                push_fact(&mut facts, "Time Slot", &d.time_slot);
                push_fact(&mut facts, "Login ID", &d.login_id);
                push_fact(&mut facts, "Password", &d.password);
            }
            Self::Meeting(d) => {
                push_fact(&mut facts, "Time", &d.time_slot);
                push_fact(&mut facts, "Join Meeting", &d.link);
                push_fact(&mut facts, "Agenda", &d.agenda);
            }
        }
        facts
    }
}

fn push_fact<'a>(facts: &mut Vec<(&'static str, &'a str)>, label: &'static str, value: &'a Option<String>) {
    if let Some(v) = value {
        facts.push((label, v.as_str()));
    }
}

/// Classifies the email and runs the matching extraction strategy over the
/// markup-stripped body. `None` when the email matches no kind.
pub fn extract_important_info(subject: &str, body: &str) -> Option<ExtractedInfo> {
    let kind = InfoKind::classify(subject, body)?;
    Some(kind.extract(&strip_markup(body)))
}

/// Replaces tag-like `<...>` runs with a space, collapses whitespace, trims.
pub fn strip_markup(body: &str) -> String {
    let without_tags = re_tag().replace_all(body, " ");
    re_whitespace()
        .replace_all(&without_tags, " ")
        .trim()
        .to_string()
}

/// Strict `slot: <t> - <t>` first, then the first two am/pm times anywhere.
pub fn extract_time_slot(cleaned: &str) -> Option<String> {
    if let Some(slot) = first_capture(re_slot(), cleaned) {
        return Some(slot);
    }
    let times: Vec<&str> = re_time()
        .find_iter(cleaned)
        .take(2)
        .map(|m| m.as_str())
        .collect();
    match times.as_slice() {
        [start, end] => Some(format!("{} - {}", start, end)),
        _ => None,
    }
}

fn first_capture(re: &Regex, text: &str) -> Option<String> {
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}

/// Friendly display name from a raw `From` header value.
pub fn clean_sender_name(sender: &str) -> String {
    let without_address = re_tag().replace(sender, "");
    let name = without_address.trim().replace(['"', '\''], "");
    match name.split_once('@') {
        Some((local, _)) => local.to_string(),
        None => name,
    }
}

/// Body paragraphs for display: URLs collapsed to `[View Link]`, blank lines
/// dropped, every line trimmed.
pub fn format_email_body(body: &str) -> Vec<String> {
    re_url()
        .replace_all(body, "[View Link]")
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn category_display_name(category: &str) -> String {
    to_title_case(category)
}
