use crate::client::FetchError;
use crate::config::{Keybindings, matches_key};
use crate::extract::{clean_sender_name, extract_important_info, format_email_body};
use crate::local::LocalApiError;
use crate::models::{self, AttachmentMeta, Bill, BillStatus, EventKind, ScheduleEvent, StoredEmail};
use crate::poller::{FeedState, SortOrder};
use crate::schedule::{self, TypeFilter, UPCOMING_LIMIT};
use crate::stats::{self, CategoryRow};
use chrono::{DateTime, Local, Utc};
use crossterm::event::KeyEvent;
use ratatui::{
    Frame,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph, Wrap},
};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

pub const NO_SUMMARY: &str = "No summary available";
const LOADING_EMAILS: &str = "Loading stored emails...";
const NO_EMAILS: &str = "No emails";

#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum FocusedPanel {
    Categories,
    #[default]
    Emails,
    Events,
    Attachments,
    Bills,
}

impl FocusedPanel {
    const ORDER: [FocusedPanel; 5] = [
        FocusedPanel::Categories,
        FocusedPanel::Emails,
        FocusedPanel::Events,
        FocusedPanel::Attachments,
        FocusedPanel::Bills,
    ];

    fn position(self) -> usize {
        Self::ORDER.iter().position(|p| *p == self).unwrap_or(0)
    }

    fn next(self) -> Self {
        Self::ORDER[(self.position() + 1) % Self::ORDER.len()]
    }

    fn prev(self) -> Self {
        Self::ORDER[(self.position() + Self::ORDER.len() - 1) % Self::ORDER.len()]
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum UIMode {
    Authentication,
    Browsing,
    Detail,
}

/// What the event loop has to do after a key press.
#[derive(Debug, PartialEq, Eq)]
pub enum Action {
    None,
    Quit,
    SetFilter(Option<String>),
    Download(Vec<String>),
}

/// Results of background loads, delivered to the event loop.
#[derive(Debug)]
pub enum Update {
    Stats(Result<models::DashboardStats, FetchError>),
    Events(anyhow::Result<Vec<ScheduleEvent>>),
    Attachments(Result<Vec<AttachmentMeta>, FetchError>),
    Bills(Result<Vec<Bill>, LocalApiError>),
    Downloaded(Result<PathBuf, String>),
}

pub struct UIState {
    pub mode: UIMode,
    pub focused_panel: FocusedPanel,
    pub greeting: String,
    pub auth_url: Option<String>,
    pub auth_error: Option<String>,
    pub feed: Arc<Mutex<FeedState>>,
    pub categories: Vec<CategoryRow>,
    pub total_emails: u64,
    pub events: Vec<ScheduleEvent>,
    pub event_filter: TypeFilter,
    pub attachments: Vec<AttachmentMeta>,
    pub bills: Vec<Bill>,
    pub panel_errors: PanelErrors,
    pub selected_category: usize,
    pub selected_email: usize,
    pub selected_event: usize,
    pub selected_attachment: usize,
    pub selected_bill: usize,
    pub emails_list_state: ListState,
    pub detail: Option<StoredEmail>,
    pub detail_scroll: u16,
    pub status_message: Option<String>,
}

#[derive(Debug, Default)]
pub struct PanelErrors {
    pub stats: Option<String>,
    pub events: Option<String>,
    pub attachments: Option<String>,
    pub bills: Option<String>,
}

impl UIState {
    pub fn new(feed: Arc<Mutex<FeedState>>) -> Self {
        Self {
            mode: UIMode::Authentication,
            focused_panel: FocusedPanel::default(),
            greeting: String::new(),
            auth_url: None,
            auth_error: None,
            feed,
            categories: Vec::new(),
            total_emails: 0,
            events: Vec::new(),
            event_filter: TypeFilter::All,
            attachments: Vec::new(),
            bills: Vec::new(),
            panel_errors: PanelErrors::default(),
            selected_category: 0,
            selected_email: 0,
            selected_event: 0,
            selected_attachment: 0,
            selected_bill: 0,
            emails_list_state: ListState::default(),
            detail: None,
            detail_scroll: 0,
            status_message: None,
        }
    }

    fn emails_snapshot(&self) -> Vec<StoredEmail> {
        match self.feed.lock() {
            Ok(feed) => feed.emails.clone(),
            Err(_) => Vec::new(),
        }
    }

    fn email_count(&self) -> usize {
        self.feed.lock().map(|f| f.emails.len()).unwrap_or(0)
    }

    /// Upcoming events after the type filter, soonest first.
    pub fn visible_events(&self, now: DateTime<Utc>) -> Vec<ScheduleEvent> {
        let filtered = schedule::filter_by_type(&self.events, self.event_filter);
        schedule::upcoming(&filtered, now, UPCOMING_LIMIT)
    }

    pub fn cycle_event_filter(&mut self) {
        self.event_filter = match self.event_filter {
            TypeFilter::All => TypeFilter::Only(EventKind::Exam),
            TypeFilter::Only(EventKind::Exam) => TypeFilter::Only(EventKind::Meeting),
            TypeFilter::Only(EventKind::Meeting) => TypeFilter::Only(EventKind::Assignment),
            TypeFilter::Only(EventKind::Assignment) => TypeFilter::Only(EventKind::Interview),
            TypeFilter::Only(_) => TypeFilter::All,
        };
        self.selected_event = 0;
    }

    pub fn apply_update(&mut self, update: Update) {
        match update {
            Update::Stats(Ok(stats)) => {
                self.total_emails = stats.total_emails;
                self.categories = stats::category_rows(&stats);
                self.panel_errors.stats = None;
            }
            Update::Stats(Err(e)) => {
                tracing::warn!(error = %e, "failed to load dashboard stats");
                self.panel_errors.stats = Some("Failed to load stats".to_string());
            }
            Update::Events(Ok(events)) => {
                self.events = events;
                self.panel_errors.events = None;
            }
            Update::Events(Err(e)) => {
                tracing::warn!(error = %format!("{:#}", e), "failed to load schedules");
                self.panel_errors.events = Some("Failed to load events".to_string());
            }
            Update::Attachments(Ok(attachments)) => {
                self.attachments = attachments;
                self.selected_attachment = 0;
                self.panel_errors.attachments = None;
            }
            Update::Attachments(Err(e)) => {
                tracing::warn!(error = %e, "failed to load attachments");
                self.panel_errors.attachments = Some("Failed to load attachments".to_string());
            }
            Update::Bills(Ok(bills)) => {
                self.bills = bills;
                self.panel_errors.bills = None;
            }
            Update::Bills(Err(e)) => {
                tracing::warn!(error = %e, "failed to load bills");
                self.panel_errors.bills = Some("Failed to fetch bills".to_string());
            }
            Update::Downloaded(Ok(path)) => {
                self.status_message = Some(format!("Saved {}", path.display()));
            }
            Update::Downloaded(Err(e)) => {
                self.status_message = Some(format!("Download failed: {}", e));
            }
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, keys: &Keybindings) -> Action {
        // A download status stays in the footer until the next key press.
        self.status_message = None;
        match self.mode {
            UIMode::Authentication => {
                if matches_key(key, &keys.quit) {
                    Action::Quit
                } else {
                    Action::None
                }
            }
            UIMode::Detail => self.handle_detail_key(key, keys),
            UIMode::Browsing => self.handle_browsing_key(key, keys),
        }
    }

    fn handle_detail_key(&mut self, key: KeyEvent, keys: &Keybindings) -> Action {
        if matches_key(key, &keys.close) {
            self.mode = UIMode::Browsing;
            self.detail = None;
            self.detail_scroll = 0;
        } else if matches_key(key, &keys.move_down) {
            self.detail_scroll = self.detail_scroll.saturating_add(1);
        } else if matches_key(key, &keys.move_up) {
            self.detail_scroll = self.detail_scroll.saturating_sub(1);
        } else if matches_key(key, &keys.download) {
            if let Some(email) = &self.detail {
                let ids: Vec<String> = email.attachments.iter().map(|a| a.id.clone()).collect();
                if !ids.is_empty() {
                    return Action::Download(ids);
                }
            }
        } else if matches_key(key, &keys.quit) {
            return Action::Quit;
        }
        Action::None
    }

    fn handle_browsing_key(&mut self, key: KeyEvent, keys: &Keybindings) -> Action {
        if matches_key(key, &keys.quit) {
            return Action::Quit;
        }

        if matches_key(key, &keys.next_panel) {
            self.focused_panel = self.focused_panel.next();
        } else if matches_key(key, &keys.prev_panel) {
            self.focused_panel = self.focused_panel.prev();
        } else if matches_key(key, &keys.move_down) {
            let len = self.panel_len(self.focused_panel);
            let selected = self.selection_mut(self.focused_panel);
            if *selected < len.saturating_sub(1) {
                *selected += 1;
            }
        } else if matches_key(key, &keys.move_up) {
            let selected = self.selection_mut(self.focused_panel);
            *selected = selected.saturating_sub(1);
        } else if matches_key(key, &keys.open) {
            match self.focused_panel {
                FocusedPanel::Categories => {
                    if let Some(row) = self.categories.get(self.selected_category) {
                        self.selected_email = 0;
                        return Action::SetFilter(Some(row.category.clone()));
                    }
                }
                FocusedPanel::Emails => {
                    if let Some(email) = self.emails_snapshot().into_iter().nth(self.selected_email) {
                        self.detail = Some(email);
                        self.detail_scroll = 0;
                        self.mode = UIMode::Detail;
                    }
                }
                _ => {}
            }
        } else if matches_key(key, &keys.toggle_sort) {
            if let Ok(mut feed) = self.feed.lock() {
                feed.toggle_sort();
            }
        } else if matches_key(key, &keys.clear_filter) {
            self.selected_email = 0;
            return Action::SetFilter(None);
        } else if matches_key(key, &keys.cycle_event_type) {
            self.cycle_event_filter();
        } else if matches_key(key, &keys.download) && self.focused_panel == FocusedPanel::Attachments {
            if let Some(attachment) = self.attachments.get(self.selected_attachment) {
                return Action::Download(vec![attachment.id.clone()]);
            }
        }
        Action::None
    }

    fn panel_len(&self, panel: FocusedPanel) -> usize {
        match panel {
            FocusedPanel::Categories => self.categories.len(),
            FocusedPanel::Emails => self.email_count(),
            FocusedPanel::Events => self.visible_events(Utc::now()).len(),
            FocusedPanel::Attachments => self.attachments.len(),
            FocusedPanel::Bills => self.bills.len(),
        }
    }

    fn selection_mut(&mut self, panel: FocusedPanel) -> &mut usize {
        match panel {
            FocusedPanel::Categories => &mut self.selected_category,
            FocusedPanel::Emails => &mut self.selected_email,
            FocusedPanel::Events => &mut self.selected_event,
            FocusedPanel::Attachments => &mut self.selected_attachment,
            FocusedPanel::Bills => &mut self.selected_bill,
        }
    }
}

/// Parses the stored date and shows it in local time; unreadable dates are
/// shown as they came.
pub fn format_date(raw: &str) -> String {
    match models::parse_timestamp(raw) {
        Some(date) => date
            .with_timezone(&Local)
            .format("%b %d %Y @ %-I:%M%p")
            .to_string(),
        None => raw.to_string(),
    }
}

/// Text of the detail modal, one entry per rendered line.
pub fn detail_lines(email: &StoredEmail) -> Vec<String> {
    let summary = if email.summary.trim().is_empty() {
        NO_SUMMARY.to_string()
    } else {
        email.summary.clone()
    };
    let mut lines = vec![
        format!("From: {}", clean_sender_name(&email.sender)),
        format!("Date: {}", format_date(&email.date)),
        String::new(),
        "Summary".to_string(),
        summary,
    ];

    if let Some(info) = extract_important_info(&email.subject, &email.body) {
        lines.push(String::new());
        lines.push("Important Details".to_string());
        for (label, value) in info.facts() {
            lines.push(format!("  {}: {}", label, value));
        }
    }

    if email.has_attachments {
        lines.push(String::new());
        lines.push("Attachments".to_string());
        for attachment in &email.attachments {
            lines.push(format!("  📎 {}", attachment.filename));
        }
    }

    let body = format_email_body(&email.body);
    if !body.is_empty() {
        lines.push(String::new());
        lines.push("Message".to_string());
        lines.extend(body);
    }
    lines
}

fn panel_block(title: String, focused: bool) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .title(title)
        .border_style(if focused {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::Gray)
        })
}

fn row_style(selected: bool) -> Style {
    if selected {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    } else {
        Style::default()
    }
}

fn muted(text: &str, block: Block<'static>) -> Paragraph<'static> {
    Paragraph::new(text.to_string())
        .block(block)
        .style(Style::default().fg(Color::DarkGray))
        .wrap(Wrap { trim: true })
}

pub fn render(f: &mut Frame, state: &mut UIState) {
    if state.mode == UIMode::Authentication {
        render_authentication(f, state);
        return;
    }

    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(1),
        ])
        .split(f.area());

    render_header(f, state, rows[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage(22),
            Constraint::Percentage(43),
            Constraint::Percentage(35),
        ])
        .split(rows[1]);

    render_categories(f, state, columns[0]);
    render_emails(f, state, columns[1]);

    let right = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Percentage(30),
            Constraint::Percentage(30),
        ])
        .split(columns[2]);

    render_events(f, state, right[0]);
    render_attachments(f, state, right[1]);
    render_bills(f, state, right[2]);

    let footer = state.status_message.clone().unwrap_or_else(|| {
        "Tab: panels  j/k: move  Enter: open  s: sort  c: clear filter  t: event type  d: download  q: quit"
            .to_string()
    });
    f.render_widget(
        Paragraph::new(footer).style(Style::default().fg(Color::DarkGray)),
        rows[2],
    );

    if state.mode == UIMode::Detail {
        render_detail(f, state);
    }
}

fn render_header(f: &mut Frame, state: &UIState, area: Rect) {
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            state.greeting.clone(),
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(format!("   {} emails processed", state.total_emails)),
    ]))
    .block(Block::default().borders(Borders::ALL).title(" maildash "));
    f.render_widget(header, area);
}

fn render_categories(f: &mut Frame, state: &UIState, area: Rect) {
    let block = panel_block(
        "Categories".to_string(),
        state.focused_panel == FocusedPanel::Categories,
    );

    if let Some(error) = &state.panel_errors.stats {
        let p = Paragraph::new(error.clone())
            .block(block)
            .style(Style::default().fg(Color::Red));
        f.render_widget(p, area);
        return;
    }

    let active_filter = state.feed.lock().ok().and_then(|feed| feed.filter.clone());
    let items: Vec<ListItem> = state
        .categories
        .iter()
        .enumerate()
        .map(|(i, row)| {
            let marker = if active_filter.as_deref() == Some(row.category.as_str()) {
                "● "
            } else {
                "  "
            };
            let text = format!(
                "{}{}  {} ({}%)\n    {}",
                marker,
                row.display_name,
                row.count,
                row.percentage,
                row.level.name()
            );
            ListItem::new(text).style(row_style(i == state.selected_category))
        })
        .collect();

    f.render_widget(List::new(items).block(block), area);
}

fn render_emails(f: &mut Frame, state: &mut UIState, area: Rect) {
    let (title, loading, error, emails, sort_order) = match state.feed.lock() {
        Ok(feed) => (
            feed.title(),
            feed.loading,
            feed.error.clone(),
            feed.emails.clone(),
            feed.sort_order,
        ),
        Err(_) => return,
    };

    let sort_hint = match sort_order {
        SortOrder::Desc => "↓",
        SortOrder::Asc => "↑",
    };
    let block = panel_block(
        format!("{} {}", title, sort_hint),
        state.focused_panel == FocusedPanel::Emails,
    );

    if loading {
        let p = Paragraph::new(LOADING_EMAILS)
            .block(block)
            .style(Style::default().fg(Color::Yellow));
        f.render_widget(p, area);
        return;
    }

    let inner = block.inner(area);
    f.render_widget(block, area);

    let list_area = match error {
        Some(message) => {
            let parts = Layout::default()
                .direction(Direction::Vertical)
                .constraints([Constraint::Length(1), Constraint::Min(0)])
                .split(inner);
            let banner = Paragraph::new(message).style(
                Style::default()
                    .fg(Color::White)
                    .bg(Color::Red)
                    .add_modifier(Modifier::BOLD),
            );
            f.render_widget(banner, parts[0]);
            parts[1]
        }
        None => inner,
    };

    if emails.is_empty() {
        let p = Paragraph::new(NO_EMAILS).style(Style::default().fg(Color::DarkGray));
        f.render_widget(p, list_area);
        return;
    }

    if state.selected_email >= emails.len() {
        state.selected_email = emails.len() - 1;
    }

    let items: Vec<ListItem> = emails
        .iter()
        .enumerate()
        .map(|(i, email)| {
            let indicator = if i == state.selected_email { "█" } else { " " };
            let attachment = if email.has_attachments { " 📎" } else { "" };
            let text = format!(
                "{} {}  {}\n{} {}{}",
                indicator,
                clean_sender_name(&email.sender),
                format_date(&email.date),
                indicator,
                email.subject,
                attachment,
            );
            ListItem::new(text).style(row_style(i == state.selected_email))
        })
        .collect();

    state.emails_list_state.select(Some(state.selected_email));
    f.render_stateful_widget(List::new(items), list_area, &mut state.emails_list_state);
}

fn render_events(f: &mut Frame, state: &UIState, area: Rect) {
    let filter_name = match state.event_filter {
        TypeFilter::All => "all",
        TypeFilter::Only(kind) => kind.as_str(),
    };
    let block = panel_block(
        format!("Upcoming Events ({})", filter_name),
        state.focused_panel == FocusedPanel::Events,
    );

    if let Some(error) = &state.panel_errors.events {
        f.render_widget(muted(error, block), area);
        return;
    }

    let events = state.visible_events(Utc::now());
    if events.is_empty() {
        f.render_widget(muted("No upcoming events", block), area);
        return;
    }

    let items: Vec<ListItem> = events
        .iter()
        .enumerate()
        .map(|(i, event)| {
            let when = event
                .scheduled_date
                .as_deref()
                .map(format_date)
                .unwrap_or_default();
            let mut text = format!("{} {}\n   {}", schedule::event_icon(event.kind), event.subject, when);
            if let Some(location) = event.location.as_deref().filter(|l| !l.is_empty()) {
                text.push_str(&format!("  @ {}", location));
            }
            ListItem::new(text).style(row_style(i == state.selected_event))
        })
        .collect();
    f.render_widget(List::new(items).block(block), area);
}

fn render_attachments(f: &mut Frame, state: &UIState, area: Rect) {
    let block = panel_block(
        "Attachments".to_string(),
        state.focused_panel == FocusedPanel::Attachments,
    );

    if let Some(error) = &state.panel_errors.attachments {
        f.render_widget(muted(error, block), area);
        return;
    }
    if state.attachments.is_empty() {
        f.render_widget(muted("No attachments", block), area);
        return;
    }

    let items: Vec<ListItem> = state
        .attachments
        .iter()
        .enumerate()
        .map(|(i, a)| {
            let uploaded = a.upload_date.as_deref().map(format_date).unwrap_or_default();
            ListItem::new(format!("📎 {}  {}", a.filename, uploaded))
                .style(row_style(i == state.selected_attachment))
        })
        .collect();
    f.render_widget(List::new(items).block(block), area);
}

fn render_bills(f: &mut Frame, state: &UIState, area: Rect) {
    let block = panel_block("Bills".to_string(), state.focused_panel == FocusedPanel::Bills);

    if let Some(error) = &state.panel_errors.bills {
        f.render_widget(muted(error, block), area);
        return;
    }
    if state.bills.is_empty() {
        f.render_widget(muted("No bills", block), area);
        return;
    }

    let items: Vec<ListItem> = state
        .bills
        .iter()
        .enumerate()
        .map(|(i, bill)| {
            let (status, color) = match bill.status {
                BillStatus::Overdue => ("overdue", Color::Red),
                BillStatus::Pending => ("pending", Color::Yellow),
                BillStatus::Paid => ("paid", Color::Green),
            };
            let line = Line::from(vec![
                Span::raw(format!("{}  ${:.2}  due {}  ", bill.name, bill.amount, bill.due_date)),
                Span::styled(status, Style::default().fg(color)),
            ]);
            ListItem::new(line).style(row_style(i == state.selected_bill))
        })
        .collect();
    f.render_widget(List::new(items).block(block), area);
}

fn render_detail(f: &mut Frame, state: &UIState) {
    let Some(email) = &state.detail else {
        return;
    };
    let area = centered_rect(80, 80, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .borders(Borders::ALL)
        .title(format!(" {} ", email.subject))
        .title_bottom(" Esc to close, d to download attachments ")
        .border_style(Style::default().fg(Color::Cyan));

    let lines: Vec<Line> = detail_lines(email)
        .into_iter()
        .map(|line| match line.as_str() {
            "Summary" | "Important Details" | "Attachments" | "Message" => Line::styled(
                line,
                Style::default()
                    .fg(Color::Magenta)
                    .add_modifier(Modifier::BOLD),
            ),
            _ => Line::raw(line),
        })
        .collect();

    let p = Paragraph::new(lines)
        .block(block)
        .wrap(Wrap { trim: false })
        .scroll((state.detail_scroll, 0));
    f.render_widget(p, area);
}

fn render_authentication(f: &mut Frame, state: &UIState) {
    let area = centered_rect(60, 40, f.area());
    f.render_widget(Clear, area);

    let block = Block::default()
        .title(" Sign in ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(6),
            Constraint::Length(4),
            Constraint::Min(0),
        ])
        .split(inner);

    let msg = Paragraph::new(
        "Sign in with your Google account to open the dashboard. Visit the following URL in your browser:",
    )
    .wrap(Wrap { trim: true });
    f.render_widget(msg, chunks[0]);

    match &state.auth_url {
        Some(url) => {
            let url_p = Paragraph::new(url.as_str())
                .style(
                    Style::default()
                        .fg(Color::Yellow)
                        .add_modifier(Modifier::UNDERLINED),
                )
                .block(Block::default().borders(Borders::ALL).title(" URL "))
                .wrap(Wrap { trim: false });
            f.render_widget(url_p, chunks[1]);
        }
        None => {
            let waiting = Paragraph::new("Checking for a saved session...")
                .style(Style::default().fg(Color::Gray));
            f.render_widget(waiting, chunks[1]);
        }
    }

    let footer = match &state.auth_error {
        Some(error) => Paragraph::new(format!("Sign-in failed: {}\n\nPress q to quit.", error))
            .style(Style::default().fg(Color::Red)),
        None => Paragraph::new(
            "Your default browser should have opened automatically. The dashboard opens once sign-in completes. Press q to quit.",
        )
        .style(Style::default().fg(Color::Gray)),
    };
    f.render_widget(footer.wrap(Wrap { trim: true }), chunks[2]);
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AttachmentRef, DashboardStats};
    use crossterm::event::{KeyCode, KeyModifiers};
    use ratatui::{Terminal, backend::TestBackend};

    fn key(code: KeyCode) -> KeyEvent {
        KeyEvent::new(code, KeyModifiers::empty())
    }

    fn email(id: &str, subject: &str) -> StoredEmail {
        StoredEmail {
            id: id.to_string(),
            subject: subject.to_string(),
            sender: "\"Prof. X\" <x@uni.edu>".to_string(),
            date: "2024-03-01T10:00:00Z".to_string(),
            ..Default::default()
        }
    }

    fn browsing(emails: Vec<StoredEmail>) -> UIState {
        let mut feed = FeedState::default();
        feed.emails = emails;
        feed.loading = false;
        let mut state = UIState::new(Arc::new(Mutex::new(feed)));
        state.mode = UIMode::Browsing;
        state
    }

    fn screen(state: &mut UIState) -> String {
        let mut terminal = Terminal::new(TestBackend::new(140, 40)).unwrap();
        terminal.draw(|f| render(f, state)).unwrap();
        let buffer = terminal.backend().buffer().clone();
        let mut text = String::new();
        for y in 0..buffer.area.height {
            for x in 0..buffer.area.width {
                text.push_str(buffer[(x, y)].symbol());
            }
            text.push('\n');
        }
        text
    }

    #[test]
    fn test_download_status_clears_on_next_key() {
        let mut state = browsing(vec![email("1", "Lunch plans")]);
        state.apply_update(Update::Downloaded(Ok(PathBuf::from("downloads/menu.pdf"))));
        assert!(screen(&mut state).contains("Saved downloads/menu.pdf"));

        state.handle_key(key(KeyCode::Char('j')), &Keybindings::default());
        assert_eq!(state.status_message, None);
        assert!(screen(&mut state).contains("q: quit"));
    }

    #[test]
    fn test_detail_lines_without_summary_or_details() {
        let lines = detail_lines(&email("1", "Lunch plans"));
        assert_eq!(lines[0], "From: Prof. X");
        assert!(lines.contains(&NO_SUMMARY.to_string()));
        assert!(!lines.contains(&"Important Details".to_string()));
        assert!(!lines.contains(&"Attachments".to_string()));
    }

    #[test]
    fn test_detail_lines_with_exam_details_and_attachments() {
        let mut e = email("1", "Midterm exam");
        e.summary = "Exam on Friday".to_string();
        e.body = "Slot: 10:00 AM - 12:00 PM\nLogin ID: AB12".to_string();
        e.has_attachments = true;
        e.attachments = vec![AttachmentRef {
            filename: "rules.pdf".to_string(),
            id: "a1".to_string(),
        }];

        let lines = detail_lines(&e);
        assert!(lines.contains(&"Exam on Friday".to_string()));
        assert!(lines.contains(&"Important Details".to_string()));
        assert!(lines.contains(&"  Time Slot: 10:00 AM - 12:00 PM".to_string()));
        assert!(lines.contains(&"  Login ID: AB12".to_string()));
        assert!(!lines.iter().any(|l| l.contains("Password")));
        assert!(lines.contains(&"  📎 rules.pdf".to_string()));
    }

    #[test]
    fn test_format_date_falls_back_to_raw() {
        assert_eq!(format_date("someday"), "someday");
        assert_ne!(format_date("2024-03-01T10:00:00Z"), "2024-03-01T10:00:00Z");
    }

    #[test]
    fn test_panel_navigation_wraps() {
        let mut state = browsing(Vec::new());
        let keys = Keybindings::default();
        assert_eq!(state.focused_panel, FocusedPanel::Emails);
        state.handle_key(key(KeyCode::BackTab), &keys);
        assert_eq!(state.focused_panel, FocusedPanel::Categories);
        state.handle_key(key(KeyCode::BackTab), &keys);
        assert_eq!(state.focused_panel, FocusedPanel::Bills);
        state.handle_key(key(KeyCode::Tab), &keys);
        assert_eq!(state.focused_panel, FocusedPanel::Categories);
    }

    #[test]
    fn test_open_and_close_detail() {
        let mut state = browsing(vec![email("1", "First"), email("2", "Second")]);
        let keys = Keybindings::default();

        state.handle_key(key(KeyCode::Char('j')), &keys);
        state.handle_key(key(KeyCode::Char('j')), &keys);
        assert_eq!(state.selected_email, 1);

        state.handle_key(key(KeyCode::Enter), &keys);
        assert_eq!(state.mode, UIMode::Detail);
        assert_eq!(state.detail.as_ref().map(|e| e.id.as_str()), Some("2"));

        state.handle_key(key(KeyCode::Esc), &keys);
        assert_eq!(state.mode, UIMode::Browsing);
        assert!(state.detail.is_none());
    }

    #[test]
    fn test_category_enter_and_clear_set_filter() {
        let mut state = browsing(Vec::new());
        let keys = Keybindings::default();
        let mut distribution = std::collections::BTreeMap::new();
        distribution.insert("work".to_string(), 3);
        state.apply_update(Update::Stats(Ok(DashboardStats {
            total_emails: 3,
            category_distribution: distribution,
        })));

        state.focused_panel = FocusedPanel::Categories;
        assert_eq!(
            state.handle_key(key(KeyCode::Enter), &keys),
            Action::SetFilter(Some("work".to_string()))
        );
        assert_eq!(
            state.handle_key(key(KeyCode::Char('c')), &keys),
            Action::SetFilter(None)
        );
    }

    #[test]
    fn test_login_screen_only_allows_quit() {
        let mut state = UIState::new(Arc::new(Mutex::new(FeedState::default())));
        let keys = Keybindings::default();
        assert_eq!(state.handle_key(key(KeyCode::Tab), &keys), Action::None);
        assert_eq!(state.focused_panel, FocusedPanel::Emails);
        assert_eq!(state.handle_key(key(KeyCode::Char('q')), &keys), Action::Quit);

        let text = screen(&mut state);
        assert!(text.contains("Sign in"));
        assert!(!text.contains("Categories"));
    }

    #[test]
    fn test_download_from_attachments_panel() {
        let mut state = browsing(Vec::new());
        let keys = Keybindings::default();
        state.apply_update(Update::Attachments(Ok(vec![AttachmentMeta {
            id: "a9".to_string(),
            filename: "notes.pdf".to_string(),
            email_id: None,
            upload_date: None,
        }])));

        assert_eq!(state.handle_key(key(KeyCode::Char('d')), &keys), Action::None);
        state.focused_panel = FocusedPanel::Attachments;
        assert_eq!(
            state.handle_key(key(KeyCode::Char('d')), &keys),
            Action::Download(vec!["a9".to_string()])
        );
    }

    #[test]
    fn test_event_filter_cycles_back_to_all() {
        let mut state = browsing(Vec::new());
        for _ in 0..5 {
            state.cycle_event_filter();
        }
        assert_eq!(state.event_filter, TypeFilter::All);
    }

    #[test]
    fn test_renders_loading_then_empty() {
        let mut state = UIState::new(Arc::new(Mutex::new(FeedState::default())));
        state.mode = UIMode::Browsing;
        state.greeting = "Welcome back, Ada".to_string();
        let text = screen(&mut state);
        assert!(text.contains(LOADING_EMAILS));
        assert!(text.contains("Welcome back, Ada"));

        state.feed.lock().unwrap().loading = false;
        assert!(screen(&mut state).contains(NO_EMAILS));
    }

    #[test]
    fn test_error_banner_keeps_list_visible() {
        let mut state = browsing(vec![email("1", "Still here")]);
        state.feed.lock().unwrap().error = Some(crate::poller::LOAD_ERROR.to_string());
        let text = screen(&mut state);
        assert!(text.contains(crate::poller::LOAD_ERROR));
        assert!(text.contains("Still here"));
    }
}
