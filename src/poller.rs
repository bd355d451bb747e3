use crate::client::FetchError;
use crate::models::{RawEmail, StoredEmail, parse_timestamp};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

/// Shown in place of the list whenever a poll fails.
pub const LOAD_ERROR: &str = "Failed to load email summaries";

const SPAM_CATEGORY: &str = "spam";

/// Anything that can produce a snapshot of the categorized email list.
#[async_trait]
pub trait EmailSource: Send + Sync {
    async fn fetch_emails(&self) -> Result<Vec<RawEmail>, FetchError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn flipped(self) -> Self {
        match self {
            SortOrder::Asc => SortOrder::Desc,
            SortOrder::Desc => SortOrder::Asc,
        }
    }
}

/// State of the stored-emails view, shared between fetch tasks and the UI.
#[derive(Debug)]
pub struct FeedState {
    pub emails: Vec<StoredEmail>,
    pub loading: bool,
    pub error: Option<String>,
    pub sort_order: SortOrder,
    pub filter: Option<String>,
    generation: u64,
}

impl Default for FeedState {
    fn default() -> Self {
        Self {
            emails: Vec::new(),
            loading: true,
            error: None,
            sort_order: SortOrder::default(),
            filter: None,
            generation: 0,
        }
    }
}

impl FeedState {
    /// Starts a new poll cycle. Results tagged with an older generation are
    /// dropped from here on.
    fn begin_cycle(&mut self, filter: Option<String>) -> u64 {
        self.generation += 1;
        self.filter = filter;
        self.generation
    }

    /// Applies one completed fetch. Success replaces the whole list and
    /// clears the error; failure keeps the list and sets the error.
    /// Returns false when the result belongs to a stale cycle.
    pub fn apply(&mut self, generation: u64, result: Result<Vec<RawEmail>, FetchError>) -> bool {
        if generation != self.generation {
            return false;
        }
        match result {
            Ok(raw) => {
                self.emails = visible_emails(raw, self.filter.as_deref());
                self.error = None;
            }
            Err(e) => {
                tracing::warn!(error = %e, "failed to fetch stored emails");
                self.error = Some(LOAD_ERROR.to_string());
            }
        }
        self.loading = false;
        true
    }

    /// Sorts the current list by date in the current order, then flips the
    /// order for the next toggle. Later polls do not re-sort.
    pub fn toggle_sort(&mut self) {
        let order = self.sort_order;
        self.emails.sort_by_key(|e| {
            let ts = parse_timestamp(&e.date).map_or(i64::MIN, |d| d.timestamp_millis());
            match order {
                SortOrder::Asc => ts,
                SortOrder::Desc => ts.saturating_neg(),
            }
        });
        self.sort_order = order.flipped();
    }

    pub fn title(&self) -> String {
        match &self.filter {
            Some(category) => format!(
                "{} Emails",
                crate::extract::category_display_name(category)
            ),
            None => "Recent Emails".to_string(),
        }
    }
}

/// Normalizes raw records and drops spam plus anything outside `filter`.
pub fn visible_emails(raw: Vec<RawEmail>, filter: Option<&str>) -> Vec<StoredEmail> {
    raw.into_iter()
        .map(StoredEmail::from)
        .filter(|e| e.category != SPAM_CATEGORY)
        .filter(|e| filter.is_none_or(|f| e.category == f))
        .collect()
}

/// Re-fetches the email list on a fixed interval into a shared `FeedState`.
#[derive(Clone)]
pub struct Poller {
    source: Arc<dyn EmailSource>,
    state: Arc<Mutex<FeedState>>,
    interval: Duration,
}

impl Poller {
    pub fn new(source: Arc<dyn EmailSource>, state: Arc<Mutex<FeedState>>, interval: Duration) -> Self {
        Self {
            source,
            state,
            interval,
        }
    }

    pub fn state(&self) -> Arc<Mutex<FeedState>> {
        self.state.clone()
    }

    /// Starts a poll cycle: one fetch immediately, then one per interval,
    /// until the returned handle is stopped or dropped.
    ///
    /// Fetches are not de-duplicated; when they overlap, whichever completes
    /// last is what the view shows.
    pub fn start(&self, filter: Option<String>) -> PollHandle {
        let generation = match self.state.lock() {
            Ok(mut state) => state.begin_cycle(filter.clone()),
            Err(poisoned) => poisoned.into_inner().begin_cycle(filter.clone()),
        };
        tracing::info!(generation, filter = ?filter, "starting email poll cycle");

        let token = CancellationToken::new();
        let cycle_token = token.clone();
        let source = self.source.clone();
        let state = self.state.clone();
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cycle_token.cancelled() => break,
                    _ = ticker.tick() => {
                        tokio::spawn(fetch_once(
                            source.clone(),
                            state.clone(),
                            cycle_token.clone(),
                            generation,
                        ));
                    }
                }
            }
            tracing::debug!(generation, "email poll cycle stopped");
        });

        PollHandle {
            token,
            generation,
            task: Some(task),
        }
    }
}

async fn fetch_once(
    source: Arc<dyn EmailSource>,
    state: Arc<Mutex<FeedState>>,
    token: CancellationToken,
    generation: u64,
) {
    let result = tokio::select! {
        _ = token.cancelled() => return,
        result = source.fetch_emails() => result,
    };

    if let Ok(mut state) = state.lock() {
        // Teardown may have happened while the lock was contended.
        if token.is_cancelled() {
            return;
        }
        state.apply(generation, result);
    }
}

/// Owns one poll cycle. Dropping it cancels the interval and every fetch
/// still in flight.
pub struct PollHandle {
    token: CancellationToken,
    generation: u64,
    task: Option<JoinHandle<()>>,
}

impl PollHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Cancels the cycle and waits for the interval task to exit.
    pub async fn stop(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        if !self.token.is_cancelled() {
            self.token.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::VecDeque;

    fn raw(id: &str, category: &str, date: &str) -> RawEmail {
        serde_json::from_value(json!({
            "_id": id,
            "category": category,
            "date": date,
            "subject": format!("subject {}", id)
        }))
        .unwrap()
    }

    fn ids(state: &Arc<Mutex<FeedState>>) -> Vec<String> {
        state
            .lock()
            .unwrap()
            .emails
            .iter()
            .map(|e| e.id.clone())
            .collect()
    }

    /// Replays scripted responses in call order, each after its own delay.
    /// Once the script runs out, fetches never complete.
    struct ScriptedSource {
        script: Mutex<VecDeque<(Duration, Result<Vec<RawEmail>, FetchError>)>>,
    }

    impl ScriptedSource {
        fn new(script: Vec<(u64, Result<Vec<RawEmail>, FetchError>)>) -> Arc<Self> {
            Arc::new(Self {
                script: Mutex::new(
                    script
                        .into_iter()
                        .map(|(ms, r)| (Duration::from_millis(ms), r))
                        .collect(),
                ),
            })
        }
    }

    #[async_trait]
    impl EmailSource for ScriptedSource {
        async fn fetch_emails(&self) -> Result<Vec<RawEmail>, FetchError> {
            let next = self.script.lock().unwrap().pop_front();
            match next {
                Some((delay, result)) => {
                    tokio::time::sleep(delay).await;
                    result
                }
                None => std::future::pending().await,
            }
        }
    }

    fn poller(source: Arc<ScriptedSource>, interval_ms: u64) -> Poller {
        Poller::new(
            source,
            Arc::new(Mutex::new(FeedState::default())),
            Duration::from_millis(interval_ms),
        )
    }

    async fn advance(ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    #[test]
    fn test_visible_emails_excludes_spam_regardless_of_filter() {
        let raw_list = || {
            vec![
                raw("1", "work", ""),
                raw("2", "spam", ""),
                raw("3", "social", ""),
            ]
        };
        let all: Vec<_> = visible_emails(raw_list(), None).into_iter().map(|e| e.id).collect();
        assert_eq!(all, vec!["1", "3"]);

        let spam: Vec<_> = visible_emails(raw_list(), Some("spam"));
        assert!(spam.is_empty());

        let work: Vec<_> = visible_emails(raw_list(), Some("work")).into_iter().map(|e| e.id).collect();
        assert_eq!(work, vec!["1"]);
    }

    #[test]
    fn test_sort_is_not_reapplied_after_replace() {
        let mut state = FeedState::default();
        let generation = state.begin_cycle(None);
        let server_order = || {
            vec![
                raw("old", "work", "2024-01-01T00:00:00Z"),
                raw("new", "work", "2024-06-01T00:00:00Z"),
                raw("mid", "work", "2024-03-01T00:00:00Z"),
            ]
        };
        state.apply(generation, Ok(server_order()));

        state.toggle_sort();
        let sorted: Vec<_> = state.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(sorted, vec!["new", "mid", "old"]);
        assert_eq!(state.sort_order, SortOrder::Asc);

        state.apply(generation, Ok(server_order()));
        let replaced: Vec<_> = state.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(replaced, vec!["old", "new", "mid"]);
        assert_eq!(state.sort_order, SortOrder::Asc);

        state.toggle_sort();
        let ascending: Vec<_> = state.emails.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ascending, vec!["old", "mid", "new"]);
    }

    #[test]
    fn test_stale_generation_is_ignored() {
        let mut state = FeedState::default();
        let first = state.begin_cycle(None);
        let _second = state.begin_cycle(Some("work".into()));
        assert!(!state.apply(first, Ok(vec![raw("1", "work", "")])));
        assert!(state.emails.is_empty());
        assert!(state.loading);
    }

    #[test]
    fn test_title_follows_filter() {
        let mut state = FeedState::default();
        assert_eq!(state.title(), "Recent Emails");
        state.begin_cycle(Some("work".into()));
        assert_eq!(state.title(), "Work Emails");
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_fetch_is_immediate() {
        let source = ScriptedSource::new(vec![(
            0,
            Ok(vec![raw("1", "work", ""), raw("2", "spam", "")]),
        )]);
        let poller = poller(source, 5_000);
        let state = poller.state();
        assert!(state.lock().unwrap().loading);

        let handle = poller.start(None);
        advance(10).await;

        assert_eq!(ids(&state), vec!["1"]);
        assert!(!state.lock().unwrap().loading);
        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_list_then_success_clears_error() {
        let source = ScriptedSource::new(vec![
            (0, Ok(vec![raw("a", "work", "")])),
            (0, Err(FetchError::Api("db down".into()))),
            (0, Ok(vec![raw("b", "work", "")])),
        ]);
        let poller = poller(source, 5_000);
        let state = poller.state();
        let handle = poller.start(None);

        advance(10).await;
        assert_eq!(ids(&state), vec!["a"]);
        assert_eq!(state.lock().unwrap().error, None);

        advance(5_000).await;
        assert_eq!(ids(&state), vec!["a"]);
        assert_eq!(state.lock().unwrap().error.as_deref(), Some(LOAD_ERROR));

        advance(5_000).await;
        assert_eq!(ids(&state), vec!["b"]);
        assert_eq!(state.lock().unwrap().error, None);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_response_after_teardown_is_dropped() {
        let source = ScriptedSource::new(vec![(3_000, Ok(vec![raw("late", "work", "")]))]);
        let poller = poller(source, 5_000);
        let state = poller.state();
        let handle = poller.start(None);

        advance(1_000).await;
        drop(handle);
        advance(10_000).await;

        assert!(ids(&state).is_empty());
        assert!(state.lock().unwrap().loading);
    }

    #[tokio::test(start_paused = true)]
    async fn test_last_completed_response_wins() {
        let source = ScriptedSource::new(vec![
            (3_000, Ok(vec![raw("first-issued", "work", "")])),
            (500, Ok(vec![raw("second-issued", "work", "")])),
        ]);
        let poller = poller(source, 1_000);
        let state = poller.state();
        let handle = poller.start(None);

        advance(2_000).await;
        assert_eq!(ids(&state), vec!["second-issued"]);

        advance(1_500).await;
        assert_eq!(ids(&state), vec!["first-issued"]);

        handle.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_filter_change_discards_previous_cycle() {
        let mixed = || vec![raw("w", "work", ""), raw("s", "social", "")];
        let source = ScriptedSource::new(vec![(2_000, Ok(mixed())), (0, Ok(mixed()))]);
        let poller = poller(source, 5_000);
        let state = poller.state();

        let unfiltered = poller.start(None);
        advance(1_000).await;
        unfiltered.stop().await;

        let filtered = poller.start(Some("work".into()));
        assert_eq!(filtered.generation(), 2);
        advance(3_000).await;

        assert_eq!(ids(&state), vec!["w"]);
        assert_eq!(state.lock().unwrap().filter.as_deref(), Some("work"));
        drop(filtered);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_exactly_once() {
        let source = ScriptedSource::new(vec![]);
        let poller = poller(source, 5_000);
        let handle = poller.start(None);
        assert!(!handle.token.is_cancelled());
        let token = handle.token.clone();
        handle.stop().await;
        assert!(token.is_cancelled());
    }
}
