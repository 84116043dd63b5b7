//! Client-side session: the text being edited, the chosen tone, the undo
//! history and the last applied change.
//!
//! [`Session`] is plain state and records what changed as [`SessionEvent`]s.
//! [`ToneController`] drives rewrites through a [`Rewriter`] and writes the
//! touched keys to a [`StateStore`].

use crate::diff::{sentence_diff, EditRun};
use crate::history::EditHistory;
use crate::managers::operation::RewriteCoordinator;
use crate::relay::{RelayError, Rewrite, RewriteRequest, Rewriter};
use crate::store::{StateStore, StoreError};
use crate::tone::{ToneAxes, TonePreset, DEFAULT_TEXT};
use log::{debug, info, warn};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};

pub const TEXT_KEY: &str = "tp:text";
pub const AXES_KEY: &str = "tp:axes";
pub const HISTORY_KEY: &str = "tp:history";
pub const HISTORY_INDEX_KEY: &str = "tp:historyIdx";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    TextChanged,
    AxesChanged,
    HistoryChanged,
}

/// The before/after pair of the most recent rewrite.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastChange {
    pub previous: String,
    pub latest: String,
}

#[derive(Debug, Clone)]
pub struct Session {
    text: String,
    axes: ToneAxes,
    history: EditHistory,
    last_change: Option<LastChange>,
    events: Vec<SessionEvent>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(DEFAULT_TEXT, ToneAxes::default(), EditHistory::new(DEFAULT_TEXT))
    }
}

impl Session {
    pub fn new(text: impl Into<String>, axes: ToneAxes, history: EditHistory) -> Self {
        Self {
            text: text.into(),
            axes: axes.normalized(),
            history,
            last_change: None,
            events: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn axes(&self) -> ToneAxes {
        self.axes
    }

    pub fn history(&self) -> &EditHistory {
        &self.history
    }

    pub fn last_change(&self) -> Option<&LastChange> {
        self.last_change.as_ref()
    }

    /// Diff of the last applied rewrite, if any.
    pub fn last_diff(&self) -> Option<Vec<EditRun>> {
        self.last_change
            .as_ref()
            .map(|change| sentence_diff(&change.previous, &change.latest))
    }

    /// Diff from the previous history snapshot to the current one.
    pub fn step_diff(&self) -> Option<Vec<EditRun>> {
        let index = self.history.index();
        let snapshots = self.history.snapshots();
        (index > 0).then(|| sentence_diff(&snapshots[index - 1], &snapshots[index]))
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text != self.text {
            self.text = text;
            self.events.push(SessionEvent::TextChanged);
        }
    }

    pub fn set_axes(&mut self, axes: ToneAxes) {
        let axes = axes.normalized();
        if axes != self.axes {
            self.axes = axes;
            self.events.push(SessionEvent::AxesChanged);
        }
    }

    pub fn apply_preset(&mut self, preset: TonePreset) {
        self.set_axes(preset.axes());
    }

    pub fn reset_axes(&mut self) {
        self.set_axes(ToneAxes::default());
    }

    /// Record a successful rewrite of `previous` into `latest`.
    pub fn apply_rewrite(&mut self, previous: impl Into<String>, latest: impl Into<String>) {
        let latest = latest.into();
        self.history.append(latest.clone());
        self.events.push(SessionEvent::HistoryChanged);
        self.last_change = Some(LastChange {
            previous: previous.into(),
            latest: latest.clone(),
        });
        self.set_text(latest);
    }

    /// Step back in history. Returns `false` when there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        match self.history.undo().map(str::to_string) {
            Some(text) => {
                self.events.push(SessionEvent::HistoryChanged);
                self.set_text(text);
                true
            }
            None => false,
        }
    }

    /// Step forward in history. Returns `false` when there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        match self.history.redo().map(str::to_string) {
            Some(text) => {
                self.events.push(SessionEvent::HistoryChanged);
                self.set_text(text);
                true
            }
            None => false,
        }
    }

    /// Back to the default text and tone with a one-entry history.
    pub fn reset_all(&mut self) {
        self.history.reset(DEFAULT_TEXT);
        self.events.push(SessionEvent::HistoryChanged);
        self.set_text(DEFAULT_TEXT);
        self.reset_axes();
        self.last_change = None;
    }

    pub fn take_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Rebuild a session from `store`, defaulting anything missing or malformed.
pub fn load_session(store: &dyn StateStore) -> Session {
    let text = store
        .load(TEXT_KEY)
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_else(|| DEFAULT_TEXT.to_string());

    let axes = store
        .load(AXES_KEY)
        .and_then(|v| serde_json::from_value::<ToneAxes>(v).ok())
        .unwrap_or_default();

    let snapshots = store
        .load(HISTORY_KEY)
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .unwrap_or_default();

    let index = store
        .load(HISTORY_INDEX_KEY)
        .and_then(|v| v.as_u64())
        .unwrap_or(0) as usize;

    Session::new(text.clone(), axes, EditHistory::from_parts(snapshots, index, &text))
}

/// Write the keys touched by `events`.
pub fn persist_events(
    store: &dyn StateStore,
    session: &Session,
    events: &[SessionEvent],
) -> Result<(), StoreError> {
    let touched = |event| events.contains(&event);

    if touched(SessionEvent::TextChanged) {
        store.save(TEXT_KEY, Value::String(session.text.clone()))?;
    }
    if touched(SessionEvent::AxesChanged) {
        store.save(AXES_KEY, serde_json::to_value(session.axes)?)?;
    }
    if touched(SessionEvent::HistoryChanged) {
        store.save(HISTORY_KEY, json!(session.history.snapshots()))?;
        store.save(HISTORY_INDEX_KEY, json!(session.history.index()))?;
    }
    Ok(())
}

/// Result of a rewrite that made it into the session.
#[derive(Debug, Clone, PartialEq)]
pub struct AppliedRewrite {
    pub rewrite: Rewrite,
    pub diff: Vec<EditRun>,
}

pub struct ToneController {
    session: Mutex<Session>,
    store: Arc<dyn StateStore>,
    rewriter: Arc<dyn Rewriter>,
    coordinator: RewriteCoordinator,
}

impl ToneController {
    pub fn new(store: Arc<dyn StateStore>, rewriter: Arc<dyn Rewriter>) -> Self {
        let session = load_session(store.as_ref());
        Self {
            session: Mutex::new(session),
            store,
            rewriter,
            coordinator: RewriteCoordinator::new(),
        }
    }

    /// Run `f` against the session and persist whatever it changed.
    pub fn update<R>(&self, f: impl FnOnce(&mut Session) -> R) -> Result<R, StoreError> {
        let mut session = self.session.lock().unwrap_or_else(|e| e.into_inner());
        let out = f(&mut session);
        let events = session.take_events();
        if !events.is_empty() {
            debug!("Persisting session events {:?}", events);
            persist_events(self.store.as_ref(), &session, &events)?;
        }
        Ok(out)
    }

    pub fn snapshot(&self) -> Session {
        self.session.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Rewrite the current text in the current tone.
    ///
    /// Returns `Ok(None)` when the text is blank or when a newer rewrite
    /// superseded this one; in both cases the session is left untouched.
    pub async fn apply_tone(&self) -> Result<Option<AppliedRewrite>, ControllerError> {
        self.run_rewrite(|text, axes| RewriteRequest::with_axes(text, axes))
            .await
    }

    /// Like [`apply_tone`](Self::apply_tone) but with a free-form tone label
    /// instead of the session's axes.
    pub async fn apply_label(
        &self,
        label: &str,
    ) -> Result<Option<AppliedRewrite>, ControllerError> {
        self.run_rewrite(|text, _| RewriteRequest::with_label(text, label))
            .await
    }

    async fn run_rewrite(
        &self,
        build: impl FnOnce(String, ToneAxes) -> RewriteRequest,
    ) -> Result<Option<AppliedRewrite>, ControllerError> {
        let (text, axes) = {
            let session = self.session.lock().unwrap_or_else(|e| e.into_inner());
            (session.text.clone(), session.axes)
        };
        if text.trim().is_empty() {
            return Ok(None);
        }

        let ticket = self.coordinator.begin();
        let request = build(text.clone(), axes);
        let result = self.rewriter.rewrite(&request, &ticket.token).await;

        if !self.coordinator.finish(ticket.id) {
            debug!("Discarding result of superseded rewrite {}", ticket.id);
            return Ok(None);
        }

        let rewrite = match result {
            Ok(rewrite) => rewrite,
            Err(RelayError::Cancelled) => return Ok(None),
            Err(e) => {
                warn!("Rewrite {} failed: {}", ticket.id, e);
                return Err(e.into());
            }
        };

        info!(
            "Applied rewrite {} ({} chars, cached: {})",
            ticket.id,
            rewrite.text.len(),
            rewrite.cached
        );
        let latest = rewrite.text.clone();
        self.update(|session| session.apply_rewrite(text.clone(), latest))?;

        Ok(Some(AppliedRewrite {
            diff: sentence_diff(&text, &rewrite.text),
            rewrite,
        }))
    }

    /// Abort the in-flight rewrite, if any.
    pub fn cancel(&self) {
        self.coordinator.cancel();
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Rewrite(#[from] RelayError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ResponseCache;
    use crate::cancellation::CancellationToken;
    use crate::diff::RunKind;
    use crate::relay::tests::FakeService;
    use crate::relay::ToneRelay;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::time::Duration;

    /// Replies with queued texts, optionally after a delay each.
    struct ScriptedRewriter {
        replies: Mutex<VecDeque<(Duration, Result<Rewrite, RelayError>)>>,
    }

    impl ScriptedRewriter {
        fn new(replies: Vec<(Duration, Result<Rewrite, RelayError>)>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
            }
        }
    }

    fn fresh(text: &str) -> Result<Rewrite, RelayError> {
        Ok(Rewrite {
            text: text.to_string(),
            cached: false,
        })
    }

    #[async_trait]
    impl Rewriter for ScriptedRewriter {
        async fn rewrite(
            &self,
            _request: &RewriteRequest,
            cancel: &CancellationToken,
        ) -> Result<Rewrite, RelayError> {
            let (delay, reply) = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("no scripted reply left");
            tokio::select! {
                _ = tokio::time::sleep(delay) => reply,
                _ = cancel.cancelled() => Err(RelayError::Cancelled),
            }
        }
    }

    fn controller(
        store: Arc<MemoryStore>,
        replies: Vec<(Duration, Result<Rewrite, RelayError>)>,
    ) -> ToneController {
        ToneController::new(store, Arc::new(ScriptedRewriter::new(replies)))
    }

    #[test]
    fn test_session_history_follows_rewrites() {
        let mut session = Session::new("A", ToneAxes::default(), EditHistory::new("A"));
        session.apply_rewrite("A", "B");
        session.apply_rewrite("B", "C");
        assert_eq!(session.history().snapshots(), ["A", "B", "C"]);
        assert_eq!(session.text(), "C");

        assert!(session.undo());
        assert_eq!(session.text(), "B");
        session.apply_rewrite("B", "D");
        assert_eq!(session.history().snapshots(), ["A", "B", "D"]);
        assert_eq!(session.history().index(), 2);
        assert!(!session.redo());
    }

    #[test]
    fn test_undo_redo_are_noops_at_the_ends() {
        let mut session = Session::default();
        assert!(!session.undo());
        assert!(!session.redo());
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_step_diff_compares_neighbouring_snapshots() {
        let history = EditHistory::from_parts(
            vec!["One. Two.".to_string(), "One. Three.".to_string()],
            1,
            DEFAULT_TEXT,
        );
        let mut session = Session::new("One. Three.", ToneAxes::default(), history);
        let diff = session.step_diff().unwrap();
        assert_eq!(
            diff.iter().map(|r| r.kind).collect::<Vec<_>>(),
            vec![RunKind::Equal, RunKind::Removed, RunKind::Added]
        );

        session.undo();
        assert!(session.step_diff().is_none());
    }

    #[test]
    fn test_reset_all_restores_defaults() {
        let mut session = Session::default();
        session.set_text("custom");
        session.apply_preset(TonePreset::CasualDirect);
        session.apply_rewrite("custom", "Custom.");
        session.reset_all();

        assert_eq!(session.text(), DEFAULT_TEXT);
        assert_eq!(session.axes(), ToneAxes::default());
        assert_eq!(session.history().snapshots(), [DEFAULT_TEXT]);
        assert!(session.last_change().is_none());
        assert!(session.last_diff().is_none());
    }

    #[test]
    fn test_events_are_recorded_once_per_change() {
        let mut session = Session::default();
        session.set_axes(ToneAxes::new(0.6, 0.5)); // same as default
        assert!(session.take_events().is_empty());

        session.set_axes(ToneAxes::new(0.1, 0.2));
        session.set_text("new");
        assert_eq!(
            session.take_events(),
            vec![SessionEvent::AxesChanged, SessionEvent::TextChanged]
        );
        assert!(session.take_events().is_empty());
    }

    #[test]
    fn test_load_session_defaults_and_repairs() {
        let store = MemoryStore::new();
        let session = load_session(&store);
        assert_eq!(session.text(), DEFAULT_TEXT);
        assert_eq!(session.axes(), ToneAxes::default());
        assert_eq!(session.history().snapshots(), [DEFAULT_TEXT]);

        store.save(TEXT_KEY, json!("draft")).unwrap();
        store.save(AXES_KEY, json!({"formal": 2.0, "friendly": 0.123})).unwrap();
        store.save(HISTORY_KEY, json!([])).unwrap();
        store.save(HISTORY_INDEX_KEY, json!(7)).unwrap();

        let session = load_session(&store);
        assert_eq!(session.text(), "draft");
        assert_eq!(session.axes(), ToneAxes { formal: 1.0, friendly: 0.12 });
        assert_eq!(session.history().snapshots(), ["draft"]);
        assert_eq!(session.history().index(), 0);
    }

    #[test]
    fn test_persist_only_touched_keys() {
        let store = MemoryStore::new();
        let mut session = Session::default();
        session.set_axes(ToneAxes::new(0.2, 0.9));
        let events = session.take_events();
        persist_events(&store, &session, &events).unwrap();

        assert_eq!(store.load(AXES_KEY), Some(json!({"formal": 0.2, "friendly": 0.9})));
        assert_eq!(store.load(TEXT_KEY), None);
        assert_eq!(store.load(HISTORY_KEY), None);
    }

    #[tokio::test]
    async fn test_apply_tone_updates_session_and_store() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(
            store.clone(),
            vec![(Duration::ZERO, fresh("Hello there. Please send the file."))],
        );
        controller.update(|s| s.set_text("Hello there. Send the file.")).unwrap();

        let applied = controller.apply_tone().await.unwrap().expect("rewrite applied");
        assert_eq!(
            applied.diff.iter().map(|r| r.kind).collect::<Vec<_>>(),
            vec![RunKind::Equal, RunKind::Removed, RunKind::Added]
        );

        let session = controller.snapshot();
        assert_eq!(session.text(), "Hello there. Please send the file.");
        assert_eq!(session.history().len(), 2);
        assert_eq!(session.last_diff(), Some(applied.diff.clone()));

        assert_eq!(store.load(TEXT_KEY), Some(json!("Hello there. Please send the file.")));
        assert_eq!(store.load(HISTORY_INDEX_KEY), Some(json!(1)));
    }

    #[tokio::test]
    async fn test_apply_label_sends_label_request() {
        let service = Arc::new(FakeService::replying("Yo, file please."));
        let cache = Arc::new(ResponseCache::new(Duration::from_secs(60)));
        let relay = ToneRelay::new(service.clone(), cache);
        let controller = ToneController::new(Arc::new(MemoryStore::new()), Arc::new(relay));
        controller.update(|s| s.set_text("Please send the file.")).unwrap();

        let applied = controller.apply_label("pirate").await.unwrap().unwrap();
        assert_eq!(applied.rewrite.text, "Yo, file please.");

        let prompts = service.prompts.lock().unwrap();
        assert!(prompts[0].prompt.starts_with("Rewrite the user text in a pirate tone."));
    }

    #[tokio::test]
    async fn test_blank_text_skips_rewrite() {
        let store = Arc::new(MemoryStore::new());
        // No scripted replies: any rewrite call would panic.
        let controller = controller(store, Vec::new());
        controller.update(|s| s.set_text("   ")).unwrap();

        assert_eq!(controller.apply_tone().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_superseded_rewrite_is_never_applied() {
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(controller(
            store,
            vec![
                (Duration::from_millis(200), fresh("slow result")),
                (Duration::from_millis(10), fresh("fast result")),
            ],
        ));
        controller.update(|s| s.set_text("draft")).unwrap();

        let slow = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.apply_tone().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = controller.apply_tone().await.unwrap();

        assert_eq!(fast.map(|a| a.rewrite.text), Some("fast result".to_string()));
        assert_eq!(slow.await.unwrap().unwrap(), None);

        let session = controller.snapshot();
        assert_eq!(session.text(), "fast result");
        // Typing does not record history; only rewrites do.
        assert_eq!(session.history().snapshots(), [DEFAULT_TEXT, "fast result"]);
    }

    #[tokio::test]
    async fn test_failed_rewrite_leaves_session_untouched() {
        let store = Arc::new(MemoryStore::new());
        let controller = controller(
            store.clone(),
            vec![(Duration::ZERO, Err(RelayError::Upstream("boom".to_string())))],
        );

        let err = controller.apply_tone().await.unwrap_err();
        assert!(matches!(err, ControllerError::Rewrite(RelayError::Upstream(_))));
        assert_eq!(controller.snapshot().history().len(), 1);
        assert_eq!(store.load(HISTORY_KEY), None);
    }

    #[tokio::test]
    async fn test_cancel_drops_in_flight_rewrite() {
        let store = Arc::new(MemoryStore::new());
        let controller = Arc::new(controller(
            store,
            vec![(Duration::from_secs(5), fresh("never"))],
        ));

        let pending = {
            let controller = Arc::clone(&controller);
            tokio::spawn(async move { controller.apply_tone().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.cancel();

        let outcome = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("cancel should end the rewrite promptly")
            .unwrap()
            .unwrap();
        assert_eq!(outcome, None);
        assert_eq!(controller.snapshot().text(), DEFAULT_TEXT);
    }
}
