use crate::error::{ApiError, ApiErrorKind};
use crate::models::{Note, NoteId, NoteKey, SavedNote, Timestamp};
use crate::store::NoteStore;
use crate::sync::bridge::{BridgeEvent, CrossTabBridge, Subscription};
use crate::sync::config::SyncConfig;
use crate::sync::runtime::{Debouncer, Scheduler, Spawner};
use crate::sync::session::{
    DeleteStep, EditOutcome, NoteSession, Phase, RemoteOutcome, RemoteUpdate, SaveOutcome,
};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// Snapshot of what the UI shows for the current lesson note.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NoteView {
    pub key: Option<NoteKey>,
    pub content: String,
    pub note_id: Option<NoteId>,
    pub last_saved: Option<Timestamp>,
    pub is_loading: bool,
    pub is_dirty: bool,
    pub is_saving: bool,
    /// A remote update was just written into the buffer.
    pub is_syncing: bool,
    pub error: Option<String>,
}

type Observer = Rc<dyn Fn(&NoteView)>;

struct Active {
    session: NoteSession,
    course_id: String,
    retry_attempts: u32,
    _subscription: Option<Subscription>,
}

#[derive(Default)]
struct State {
    active: Option<Active>,
    /// Bumped on every open/close; async completions carry the value they started with.
    generation: u64,
    syncing: bool,
    error: Option<String>,
}

struct Inner<S: NoteStore + 'static> {
    store: Rc<S>,
    bridge: CrossTabBridge,
    spawner: Rc<dyn Spawner>,
    config: SyncConfig,
    autosave: Debouncer,
    grace: Debouncer,
    state: RefCell<State>,
    observer: RefCell<Option<Observer>>,
}

/// Autosaving, cross-tab synchronised editor for one lesson note at a time.
///
/// Local-first: edits land in the buffer immediately, are written after a quiet period,
/// and are announced to sibling tabs once the store confirms them. Remote updates that
/// arrive while the buffer holds unsaved edits are queued, never applied over them.
pub struct NoteEditor<S: NoteStore + 'static> {
    inner: Rc<Inner<S>>,
}

impl<S: NoteStore + 'static> Clone for NoteEditor<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: NoteStore + 'static> NoteEditor<S> {
    pub fn new(
        store: Rc<S>,
        bridge: CrossTabBridge,
        scheduler: Rc<dyn Scheduler>,
        spawner: Rc<dyn Spawner>,
        config: SyncConfig,
    ) -> Self {
        let inner = Inner {
            store,
            bridge,
            spawner,
            config,
            autosave: Debouncer::new(scheduler.clone(), config.debounce_ms),
            grace: Debouncer::new(scheduler, config.remote_grace_ms),
            state: RefCell::new(State::default()),
            observer: RefCell::new(None),
        };
        Self {
            inner: Rc::new(inner),
        }
    }

    /// Called with a fresh snapshot after every visible state change.
    pub fn set_observer(&self, f: impl Fn(&NoteView) + 'static) {
        *self.inner.observer.borrow_mut() = Some(Rc::new(f));
    }

    pub fn view(&self) -> NoteView {
        self.inner.view()
    }

    pub fn tab_id(&self) -> &str {
        &self.inner.bridge.tab_id().0
    }

    /// Points the editor at `key`. Reopening the current key is a no-op; any other key
    /// drops the previous session (unsaved edits included) before loading.
    pub fn open(&self, key: NoteKey, course_id: impl Into<String>) {
        Inner::open(&self.inner, key, course_id.into());
    }

    /// Tears the session down without flushing.
    pub fn close(&self) {
        self.inner.reset();
        self.inner.notify();
    }

    pub fn update_content(&self, text: &str) {
        Inner::update_content(&self.inner, text);
    }

    /// Writes now instead of waiting for the quiet period.
    pub fn flush(&self) {
        self.inner.autosave.cancel();
        Inner::flush(&self.inner);
    }

    pub fn delete_note(&self) {
        Inner::delete_note(&self.inner);
    }
}

impl<S: NoteStore + 'static> Inner<S> {
    fn view(&self) -> NoteView {
        let state = self.state.borrow();
        let Some(active) = state.active.as_ref() else {
            return NoteView {
                error: state.error.clone(),
                ..NoteView::default()
            };
        };
        let s = &active.session;
        NoteView {
            key: Some(s.key().clone()),
            content: s.content().to_string(),
            note_id: s.note_id().cloned(),
            last_saved: s.updated_at(),
            is_loading: s.phase() == Phase::Loading,
            is_dirty: s.is_dirty(),
            is_saving: s.phase() == Phase::Saving,
            is_syncing: state.syncing,
            error: state.error.clone(),
        }
    }

    fn notify(&self) {
        let observer = self.observer.borrow().clone();
        if let Some(f) = observer {
            f(&self.view());
        }
    }

    fn reset(&self) {
        self.autosave.cancel();
        self.grace.cancel();
        let mut state = self.state.borrow_mut();
        state.generation += 1;
        state.active = None;
        state.syncing = false;
        state.error = None;
    }

    fn open(this: &Rc<Self>, key: NoteKey, course_id: String) {
        let same = this
            .state
            .borrow()
            .active
            .as_ref()
            .is_some_and(|a| *a.session.key() == key);
        if same {
            return;
        }

        // Clear before load so the previous lesson never shows under the new one.
        this.reset();
        if key.is_blank() {
            this.notify();
            return;
        }

        let generation = this.state.borrow().generation;
        tracing::info!(user_id = %key.user_id, lesson_id = %key.lesson_id, "opening lesson note");

        let weak = Rc::downgrade(this);
        let subscription = this.bridge.subscribe(&key, move |event| {
            if let Some(inner) = weak.upgrade() {
                Inner::on_remote(&inner, generation, event);
            }
        });

        this.state.borrow_mut().active = Some(Active {
            session: NoteSession::new(key.clone()),
            course_id,
            retry_attempts: 0,
            _subscription: subscription,
        });
        this.notify();

        let store = this.store.clone();
        let weak = Rc::downgrade(this);
        this.spawner.spawn(Box::pin(async move {
            let loaded = store.load_note(&key).await;
            if let Some(inner) = weak.upgrade() {
                Inner::finish_load(&inner, generation, loaded);
            }
        }));
    }

    fn finish_load(this: &Rc<Self>, generation: u64, loaded: Result<Option<Note>, ApiError>) {
        let needs_save = {
            let mut guard = this.state.borrow_mut();
            let state = &mut *guard;
            if state.generation != generation {
                tracing::debug!("dropping load result for a closed session");
                return;
            }
            let Some(active) = state.active.as_mut() else {
                return;
            };
            let key = active.session.key().clone();
            let res = active.session.finish_load(loaded);
            let needs_save = active.session.needs_save();
            match res {
                Ok(()) => {
                    tracing::debug!(
                        user_id = %key.user_id,
                        lesson_id = %key.lesson_id,
                        note_id = ?active.session.note_id(),
                        "lesson note loaded"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        user_id = %key.user_id,
                        lesson_id = %key.lesson_id,
                        error = %e,
                        "loading lesson note failed; starting empty"
                    );
                    state.error = Some(e.to_string());
                }
            }
            needs_save
        };

        if needs_save {
            Self::schedule_autosave(this);
        }
        this.notify();
    }

    fn update_content(this: &Rc<Self>, text: &str) {
        let outcome = {
            let mut state = this.state.borrow_mut();
            let Some(active) = state.active.as_mut() else {
                return;
            };
            let outcome = active.session.set_content(text);
            if outcome == EditOutcome::Dirty {
                active.retry_attempts = 0;
            }
            outcome
        };

        match outcome {
            EditOutcome::Unchanged => return,
            EditOutcome::Dirty => Self::schedule_autosave(this),
            EditOutcome::Clean { drained } => {
                this.autosave.cancel();
                if let Some(update) = drained {
                    Self::applied_remote(this, &update);
                }
            }
        }
        this.notify();
    }

    fn schedule_autosave(this: &Rc<Self>) {
        let weak = Rc::downgrade(this);
        this.autosave.trigger(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                Inner::flush(&inner);
            }
        }));
    }

    fn schedule_retry(this: &Rc<Self>, delay_ms: u32) {
        let weak = Rc::downgrade(this);
        this.autosave.trigger_after(
            delay_ms,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Inner::flush(&inner);
                }
            }),
        );
    }

    fn flush(this: &Rc<Self>) {
        let started = {
            let mut guard = this.state.borrow_mut();
            let state = &mut *guard;
            let generation = state.generation;
            let Some(active) = state.active.as_mut() else {
                return;
            };
            active.session.begin_save().map(|req| {
                (
                    req,
                    active.session.key().clone(),
                    active.course_id.clone(),
                    generation,
                )
            })
        };
        let Some((req, key, course_id, generation)) = started else {
            return;
        };

        tracing::debug!(
            user_id = %key.user_id,
            lesson_id = %key.lesson_id,
            note_id = ?req.note_id,
            "saving lesson note"
        );
        this.notify();

        let store = this.store.clone();
        let weak: Weak<Self> = Rc::downgrade(this);
        this.spawner.spawn(Box::pin(async move {
            let result = match &req.note_id {
                None => store.create_note(&key, &course_id, &req.content).await,
                Some(id) => store.update_note(id, &req.content).await,
            };
            if let Some(inner) = weak.upgrade() {
                Inner::finish_save(&inner, generation, req.epoch, result);
            }
        }));
    }

    fn finish_save(
        this: &Rc<Self>,
        generation: u64,
        epoch: u64,
        result: Result<SavedNote, ApiError>,
    ) {
        let (key, outcome, retry_delay, needs_save, wants_delete) = {
            let mut guard = this.state.borrow_mut();
            let state = &mut *guard;
            if state.generation != generation {
                tracing::debug!("dropping save result for a closed session");
                return;
            }
            let Some(active) = state.active.as_mut() else {
                return;
            };
            let key = active.session.key().clone();
            let outcome = active.session.finish_save(epoch, result);
            let needs_save = active.session.needs_save();

            let mut retry_delay = None;
            match &outcome {
                SaveOutcome::Saved { .. } => {
                    active.retry_attempts = 0;
                    state.error = None;
                }
                SaveOutcome::Failed(e) => {
                    if e.is_retryable() {
                        active.retry_attempts += 1;
                        retry_delay = this.config.retry.delay_ms(active.retry_attempts);
                    }
                    state.error = Some(e.to_string());
                }
                SaveOutcome::Superseded => {}
            }
            let wants_delete = active.session.wants_delete();
            (key, outcome, retry_delay, needs_save, wants_delete)
        };

        match outcome {
            SaveOutcome::Saved {
                created,
                content,
                updated_at,
                drained,
            } => {
                tracing::debug!(
                    user_id = %key.user_id,
                    lesson_id = %key.lesson_id,
                    updated_at = %updated_at,
                    "lesson note saved"
                );
                if let Some(note_id) = created {
                    this.bridge.publish(
                        &key,
                        &BridgeEvent::NoteCreated {
                            note_id,
                            lesson_id: key.lesson_id.clone(),
                        },
                    );
                }
                this.bridge
                    .publish(&key, &BridgeEvent::ContentChanged { content, updated_at });

                if let Some(update) = drained {
                    Self::applied_remote(this, &update);
                }
                if needs_save {
                    Self::schedule_autosave(this);
                }
            }
            SaveOutcome::Failed(e) => {
                tracing::warn!(
                    user_id = %key.user_id,
                    lesson_id = %key.lesson_id,
                    error = %e,
                    "saving lesson note failed; still unsaved"
                );
                match retry_delay {
                    Some(ms) => Self::schedule_retry(this, ms),
                    None if e.is_retryable() => {
                        tracing::warn!(lesson_id = %key.lesson_id, "giving up retries until next edit");
                    }
                    None if e.kind == ApiErrorKind::NotFound && needs_save => {
                        Self::schedule_autosave(this);
                    }
                    None => {}
                }
            }
            SaveOutcome::Superseded => {
                tracing::debug!(lesson_id = %key.lesson_id, "save finished after note was reset");
                if needs_save {
                    Self::schedule_autosave(this);
                }
            }
        }
        if wants_delete {
            Self::delete_note(this);
        }
        this.notify();
    }

    fn on_remote(this: &Rc<Self>, generation: u64, event: BridgeEvent) {
        let (key, outcome) = {
            let mut guard = this.state.borrow_mut();
            let state = &mut *guard;
            if state.generation != generation {
                return;
            }
            let Some(active) = state.active.as_mut() else {
                return;
            };
            let key = active.session.key().clone();
            let outcome = active.session.on_remote(event);
            let applied = match &outcome {
                RemoteOutcome::Applied => active.session.updated_at().map(|updated_at| RemoteUpdate {
                    content: active.session.content().to_string(),
                    updated_at,
                }),
                _ => None,
            };
            (key, (outcome, applied))
        };

        match outcome {
            (RemoteOutcome::Applied, Some(update)) => Self::applied_remote(this, &update),
            (RemoteOutcome::Applied, None) => {}
            (RemoteOutcome::Deferred, _) => {
                tracing::debug!(lesson_id = %key.lesson_id, "buffer dirty; queued remote update");
            }
            (RemoteOutcome::AdoptedId, _) => {
                tracing::debug!(lesson_id = %key.lesson_id, "adopted note id from sibling tab");
            }
            (RemoteOutcome::Cleared, _) => {
                this.autosave.cancel();
                tracing::info!(lesson_id = %key.lesson_id, "lesson note deleted elsewhere");
            }
            (RemoteOutcome::Ignored(reason), _) => {
                tracing::trace!(lesson_id = %key.lesson_id, ?reason, "ignored remote event");
            }
        }
        this.notify();
    }

    fn applied_remote(this: &Rc<Self>, update: &RemoteUpdate) {
        tracing::debug!(updated_at = %update.updated_at, "applied remote note content");
        this.state.borrow_mut().syncing = true;
        let weak = Rc::downgrade(this);
        this.grace.trigger(Box::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.state.borrow_mut().syncing = false;
                inner.notify();
            }
        }));
    }

    fn delete_note(this: &Rc<Self>) {
        let (key, step, generation) = {
            let mut state = this.state.borrow_mut();
            let generation = state.generation;
            let Some(active) = state.active.as_mut() else {
                return;
            };
            (active.session.key().clone(), active.session.begin_delete(), generation)
        };
        this.autosave.cancel();

        let note_id = match step {
            DeleteStep::Remove(id) => id,
            DeleteStep::Cleared => {
                this.state.borrow_mut().error = None;
                this.notify();
                return;
            }
            DeleteStep::AwaitingId => {
                tracing::debug!(lesson_id = %key.lesson_id, "delete waits for the pending create");
                this.notify();
                return;
            }
            DeleteStep::InProgress => return,
        };
        this.notify();

        let store = this.store.clone();
        let weak = Rc::downgrade(this);
        this.spawner.spawn(Box::pin(async move {
            let res = store.delete_note(&note_id).await;
            if let Some(inner) = weak.upgrade() {
                Inner::finish_delete(&inner, generation, key, note_id, res);
            }
        }));
    }

    fn finish_delete(
        this: &Rc<Self>,
        generation: u64,
        key: NoteKey,
        note_id: NoteId,
        res: Result<(), ApiError>,
    ) {
        let (outcome, needs_save) = {
            let mut guard = this.state.borrow_mut();
            let state = &mut *guard;
            if state.generation != generation {
                return;
            }
            let Some(active) = state.active.as_mut() else {
                return;
            };
            let typed = active.session.is_dirty();
            let outcome = active.session.finish_delete(&note_id, res);
            match &outcome {
                Ok(_) => state.error = None,
                Err(e) => state.error = Some(e.to_string()),
            }
            if typed && outcome == Ok(true) {
                tracing::debug!(lesson_id = %key.lesson_id, "edits made during delete kept as a new draft");
            }
            (outcome, active.session.needs_save())
        };

        match outcome {
            Ok(cleared) => {
                this.bridge.publish(&key, &BridgeEvent::NoteDeleted { note_id });
                if !cleared {
                    tracing::info!(lesson_id = %key.lesson_id, "note was recreated elsewhere during delete");
                }
            }
            Err(e) => {
                tracing::warn!(lesson_id = %key.lesson_id, error = %e, "deleting lesson note failed");
            }
        }
        if needs_save {
            Self::schedule_autosave(this);
        }
        this.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryNoteStore;
    use crate::sync::bridge::{LocalHub, TabId, topic_for};
    use crate::sync::runtime::VirtualTimers;
    use futures::executor::LocalPool;

    struct Harness {
        pool: LocalPool,
        timers: VirtualTimers,
        store: MemoryNoteStore,
        hub: LocalHub,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                pool: LocalPool::new(),
                timers: VirtualTimers::new(),
                store: MemoryNoteStore::with_clock(1_000),
                hub: LocalHub::new(),
            }
        }

        fn tab(&self, name: &str) -> NoteEditor<MemoryNoteStore> {
            NoteEditor::new(
                Rc::new(self.store.clone()),
                CrossTabBridge::with_tab_id(TabId(name.to_string()), Rc::new(self.hub.clone())),
                Rc::new(self.timers.clone()),
                Rc::new(self.pool.spawner()),
                SyncConfig::default(),
            )
        }

        fn settle(&mut self) {
            self.pool.run_until_stalled();
        }

        fn wait(&mut self, ms: u64) {
            self.timers.advance(ms);
            self.pool.run_until_stalled();
        }
    }

    fn key() -> NoteKey {
        NoteKey::new("u1", "l1")
    }

    #[test]
    fn test_burst_of_edits_writes_once_with_last_value() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        for text in ["H", "He", "Hel", "Hell", "Hello"] {
            tab.update_content(text);
            h.wait(200);
        }
        assert_eq!(h.store.write_count(), 0);
        assert!(tab.view().is_dirty);

        h.wait(1_000);
        assert_eq!(h.store.write_count(), 1);
        assert_eq!(h.store.get(&key()).map(|n| n.content), Some("Hello".to_string()));
        assert!(!tab.view().is_dirty);
    }

    #[test]
    fn test_edit_back_to_saved_value_never_writes() {
        let mut h = Harness::new();
        h.store.insert(&key(), "c1", "saved");
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        tab.update_content("saved!");
        tab.update_content("saved");
        h.wait(5_000);

        assert_eq!(h.store.write_count(), 0);
    }

    #[test]
    fn test_failed_save_stays_unsaved_and_retries_with_backoff() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        h.store.fail_next(ApiError::network("offline"));
        tab.update_content("draft");
        h.wait(1_000);

        let v = tab.view();
        assert!(v.is_dirty);
        assert_eq!(v.error.as_deref(), Some("offline"));
        assert_eq!(h.store.write_count(), 0);

        h.wait(2_000);
        let v = tab.view();
        assert!(!v.is_dirty);
        assert!(v.error.is_none());
        assert_eq!(h.store.get(&key()).map(|n| n.content), Some("draft".to_string()));
    }

    #[test]
    fn test_retries_stop_after_max_attempts_until_next_edit() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        for _ in 0..6 {
            h.store.fail_next(ApiError::network("offline"));
        }
        tab.update_content("draft");
        h.wait(1_000);
        for backoff in [2_000, 4_000, 8_000, 16_000, 30_000] {
            h.wait(backoff);
        }
        assert_eq!(h.timers.pending(), 0);

        h.wait(120_000);
        assert_eq!(h.store.write_count(), 0);
        assert!(tab.view().is_dirty);

        // A fresh edit starts the backoff over from the first step.
        h.store.fail_next(ApiError::network("offline"));
        tab.update_content("draft!");
        h.wait(1_000);
        assert_eq!(h.store.write_count(), 0);
        h.wait(2_000);
        assert_eq!(h.store.write_count(), 1);
        assert_eq!(h.store.get(&key()).map(|n| n.content), Some("draft!".to_string()));
    }

    #[test]
    fn test_row_deleted_elsewhere_is_recreated_on_next_save() {
        let mut h = Harness::new();
        let seeded = h.store.insert(&key(), "c1", "seeded");
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        futures::executor::block_on(h.store.delete_note(&seeded.id)).expect("delete");
        tab.update_content("new text");
        h.wait(1_000);
        let v = tab.view();
        assert!(v.is_dirty);
        assert!(v.note_id.is_none());

        h.wait(1_000);
        let v = tab.view();
        let stored = h.store.get(&key()).expect("row should be recreated");
        assert_eq!(stored.content, "new text");
        assert_eq!(v.note_id, Some(stored.id));
        assert!(!v.is_dirty);
        assert!(v.error.is_none());
    }

    #[test]
    fn test_unauthorized_save_is_not_retried() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        h.store.fail_next(ApiError::unauthorized());
        tab.update_content("draft");
        h.wait(60_000);

        assert!(tab.view().is_dirty);
        assert_eq!(h.store.write_count(), 0);
    }

    #[test]
    fn test_load_failure_starts_empty_and_can_still_create() {
        let mut h = Harness::new();
        h.store.fail_next(ApiError::network("offline"));
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        let v = tab.view();
        assert!(!v.is_loading);
        assert_eq!(v.content, "");
        assert!(v.error.is_some());

        tab.update_content("fresh");
        h.wait(1_000);
        assert_eq!(h.store.row_count(&key()), 1);
    }

    #[test]
    fn test_switching_lessons_resets_and_drops_unsaved_draft() {
        let mut h = Harness::new();
        let key_a = key();
        let key_b = NoteKey::new("u1", "l2");
        h.store.insert(&key_a, "c1", "saved-A");
        let tab = h.tab("t1");

        let seen = Rc::new(RefCell::new(Vec::<String>::new()));
        let s = seen.clone();
        tab.set_observer(move |v| {
            if v.key.as_ref().is_some_and(|k| k.lesson_id == "l2") {
                s.borrow_mut().push(v.content.clone());
            }
        });

        tab.open(key_a.clone(), "c1");
        h.settle();
        tab.update_content("draft-A");

        tab.open(key_b.clone(), "c1");
        h.settle();
        assert_eq!(tab.view().content, "");
        assert!(seen.borrow().iter().all(|c| c != "draft-A"));

        h.wait(5_000);
        tab.open(key_a.clone(), "c1");
        h.settle();
        assert_eq!(tab.view().content, "saved-A");
        assert_eq!(h.store.write_count(), 0);
    }

    #[test]
    fn test_stale_load_for_previous_lesson_is_ignored() {
        let mut h = Harness::new();
        h.store.insert(&key(), "c1", "lesson one");
        let tab = h.tab("t1");

        tab.open(key(), "c1");
        tab.open(NoteKey::new("u1", "l2"), "c1");
        h.settle();

        let v = tab.view();
        assert_eq!(v.key.map(|k| k.lesson_id), Some("l2".to_string()));
        assert_eq!(v.content, "");
    }

    #[test]
    fn test_close_unsubscribes_and_cancels_autosave() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();
        assert_eq!(h.hub.subscriber_count(&topic_for(&key())), 1);

        tab.update_content("never saved");
        tab.close();
        h.wait(5_000);

        assert_eq!(h.hub.subscriber_count(&topic_for(&key())), 0);
        assert_eq!(h.store.write_count(), 0);
        assert_eq!(tab.view(), NoteView::default());
    }

    #[test]
    fn test_remote_apply_sets_syncing_for_grace_window() {
        let mut h = Harness::new();
        let t1 = h.tab("t1");
        let t2 = h.tab("t2");
        t1.open(key(), "c1");
        t2.open(key(), "c1");
        h.settle();

        t1.update_content("from t1");
        h.wait(1_000);

        let v = t2.view();
        assert_eq!(v.content, "from t1");
        assert!(v.is_syncing);

        // UI echo of the applied value is not a user edit.
        t2.update_content("from t1");
        assert!(!t2.view().is_dirty);

        h.wait(200);
        assert!(!t2.view().is_syncing);
    }

    #[test]
    fn test_delete_clears_siblings() {
        let mut h = Harness::new();
        h.store.insert(&key(), "c1", "doomed");
        let t1 = h.tab("t1");
        let t2 = h.tab("t2");
        t1.open(key(), "c1");
        t2.open(key(), "c1");
        h.settle();
        assert_eq!(t2.view().content, "doomed");

        t1.delete_note();
        h.settle();

        assert!(h.store.get(&key()).is_none());
        for tab in [&t1, &t2] {
            let v = tab.view();
            assert_eq!(v.content, "");
            assert!(v.note_id.is_none());
        }
    }

    #[test]
    fn test_typing_while_delete_is_pending_never_writes_doomed_row() {
        let mut h = Harness::new();
        h.store.insert(&key(), "c1", "doomed");
        let t1 = h.tab("t1");
        let t2 = h.tab("t2");
        t1.open(key(), "c1");
        t2.open(key(), "c1");
        h.settle();

        t1.delete_note();
        t1.update_content("after delete");
        h.timers.advance(1_000);
        assert_eq!(h.store.write_count(), 0);

        h.settle();
        assert!(h.store.get(&key()).is_none());
        let v = t1.view();
        assert_eq!(v.content, "after delete");
        assert!(v.note_id.is_none());
        assert!(v.is_dirty);
        assert_eq!(t2.view().content, "");

        h.wait(1_000);
        assert_eq!(h.store.row_count(&key()), 1);
        assert_eq!(
            h.store.get(&key()).map(|n| n.content),
            Some("after delete".to_string())
        );
        assert_eq!(t2.view().content, "after delete");
    }

    #[test]
    fn test_delete_during_first_save_removes_created_row() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        tab.update_content("oops");
        h.timers.advance(1_000);
        assert!(tab.view().is_saving);
        tab.delete_note();

        h.settle();
        assert!(h.store.get(&key()).is_none());
        let v = tab.view();
        assert_eq!(v.content, "");
        assert!(v.note_id.is_none());
    }

    #[test]
    fn test_typing_during_save_schedules_followup_write() {
        let mut h = Harness::new();
        let tab = h.tab("t1");
        tab.open(key(), "c1");
        h.settle();

        tab.update_content("first");
        h.timers.advance(1_000);
        assert!(tab.view().is_saving);
        tab.update_content("first and more");
        h.settle();
        assert!(tab.view().is_dirty);

        h.wait(1_000);
        assert_eq!(
            h.store.get(&key()).map(|n| n.content),
            Some("first and more".to_string())
        );
        assert_eq!(h.store.write_count(), 2);
    }
}
