//! Per-tab note session state and the remote-update arbiter.
//!
//! The session never talks to the store or the channel itself. Callers feed it edits,
//! load/save completions and remote events, and act on what it returns.

use crate::error::{ApiError, ApiErrorKind};
use crate::models::{Note, NoteId, NoteKey, SavedNote, Timestamp};
use crate::sync::bridge::BridgeEvent;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// First read from the store has not completed.
    Loading,
    /// Buffer equals the last confirmed save.
    Clean,
    /// Buffer has unsaved edits.
    Dirty,
    /// A write is in flight.
    Saving,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemoteUpdate {
    pub content: String,
    pub updated_at: Timestamp,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SaveRequest {
    pub epoch: u64,
    pub content: String,
    pub note_id: Option<NoteId>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IgnoreReason {
    Loading,
    /// Not newer than what this tab already confirmed (includes our own echo).
    Stale,
    /// Not newer than the update already queued.
    OlderThanQueued,
    AlreadyIdentified,
    OtherNote,
    OtherLesson,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RemoteOutcome {
    Applied,
    Deferred,
    AdoptedId,
    Cleared,
    Ignored(IgnoreReason),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EditOutcome {
    Unchanged,
    Dirty,
    /// The edit returned the buffer to its saved value; a queued update may have been applied.
    Clean { drained: Option<RemoteUpdate> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SaveOutcome {
    Saved {
        /// Set when this save created the row.
        created: Option<NoteId>,
        content: String,
        updated_at: Timestamp,
        drained: Option<RemoteUpdate>,
    },
    Failed(ApiError),
    /// Completion for a session that was reset while the write was in flight.
    Superseded,
}

/// What `begin_delete` asks the caller to do.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeleteStep {
    /// Nothing was ever stored; the buffer was cleared locally.
    Cleared,
    /// A create is in flight; the delete goes out once its id is known.
    AwaitingId,
    Remove(NoteId),
    /// A delete request is already out.
    InProgress,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Deletion {
    Idle,
    AwaitingId,
    Sent,
}

pub struct NoteSession {
    key: NoteKey,
    loading: bool,
    edited_while_loading: bool,
    content: String,
    last_saved_content: String,
    note_id: Option<NoteId>,
    updated_at: Option<Timestamp>,
    pending: Option<RemoteUpdate>,
    in_flight: Option<String>,
    /// Write that was in flight when the note was deleted, with the epoch it started in.
    orphaned: Option<(u64, String)>,
    /// Id of the row most recently deleted under this key.
    tombstone: Option<NoteId>,
    deletion: Deletion,
    edited_while_deleting: bool,
    /// Bumped on every reset so late completions can be recognised.
    epoch: u64,
}

impl NoteSession {
    pub fn new(key: NoteKey) -> Self {
        Self {
            key,
            loading: true,
            edited_while_loading: false,
            content: String::new(),
            last_saved_content: String::new(),
            note_id: None,
            updated_at: None,
            pending: None,
            in_flight: None,
            orphaned: None,
            tombstone: None,
            deletion: Deletion::Idle,
            edited_while_deleting: false,
            epoch: 0,
        }
    }

    pub fn key(&self) -> &NoteKey {
        &self.key
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn last_saved_content(&self) -> &str {
        &self.last_saved_content
    }

    pub fn note_id(&self) -> Option<&NoteId> {
        self.note_id.as_ref()
    }

    pub fn updated_at(&self) -> Option<Timestamp> {
        self.updated_at
    }

    pub fn pending(&self) -> Option<&RemoteUpdate> {
        self.pending.as_ref()
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion != Deletion::Idle
    }

    /// A delete is waiting for an id and the create it was waiting on has settled.
    pub fn wants_delete(&self) -> bool {
        self.deletion == Deletion::AwaitingId && self.in_flight.is_none()
    }

    pub fn is_dirty(&self) -> bool {
        self.content != self.last_saved_content
    }

    pub fn phase(&self) -> Phase {
        if self.loading {
            Phase::Loading
        } else if self.in_flight.is_some() {
            Phase::Saving
        } else if self.is_dirty() {
            Phase::Dirty
        } else {
            Phase::Clean
        }
    }

    pub fn finish_load(&mut self, loaded: Result<Option<Note>, ApiError>) -> Result<(), ApiError> {
        self.loading = false;
        let keep_edits = std::mem::take(&mut self.edited_while_loading);

        let note = match loaded {
            Ok(note) => note,
            Err(e) => {
                self.last_saved_content.clear();
                self.note_id = None;
                self.updated_at = None;
                if !keep_edits {
                    self.content.clear();
                }
                return Err(e);
            }
        };

        match note {
            Some(note) => {
                self.last_saved_content = note.content.clone();
                if !keep_edits {
                    self.content = note.content;
                }
                self.note_id = Some(note.id);
                self.updated_at = Some(note.updated_at);
            }
            None => {
                self.last_saved_content.clear();
                if !keep_edits {
                    self.content.clear();
                }
            }
        }
        Ok(())
    }

    pub fn set_content(&mut self, text: &str) -> EditOutcome {
        if text == self.content {
            return EditOutcome::Unchanged;
        }
        self.content = text.to_string();
        if self.is_deleting() {
            self.edited_while_deleting = true;
        }

        if self.loading {
            self.edited_while_loading = true;
            return EditOutcome::Dirty;
        }
        if self.is_dirty() {
            return EditOutcome::Dirty;
        }
        EditOutcome::Clean {
            drained: self.drain_pending(),
        }
    }

    /// Whether the debounced write should go out now.
    pub fn needs_save(&self) -> bool {
        if self.loading || self.in_flight.is_some() || self.is_deleting() || !self.is_dirty() {
            return false;
        }
        // Never create an empty note speculatively.
        !(self.content.is_empty() && self.note_id.is_none())
    }

    pub fn begin_save(&mut self) -> Option<SaveRequest> {
        if !self.needs_save() {
            return None;
        }
        self.in_flight = Some(self.content.clone());
        Some(SaveRequest {
            epoch: self.epoch,
            content: self.content.clone(),
            note_id: self.note_id.clone(),
        })
    }

    pub fn finish_save(&mut self, epoch: u64, result: Result<SavedNote, ApiError>) -> SaveOutcome {
        if epoch != self.epoch {
            return match self.orphaned.take_if(|(e, _)| *e == epoch) {
                Some((_, sent)) => self.finish_orphaned_save(sent, result),
                None => SaveOutcome::Superseded,
            };
        }
        let Some(sent) = self.in_flight.take() else {
            return SaveOutcome::Superseded;
        };

        let saved = match result {
            Ok(saved) => saved,
            Err(e) => {
                if e.kind == ApiErrorKind::NotFound && self.note_id.is_some() {
                    // Row deleted behind our back; the next write recreates it.
                    tracing::info!(
                        key = %self.key,
                        note_id = ?self.note_id,
                        "note row is gone; next write recreates it"
                    );
                    self.note_id = None;
                    self.updated_at = None;
                    self.last_saved_content.clear();
                }
                return SaveOutcome::Failed(e);
            }
        };

        let created = match &self.note_id {
            None => Some(saved.id.clone()),
            Some(_) => None,
        };
        self.note_id = Some(saved.id);
        self.updated_at = Some(self.updated_at.map_or(saved.updated_at, |t| t.max(saved.updated_at)));
        self.last_saved_content = sent.clone();

        let drained = if self.is_dirty() {
            None
        } else {
            self.drain_pending()
        };

        SaveOutcome::Saved {
            created,
            content: sent,
            updated_at: saved.updated_at,
            drained,
        }
    }

    /// A write that started before the note was deleted. If it created a new row after
    /// the delete, that row is live and this tab takes it over.
    fn finish_orphaned_save(
        &mut self,
        sent: String,
        result: Result<SavedNote, ApiError>,
    ) -> SaveOutcome {
        let Ok(saved) = result else {
            return SaveOutcome::Superseded;
        };
        let revived = self.note_id.is_none()
            && self.tombstone.as_ref().is_some_and(|gone| *gone != saved.id)
            && self.is_newer(saved.updated_at);
        if !revived {
            return SaveOutcome::Superseded;
        }

        tracing::debug!(
            key = %self.key,
            note_id = %saved.id,
            "write after delete recreated the note"
        );
        if !self.is_dirty() {
            self.content = sent.clone();
        }
        self.last_saved_content = sent.clone();
        self.note_id = Some(saved.id.clone());
        self.updated_at = Some(saved.updated_at);
        SaveOutcome::Saved {
            created: Some(saved.id),
            content: sent,
            updated_at: saved.updated_at,
            drained: None,
        }
    }

    pub fn begin_delete(&mut self) -> DeleteStep {
        match (self.deletion, &self.note_id) {
            (Deletion::Sent, _) => DeleteStep::InProgress,
            (_, Some(id)) => {
                let id = id.clone();
                self.deletion = Deletion::Sent;
                DeleteStep::Remove(id)
            }
            (_, None) if self.in_flight.is_some() => {
                self.deletion = Deletion::AwaitingId;
                DeleteStep::AwaitingId
            }
            (_, None) => {
                self.clear(None);
                DeleteStep::Cleared
            }
        }
    }

    /// Settles a delete of `deleted`. `Ok(false)` means a sibling recreated the note while
    /// the request was out and this tab now tracks the new row instead. Text typed while
    /// the delete was pending survives as an unsaved draft.
    pub fn finish_delete(
        &mut self,
        deleted: &NoteId,
        result: Result<(), ApiError>,
    ) -> Result<bool, ApiError> {
        let typed = std::mem::take(&mut self.edited_while_deleting);
        self.deletion = Deletion::Idle;
        result?;

        if self.note_id.as_ref().is_some_and(|id| id != deleted) {
            return Ok(false);
        }
        let keep = typed.then(|| self.content.clone());
        self.clear(Some(deleted.clone()));
        if let Some(text) = keep {
            self.content = text;
        }
        Ok(true)
    }

    pub fn on_remote(&mut self, event: BridgeEvent) -> RemoteOutcome {
        match event {
            BridgeEvent::ContentChanged {
                content,
                updated_at,
            } => self.on_remote_content(RemoteUpdate {
                content,
                updated_at,
            }),
            BridgeEvent::NoteCreated { note_id, lesson_id } => {
                if lesson_id != self.key.lesson_id {
                    return RemoteOutcome::Ignored(IgnoreReason::OtherLesson);
                }
                // The row we are deleting may already have been replaced by a sibling.
                let replaces_doomed = self.deletion == Deletion::Sent
                    && self.note_id.as_ref().is_some_and(|ours| *ours != note_id);
                if self.note_id.is_some() && !replaces_doomed {
                    return RemoteOutcome::Ignored(IgnoreReason::AlreadyIdentified);
                }
                self.note_id = Some(note_id);
                RemoteOutcome::AdoptedId
            }
            BridgeEvent::NoteDeleted { note_id } => {
                if self.note_id.as_ref().is_some_and(|ours| *ours != note_id) {
                    return RemoteOutcome::Ignored(IgnoreReason::OtherNote);
                }
                self.clear(Some(note_id));
                RemoteOutcome::Cleared
            }
        }
    }

    /// Drops buffer, identity and queue after the note was deleted.
    fn clear(&mut self, deleted: Option<NoteId>) {
        self.content.clear();
        self.last_saved_content.clear();
        self.note_id = None;
        self.updated_at = None;
        self.pending = None;
        if let Some(sent) = self.in_flight.take() {
            self.orphaned = Some((self.epoch, sent));
        }
        if deleted.is_some() {
            self.tombstone = deleted;
        }
        self.deletion = Deletion::Idle;
        self.edited_while_loading = false;
        self.edited_while_deleting = false;
        self.epoch += 1;
    }

    fn on_remote_content(&mut self, update: RemoteUpdate) -> RemoteOutcome {
        match self.phase() {
            Phase::Loading => RemoteOutcome::Ignored(IgnoreReason::Loading),
            _ if !self.is_newer(update.updated_at) => RemoteOutcome::Ignored(IgnoreReason::Stale),
            Phase::Clean => {
                self.apply(update);
                RemoteOutcome::Applied
            }
            Phase::Dirty | Phase::Saving => {
                if self
                    .pending
                    .as_ref()
                    .is_some_and(|q| update.updated_at <= q.updated_at)
                {
                    return RemoteOutcome::Ignored(IgnoreReason::OlderThanQueued);
                }
                self.pending = Some(update);
                RemoteOutcome::Deferred
            }
        }
    }

    fn is_newer(&self, ts: Timestamp) -> bool {
        self.updated_at.is_none_or(|local| ts > local)
    }

    fn apply(&mut self, update: RemoteUpdate) {
        self.content = update.content.clone();
        self.last_saved_content = update.content;
        self.updated_at = Some(update.updated_at);
        if self
            .pending
            .as_ref()
            .is_some_and(|q| q.updated_at <= update.updated_at)
        {
            self.pending = None;
        }
    }

    /// Applies the queued update if it is still newer than our confirmed state.
    fn drain_pending(&mut self) -> Option<RemoteUpdate> {
        let queued = self.pending.take()?;
        if !self.is_newer(queued.updated_at) {
            tracing::debug!(
                key = %self.key,
                queued_at = %queued.updated_at,
                "discarding superseded queued update"
            );
            return None;
        }
        self.apply(queued.clone());
        Some(queued)
    }
}
