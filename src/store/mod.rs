use crate::error::{ApiError, ApiResult};
use crate::models::{Note, NoteId, NoteKey, SavedNote, Timestamp};
use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

/// Persistence contract the note engine depends on.
///
/// Implementations run on a single-threaded (browser) executor, so futures are not `Send`.
#[allow(async_fn_in_trait)]
pub trait NoteStore {
    async fn load_note(&self, key: &NoteKey) -> ApiResult<Option<Note>>;

    /// Creates the note for `key`. A second create for an existing key resolves to an
    /// update of that row, never to a duplicate.
    async fn create_note(&self, key: &NoteKey, course_id: &str, content: &str)
        -> ApiResult<SavedNote>;

    async fn update_note(&self, id: &NoteId, content: &str) -> ApiResult<SavedNote>;

    async fn delete_note(&self, id: &NoteId) -> ApiResult<()>;
}

#[derive(Default)]
struct MemoryInner {
    rows: BTreeMap<NoteId, Note>,
    clock_ms: i64,
    next_id: u64,
    writes: usize,
    failures: VecDeque<ApiError>,
}

impl MemoryInner {
    fn tick(&mut self) -> Timestamp {
        self.clock_ms += 1;
        Timestamp(self.clock_ms)
    }

    fn take_failure(&mut self) -> ApiResult<()> {
        match self.failures.pop_front() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn find_by_key(&self, key: &NoteKey) -> Option<&Note> {
        self.rows
            .values()
            .find(|n| n.user_id == key.user_id && n.lesson_id == key.lesson_id)
    }
}

/// In-process store with a monotonic server clock and upsert-on-create.
///
/// Clones share the same rows, so several editors (tabs) can point at one instance.
#[derive(Clone, Default)]
pub struct MemoryNoteStore {
    inner: Rc<RefCell<MemoryInner>>,
}

impl MemoryNoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts the server clock at `ms`; each write advances it by one.
    pub fn with_clock(ms: i64) -> Self {
        let s = Self::default();
        s.inner.borrow_mut().clock_ms = ms;
        s
    }

    pub fn advance_clock(&self, ms: i64) {
        self.inner.borrow_mut().clock_ms += ms;
    }

    /// Queues an error returned by the next store call instead of doing the work.
    pub fn fail_next(&self, e: ApiError) {
        self.inner.borrow_mut().failures.push_back(e);
    }

    /// Seeds a row directly, bypassing the write counter.
    pub fn insert(&self, key: &NoteKey, course_id: &str, content: &str) -> Note {
        let mut inner = self.inner.borrow_mut();
        inner.next_id += 1;
        let note = Note {
            id: NoteId::new(format!("note-{}", inner.next_id)),
            user_id: key.user_id.clone(),
            lesson_id: key.lesson_id.clone(),
            course_id: course_id.to_string(),
            content: content.to_string(),
            updated_at: inner.tick(),
        };
        inner.rows.insert(note.id.clone(), note.clone());
        note
    }

    pub fn get(&self, key: &NoteKey) -> Option<Note> {
        self.inner.borrow().find_by_key(key).cloned()
    }

    /// Number of rows stored for `key`.
    pub fn row_count(&self, key: &NoteKey) -> usize {
        self.inner
            .borrow()
            .rows
            .values()
            .filter(|n| n.user_id == key.user_id && n.lesson_id == key.lesson_id)
            .count()
    }

    /// Number of successful creates and updates.
    pub fn write_count(&self) -> usize {
        self.inner.borrow().writes
    }
}

impl NoteStore for MemoryNoteStore {
    async fn load_note(&self, key: &NoteKey) -> ApiResult<Option<Note>> {
        let mut inner = self.inner.borrow_mut();
        inner.take_failure()?;
        Ok(inner.find_by_key(key).cloned())
    }

    async fn create_note(
        &self,
        key: &NoteKey,
        course_id: &str,
        content: &str,
    ) -> ApiResult<SavedNote> {
        let mut inner = self.inner.borrow_mut();
        inner.take_failure()?;
        inner.writes += 1;
        let updated_at = inner.tick();

        let existing = inner.find_by_key(key).map(|n| n.id.clone());
        if let Some(id) = existing {
            if let Some(row) = inner.rows.get_mut(&id) {
                row.content = content.to_string();
                row.updated_at = updated_at;
            }
            return Ok(SavedNote { id, updated_at });
        }

        inner.next_id += 1;
        let id = NoteId::new(format!("note-{}", inner.next_id));
        inner.rows.insert(
            id.clone(),
            Note {
                id: id.clone(),
                user_id: key.user_id.clone(),
                lesson_id: key.lesson_id.clone(),
                course_id: course_id.to_string(),
                content: content.to_string(),
                updated_at,
            },
        );
        Ok(SavedNote { id, updated_at })
    }

    async fn update_note(&self, id: &NoteId, content: &str) -> ApiResult<SavedNote> {
        let mut inner = self.inner.borrow_mut();
        inner.take_failure()?;
        if !inner.rows.contains_key(id) {
            return Err(ApiError::not_found(format!("note {id}")));
        }
        inner.writes += 1;
        let updated_at = inner.tick();
        if let Some(row) = inner.rows.get_mut(id) {
            row.content = content.to_string();
            row.updated_at = updated_at;
        }
        Ok(SavedNote {
            id: id.clone(),
            updated_at,
        })
    }

    async fn delete_note(&self, id: &NoteId) -> ApiResult<()> {
        let mut inner = self.inner.borrow_mut();
        inner.take_failure()?;
        inner.rows.remove(id);
        Ok(())
    }
}
