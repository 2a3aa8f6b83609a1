use crate::api::ApiClient;
use crate::models::{NoteKey, Timestamp};
use crate::sync::{
    BroadcastChannelTransport, BrowserTimers, CrossTabBridge, LeptosSpawner, NoteEditor,
    NoteView, SyncConfig,
};
use leptos::prelude::*;
use std::rc::Rc;

/// What a lesson page needs from the note engine.
#[derive(Clone, Copy)]
pub struct LessonNote {
    pub content: Signal<String>,
    pub is_dirty: Signal<bool>,
    pub is_saving: Signal<bool>,
    pub is_syncing: Signal<bool>,
    pub last_saved: Signal<Option<Timestamp>>,
    pub error: Signal<Option<String>>,
    pub update_content: Callback<String>,
    pub delete: Callback<()>,
}

/// Binds a note editor to the current (user, lesson).
///
/// Changing either id resets the editor and reloads; unmounting tears it down without
/// flushing pending edits.
pub fn use_lesson_note(
    user_id: Signal<String>,
    course_id: Signal<String>,
    lesson_id: Signal<String>,
) -> LessonNote {
    let view = RwSignal::new(NoteView::default());

    let editor = NoteEditor::new(
        Rc::new(ApiClient::load_from_storage()),
        CrossTabBridge::new(Rc::new(BroadcastChannelTransport::new())),
        Rc::new(BrowserTimers),
        Rc::new(LeptosSpawner),
        SyncConfig::default(),
    );
    editor.set_observer(move |v| view.set(v.clone()));
    let editor = StoredValue::new_local(editor);

    Effect::new(move |_| {
        let key = NoteKey::new(user_id.get(), lesson_id.get());
        let course = course_id.get_untracked();
        editor.with_value(|e| e.open(key, course));
    });

    on_cleanup(move || editor.with_value(|e| e.close()));

    LessonNote {
        content: Signal::derive(move || view.with(|v| v.content.clone())),
        is_dirty: Signal::derive(move || view.with(|v| v.is_dirty)),
        is_saving: Signal::derive(move || view.with(|v| v.is_saving)),
        is_syncing: Signal::derive(move || view.with(|v| v.is_syncing)),
        last_saved: Signal::derive(move || view.with(|v| v.last_saved)),
        error: Signal::derive(move || view.with(|v| v.error.clone())),
        update_content: Callback::new(move |text: String| {
            editor.with_value(|e| e.update_content(&text))
        }),
        delete: Callback::new(move |_| editor.with_value(|e| e.delete_note())),
    }
}
