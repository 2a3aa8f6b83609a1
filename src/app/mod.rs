use crate::hooks::use_lesson_note;
use crate::storage::load_user_from_storage;
use leptos::prelude::*;
use leptos_router::components::{Route, Router, Routes};
use leptos_router::hooks::use_params_map;
use leptos_router::path;

#[component]
pub fn App() -> impl IntoView {
    // IMPORTANT:
    // - Leptos CSR requires the `csr` feature on `leptos`.
    // - router hooks require a <Router> context.
    view! {
        <Router>
            <Routes fallback=|| view! { <div class="px-4 py-8 text-xs text-muted-foreground">"Not found"</div> }>
                <Route path=path!("courses/:course_id/lessons/:lesson_id") view=LessonNotesPage />
            </Routes>
        </Router>
    }
}

/// Mount point for the lesson note editor. Lesson chrome lives elsewhere.
#[component]
pub fn LessonNotesPage() -> impl IntoView {
    let params = use_params_map();
    let course_id = Signal::derive(move || params.read().get("course_id").unwrap_or_default());
    let lesson_id = Signal::derive(move || params.read().get("lesson_id").unwrap_or_default());
    let user_id = Signal::stored(load_user_from_storage().map(|u| u.id).unwrap_or_default());

    let note = use_lesson_note(user_id, course_id, lesson_id);

    let status = move || {
        if note.is_saving.get() {
            "Saving..."
        } else if note.error.get().is_some() && note.is_dirty.get() {
            "Not saved yet"
        } else if note.is_dirty.get() {
            "Unsaved changes"
        } else if note.is_syncing.get() {
            "Updated from another tab"
        } else {
            "Saved"
        }
    };

    view! {
        <section class="flex flex-col gap-2">
            <textarea
                class="min-h-40 w-full rounded-md border p-2 text-sm"
                prop:value=move || note.content.get()
                on:input=move |ev| note.update_content.run(event_target_value(&ev))
            />
            <div class="flex items-center justify-between text-xs text-muted-foreground">
                <span>{status}</span>
                <button on:click=move |_| note.delete.run(())>"Delete note"</button>
            </div>
        </section>
    }
}
