pub mod api;
pub mod app;
pub mod error;
pub mod hooks;
pub mod models;
pub(crate) mod storage;
pub mod store;
pub mod sync;
pub mod telemetry;
pub(crate) mod util;

pub use error::{ApiError, ApiErrorKind, ApiResult, BridgeError};
pub use models::{Note, NoteId, NoteKey, SavedNote, Timestamp};
pub use store::{MemoryNoteStore, NoteStore};
pub use sync::{NoteEditor, NoteView, SyncConfig};

// Needed for `#[wasm_bindgen(start)]` on the wasm entrypoint.
#[cfg(all(target_arch = "wasm32", not(test)))]
use wasm_bindgen::prelude::wasm_bindgen;

// Only register the WASM start function for normal builds (not for tests),
// otherwise wasm-bindgen-test will end up with multiple entry symbols.
#[cfg_attr(all(target_arch = "wasm32", not(test)), wasm_bindgen(start))]
pub fn main() {
    console_error_panic_hook::set_once();
    telemetry::init(tracing::Level::INFO);
    leptos::mount::mount_to_body(app::App);
}
