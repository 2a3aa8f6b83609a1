//! Lesson note autosave and cross-tab synchronisation.

pub mod bridge;
pub mod config;
pub mod editor;
pub mod runtime;
pub mod session;

pub use bridge::{
    topic_for, BridgeEvent, BroadcastChannelTransport, CrossTabBridge, LocalHub, Subscription,
    TabId, Transport, FEATURE_TAG,
};
pub use config::{RetryPolicy, SyncConfig};
pub use editor::{NoteEditor, NoteView};
pub use runtime::{
    BrowserTimers, Debouncer, LeptosSpawner, Scheduler, Spawner, TimerHandle, VirtualTimers,
};
pub use session::{DeleteStep, NoteSession, Phase, RemoteOutcome, RemoteUpdate};
