//! Keeps a folder of Markdown stub notes in step with a Better BibTeX
//! "Better CSL JSON" export.
//!
//! The pipeline is `normalize` → `diff` → `applier`, driven by `engine` and
//! triggered either manually through [`SyncApp`] or by the [`ExportWatcher`].
//! Managed frontmatter is rewritten on every sync; anything the user writes
//! below the `[Open in Zotero]` line is kept.

pub mod applier;
pub mod app;
pub mod debounce;
pub mod diff;
pub mod engine;
pub mod error;
pub mod normalize;
pub mod note;
pub mod notifier;
pub mod overview;
pub mod schema;
pub mod store;
pub mod watcher;

pub use applier::{BatchOptions, apply_diff};
pub use app::{Settings, SyncApp};
pub use diff::compute_diff;
pub use engine::{EngineSettings, SyncEngine};
pub use error::{StoreError, SyncError, SyncOutcome};
pub use normalize::parse_export;
pub use notifier::{Notifier, RecordingNotifier, TracingNotifier, summary_message};
pub use schema::{DiffAction, DiffOp, ItemRecord, SyncResult};
pub use store::{FsNoteStore, NoteStore};
pub use watcher::{ExportWatcher, WatchOptions, WatchState};
