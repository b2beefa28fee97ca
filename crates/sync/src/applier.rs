//! Applies a diff to the note store in batches, one note at a time.
//!
//! A failing note is recorded and skipped; it never stops the batch.  Notes
//! written before a failure stay written.

use std::time::Duration;

use tracing::{debug, error};

use crate::error::StoreError;
use crate::note::{build_note_content, normalize_path, note_path, rebuild_note};
use crate::schema::{DiffAction, DiffOp, ItemRecord, SyncResult};
use crate::store::NoteStore;

pub const DEFAULT_BATCH_SIZE: usize = 50;
pub const DEFAULT_BATCH_DELAY: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub batch_size: usize,
    /// Pause between batches so a large sync yields to other tasks.
    pub batch_delay: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: DEFAULT_BATCH_DELAY,
        }
    }
}

/// Apply `ops` to the notes in `folder`.  The folder is created when
/// missing; failing to create it is the only error returned.
pub async fn apply_diff(
    store: &dyn NoteStore,
    folder: &str,
    ops: &[DiffOp],
    options: BatchOptions,
) -> Result<SyncResult, StoreError> {
    let mut result = SyncResult::default();
    if ops.is_empty() {
        return Ok(result);
    }

    ensure_folder(store, folder).await?;

    let batch_size = options.batch_size.max(1);
    let batch_count = ops.len().div_ceil(batch_size);
    for (index, batch) in ops.chunks(batch_size).enumerate() {
        for op in batch {
            match apply_op(store, folder, op).await {
                Ok(()) => match op.action() {
                    DiffAction::Create => result.created += 1,
                    DiffAction::Update => result.updated += 1,
                    DiffAction::Delete => result.deleted += 1,
                },
                Err(err) => {
                    let message = format!(
                        "Failed to {} stub for {}: {err}",
                        op.action().verb(),
                        op.key()
                    );
                    error!(
                        key = op.key(),
                        action = op.action().verb(),
                        %err,
                        "note operation failed"
                    );
                    result.errors.push(message);
                }
            }
        }

        if index + 1 < batch_count {
            debug!(batch = index + 1, of = batch_count, "yielding between batches");
            tokio::time::sleep(options.batch_delay).await;
        }
    }

    Ok(result)
}

async fn apply_op(store: &dyn NoteStore, folder: &str, op: &DiffOp) -> Result<(), StoreError> {
    match op {
        DiffOp::Create { key, record } => create_note(store, folder, key, record).await,
        DiffOp::Update { key, record } => update_note(store, folder, key, record).await,
        DiffOp::Delete { key } => delete_note(store, folder, key).await,
    }
}

async fn create_note(
    store: &dyn NoteStore,
    folder: &str,
    key: &str,
    record: &ItemRecord,
) -> Result<(), StoreError> {
    store
        .create(&note_path(folder, key), &build_note_content(record))
        .await
}

async fn update_note(
    store: &dyn NoteStore,
    folder: &str,
    key: &str,
    record: &ItemRecord,
) -> Result<(), StoreError> {
    let path = note_path(folder, key);
    let Some(existing) = store.read(&path).await? else {
        debug!(key, "note missing on update, creating it");
        return create_note(store, folder, key, record).await;
    };

    let content = rebuild_note(&existing, record);
    if content == existing {
        return Ok(());
    }
    store.modify(&path, &content).await
}

async fn delete_note(store: &dyn NoteStore, folder: &str, key: &str) -> Result<(), StoreError> {
    let path = note_path(folder, key);
    if store.file_exists(&path).await? {
        store.trash(&path).await?;
    }
    Ok(())
}

async fn ensure_folder(store: &dyn NoteStore, folder: &str) -> Result<(), StoreError> {
    let folder = normalize_path(folder);
    if !store.folder_exists(&folder).await? {
        store.create_folder(&folder).await?;
    }
    Ok(())
}
