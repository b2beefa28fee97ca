//! One sync pass: read the export, parse it, list the existing notes, diff,
//! apply, notify.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use crate::applier::{BatchOptions, apply_diff};
use crate::diff::compute_diff;
use crate::error::{SyncError, SyncOutcome};
use crate::normalize::parse_export;
use crate::note::{key_from_file_name, normalize_path, note_key};
use crate::notifier::{Notifier, summary_message};
use crate::schema::{ItemRecord, SyncResult};
use crate::store::NoteStore;

pub const SYNC_IN_PROGRESS: &str = "Sync already in progress";

/// Where the engine reads from and writes to.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub vault_root: PathBuf,
    /// Absolute, or relative to `vault_root`.
    pub export_path: String,
    /// Vault-relative stub folder.
    pub stub_folder: String,
    pub batch: BatchOptions,
}

impl EngineSettings {
    pub fn resolved_export_path(&self) -> PathBuf {
        resolve_export_path(&self.vault_root, &self.export_path)
    }
}

/// Absolute export paths pass through; relative ones join the vault root.
pub fn resolve_export_path(vault_root: &Path, export_path: &str) -> PathBuf {
    let path = Path::new(export_path);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        vault_root.join(path)
    }
}

pub struct SyncEngine {
    settings: EngineSettings,
    store: Arc<dyn NoteStore>,
    notifier: Arc<dyn Notifier>,
    in_flight: Arc<AtomicBool>,
}

/// Clears the in-flight flag on every exit path.
struct InFlightGuard<'a>(&'a AtomicBool);

impl<'a> InFlightGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl SyncEngine {
    pub fn new(
        settings: EngineSettings,
        store: Arc<dyn NoteStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self::with_in_flight(settings, store, notifier, Arc::new(AtomicBool::new(false)))
    }

    /// Build an engine that shares its in-flight flag with earlier engines,
    /// so a rebuilt engine still refuses to overlap a pass already running.
    pub fn with_in_flight(
        settings: EngineSettings,
        store: Arc<dyn NoteStore>,
        notifier: Arc<dyn Notifier>,
        in_flight: Arc<AtomicBool>,
    ) -> Self {
        Self {
            settings,
            store,
            notifier,
            in_flight,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn is_syncing(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Run one full sync.  Overlapping calls return immediately with a single
    /// [`SYNC_IN_PROGRESS`] error.  Every pass that runs ends in exactly one
    /// notification.
    pub async fn sync(&self) -> SyncResult {
        let Some(_guard) = InFlightGuard::acquire(&self.in_flight) else {
            info!("sync requested while another sync is running");
            return SyncResult::failed(SYNC_IN_PROGRESS);
        };

        let started = Instant::now();
        match self.run().await {
            Ok(result) => {
                info!(
                    created = result.created,
                    updated = result.updated,
                    deleted = result.deleted,
                    errors = result.errors.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "sync complete"
                );
                self.notifier.show(&summary_message(&result));
                result
            }
            Err(err) => {
                let message = match &err {
                    SyncError::Parse(_) | SyncError::Read { .. } | SyncError::ExportMissing(_) => {
                        err.to_string()
                    }
                    _ => format!("Sync failed: {err}"),
                };
                error!(%err, "sync aborted");
                self.notifier.show(&message);
                SyncResult::failed(message)
            }
        }
    }

    async fn run(&self) -> SyncOutcome<SyncResult> {
        let raw = self.read_export().await?;
        let records = key_by_note_name(parse_export(&raw)?);
        let existing = self.existing_keys().await?;

        // No previous metadata is kept between runs, so every note that is
        // still present gets rewritten.
        let ops = compute_diff(&records, &existing, None);
        debug!(
            records = records.len(),
            existing = existing.len(),
            ops = ops.len(),
            "diff computed"
        );

        let result = apply_diff(
            self.store.as_ref(),
            &self.settings.stub_folder,
            &ops,
            self.settings.batch,
        )
        .await?;
        Ok(result)
    }

    async fn read_export(&self) -> SyncOutcome<String> {
        let path = self.settings.resolved_export_path();
        match tokio::fs::read_to_string(&path).await {
            Ok(raw) => Ok(raw),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(SyncError::ExportMissing(self.settings.export_path.clone()))
            }
            Err(source) => Err(SyncError::Read { path, source }),
        }
    }

    /// Note keys currently in the stub folder, re-read on every pass.
    pub async fn existing_keys(&self) -> SyncOutcome<BTreeSet<String>> {
        let folder = normalize_path(&self.settings.stub_folder);
        let names = self.store.list_children(&folder).await?;
        Ok(names
            .iter()
            .filter_map(|name| key_from_file_name(name))
            .map(str::to_string)
            .collect())
    }
}

/// Re-key records by note name so they compare against file stems.  Two
/// citation keys that sanitize to the same name collide; the later wins.
fn key_by_note_name(records: IndexMap<String, ItemRecord>) -> IndexMap<String, ItemRecord> {
    let mut keyed = IndexMap::with_capacity(records.len());
    for (citation_key, record) in records {
        let key = note_key(&citation_key);
        if key.is_empty() {
            warn!(%citation_key, "citation key has no usable file name, skipping");
            continue;
        }
        if let Some(previous) = keyed.insert(key.clone(), record) {
            warn!(
                note = %key,
                replaced = %previous.citation_key,
                by = %citation_key,
                "citation keys collide after sanitizing"
            );
        }
    }
    keyed
}
