//! Host-facing context: owns the settings, the engine and the watcher, and
//! implements the user commands on top of them.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

use citevault_config::{AppConfig, DEFAULT_STUB_FOLDER};
use tracing::{error, info};

use crate::applier::BatchOptions;
use crate::engine::{EngineSettings, SyncEngine};
use crate::error::SyncOutcome;
use crate::notifier::Notifier;
use crate::overview::{base_file_path, ensure_base_file};
use crate::schema::SyncResult;
use crate::store::NoteStore;
use crate::watcher::{ExportWatcher, WatchOptions, WatchState};

pub const MISSING_EXPORT_PATH: &str = "Please configure the BBT export file path in settings.";
pub const BASE_CREATED: &str = "Created Zotero library base view file.";
pub const BASE_NOT_FOUND: &str = "Zotero library base not found. Run a sync first.";

/// Everything the sync side needs from the user's configuration.
#[derive(Debug, Clone)]
pub struct Settings {
    pub vault_root: PathBuf,
    pub export_file_path: String,
    pub stub_folder: String,
    pub auto_sync: bool,
    pub batch: BatchOptions,
    pub watch: WatchOptions,
}

impl Settings {
    pub fn has_export_path(&self) -> bool {
        !self.export_file_path.trim().is_empty()
    }

    fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            vault_root: self.vault_root.clone(),
            export_path: self.export_file_path.trim().to_string(),
            stub_folder: self.stub_folder.clone(),
            batch: self.batch,
        }
    }

    fn normalized(mut self) -> Self {
        if self.stub_folder.trim().is_empty() {
            self.stub_folder = DEFAULT_STUB_FOLDER.to_string();
        } else {
            self.stub_folder = self.stub_folder.trim().to_string();
        }
        self
    }
}

impl From<&AppConfig> for Settings {
    fn from(config: &AppConfig) -> Self {
        Self {
            vault_root: config.vault_root(),
            export_file_path: config.sync.export_file_path.trim().to_string(),
            stub_folder: config.sync.effective_stub_folder(),
            auto_sync: config.sync.auto_sync,
            batch: BatchOptions {
                batch_size: config.sync.batch_size.max(1),
                batch_delay: config.sync.batch_delay(),
            },
            watch: WatchOptions {
                debounce: config.sync.debounce(),
                restart_delay: config.sync.restart_delay(),
            },
        }
    }
}

pub struct SyncApp {
    settings: Settings,
    store: Arc<dyn NoteStore>,
    notifier: Arc<dyn Notifier>,
    engine: Arc<SyncEngine>,
    /// Outlives engine rebuilds so passes never overlap across them.
    in_flight: Arc<AtomicBool>,
    watcher: Option<ExportWatcher>,
}

impl SyncApp {
    pub fn new(settings: Settings, store: Arc<dyn NoteStore>, notifier: Arc<dyn Notifier>) -> Self {
        let settings = settings.normalized();
        let in_flight = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(SyncEngine::with_in_flight(
            settings.engine_settings(),
            store.clone(),
            notifier.clone(),
            in_flight.clone(),
        ));
        Self {
            settings,
            store,
            notifier,
            engine,
            in_flight,
            watcher: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn engine(&self) -> &Arc<SyncEngine> {
        &self.engine
    }

    /// State of the export watcher.  Manual syncs do not show up here; use
    /// [`SyncEngine::is_syncing`] for any pass in flight.
    pub fn watch_state(&self) -> WatchState {
        self.watcher
            .as_ref()
            .map_or(WatchState::Idle, ExportWatcher::state)
    }

    /// Start watching when an export path is set and auto-sync is on.
    pub fn enable(&mut self) -> SyncOutcome<WatchState> {
        self.disable();
        if !self.settings.has_export_path() || !self.settings.auto_sync {
            info!(
                auto_sync = self.settings.auto_sync,
                "automatic sync not enabled"
            );
            return Ok(WatchState::Idle);
        }

        let mut watcher = ExportWatcher::new(self.engine.clone(), self.settings.watch);
        let state = watcher.start()?;
        self.watcher = Some(watcher);
        Ok(state)
    }

    pub fn disable(&mut self) {
        if let Some(mut watcher) = self.watcher.take() {
            watcher.stop();
        }
    }

    /// Manual sync.  `None` when no export path is configured.
    pub async fn trigger_sync(&self) -> Option<SyncResult> {
        if !self.settings.has_export_path() {
            self.notifier.show(MISSING_EXPORT_PATH);
            return None;
        }

        let result = self.engine.sync().await;
        if result.created > 0 || result.updated > 0 {
            match ensure_base_file(self.store.as_ref(), &self.settings.stub_folder).await {
                Ok(true) => self.notifier.show(BASE_CREATED),
                Ok(false) => {}
                Err(err) => error!(%err, "could not create the library base file"),
            }
        }
        Some(result)
    }

    /// Vault-relative path of the overview document, if it exists.
    pub async fn open_base(&self) -> Option<String> {
        let path = base_file_path();
        match self.store.file_exists(&path).await {
            Ok(true) => Some(path),
            Ok(false) => {
                self.notifier.show(BASE_NOT_FOUND);
                None
            }
            Err(err) => {
                error!(%err, "could not look up the library base file");
                self.notifier.show(BASE_NOT_FOUND);
                None
            }
        }
    }

    /// Swap in new settings, rebuild the engine and restart the watcher if
    /// one was running or should now run.  A pass still running on the old
    /// engine keeps the new one from starting another until it finishes.
    pub fn update_settings(&mut self, settings: Settings) -> SyncOutcome<WatchState> {
        self.disable();
        self.settings = settings.normalized();
        self.engine = Arc::new(SyncEngine::with_in_flight(
            self.settings.engine_settings(),
            self.store.clone(),
            self.notifier.clone(),
            self.in_flight.clone(),
        ));
        info!(
            export = %self.settings.export_file_path,
            stub_folder = %self.settings.stub_folder,
            auto_sync = self.settings.auto_sync,
            "settings updated"
        );
        self.enable()
    }
}

impl Drop for SyncApp {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SYNC_IN_PROGRESS;
    use crate::notifier::RecordingNotifier;
    use crate::store::FsNoteStore;
    use crate::store::testing::GatedStore;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::time::timeout;

    const SMITH: &str = r#"[{"id":"AAAA1111","citation-key":"smith2020","title":"On Foo"}]"#;

    fn settings(dir: &TempDir, export: &str) -> Settings {
        Settings {
            vault_root: dir.path().to_path_buf(),
            export_file_path: export.to_string(),
            stub_folder: "Zotero Library".to_string(),
            auto_sync: true,
            batch: BatchOptions {
                batch_size: 10,
                batch_delay: Duration::from_millis(1),
            },
            watch: WatchOptions::default(),
        }
    }

    fn app(dir: &TempDir, export: &str) -> (SyncApp, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let app = SyncApp::new(
            settings(dir, export),
            Arc::new(FsNoteStore::new(dir.path(), ".trash")),
            notifier.clone(),
        );
        (app, notifier)
    }

    #[test]
    fn settings_follow_config() {
        let mut config = AppConfig::default();
        config.vault.path = "/vault".to_string();
        config.sync.export_file_path = "  lib.json ".to_string();
        config.sync.stub_folder = "   ".to_string();
        config.sync.batch_size = 0;

        let settings = Settings::from(&config);
        assert_eq!(settings.vault_root, PathBuf::from("/vault"));
        assert_eq!(settings.export_file_path, "lib.json");
        assert_eq!(settings.stub_folder, DEFAULT_STUB_FOLDER);
        assert_eq!(settings.batch.batch_size, 1);
        assert_eq!(settings.watch.debounce, Duration::from_millis(500));
    }

    #[tokio::test]
    async fn sync_without_export_path_asks_for_configuration() {
        let dir = TempDir::new().unwrap();
        let (app, notifier) = app(&dir, "");
        assert!(app.trigger_sync().await.is_none());
        assert_eq!(notifier.messages(), vec![MISSING_EXPORT_PATH]);
    }

    #[tokio::test]
    async fn first_sync_creates_base_file_once() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let (app, notifier) = app(&dir, "library.json");

        let first = app.trigger_sync().await.unwrap();
        assert_eq!(first.created, 1);
        assert!(dir.path().join("Zotero Library.base").exists());

        app.trigger_sync().await.unwrap();
        assert_eq!(
            notifier.messages(),
            vec![
                "Zotero sync: 1 added",
                BASE_CREATED,
                "Zotero sync: 1 updated",
            ]
        );
    }

    #[tokio::test]
    async fn no_base_file_when_nothing_changed() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), "[]").unwrap();
        let (app, _) = app(&dir, "library.json");
        app.trigger_sync().await.unwrap();
        assert!(!dir.path().join("Zotero Library.base").exists());
    }

    #[tokio::test]
    async fn open_base_requires_a_previous_sync() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let (app, notifier) = app(&dir, "library.json");

        assert_eq!(app.open_base().await, None);
        assert_eq!(notifier.messages(), vec![BASE_NOT_FOUND]);

        app.trigger_sync().await.unwrap();
        assert_eq!(app.open_base().await.as_deref(), Some("Zotero Library.base"));
    }

    #[tokio::test]
    async fn enable_respects_auto_sync_and_export_path() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), "[]").unwrap();

        let (mut app, _) = app(&dir, "");
        assert_eq!(app.enable().unwrap(), WatchState::Idle);

        let mut with_path = settings(&dir, "library.json");
        with_path.auto_sync = false;
        assert_eq!(app.update_settings(with_path.clone()).unwrap(), WatchState::Idle);

        with_path.auto_sync = true;
        assert_eq!(app.update_settings(with_path).unwrap(), WatchState::WatchingFile);
        assert_eq!(app.watch_state(), WatchState::WatchingFile);

        app.disable();
        assert_eq!(app.watch_state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn update_settings_moves_notes_to_new_folder() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let (mut app, _) = app(&dir, "library.json");

        let mut moved = settings(&dir, "library.json");
        moved.stub_folder = "References".to_string();
        moved.auto_sync = false;
        app.update_settings(moved).unwrap();

        app.trigger_sync().await.unwrap();
        assert!(dir.path().join("References/smith2020.md").exists());
        assert!(!dir.path().join("Zotero Library").exists());

        let mut blank = settings(&dir, "library.json");
        blank.stub_folder = String::new();
        blank.auto_sync = false;
        app.update_settings(blank).unwrap();
        assert_eq!(app.settings().stub_folder, DEFAULT_STUB_FOLDER);
    }

    #[tokio::test]
    async fn rebuilt_engine_waits_for_sync_started_before_update() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let store = Arc::new(GatedStore::new(dir.path()));
        let mut app = SyncApp::new(
            settings(&dir, "library.json"),
            store.clone(),
            Arc::new(RecordingNotifier::default()),
        );

        let old_engine = app.engine().clone();
        let running = tokio::spawn(async move { old_engine.sync().await });
        timeout(Duration::from_secs(5), store.entered.notified())
            .await
            .unwrap();

        let mut next = settings(&dir, "library.json");
        next.stub_folder = "References".to_string();
        next.auto_sync = false;
        app.update_settings(next).unwrap();
        assert!(app.engine().is_syncing());

        let overlapping = app.trigger_sync().await.unwrap();
        assert_eq!(overlapping.errors, vec![SYNC_IN_PROGRESS]);
        assert!(!dir.path().join("References").exists());

        store.release.notify_one();
        let finished = running.await.unwrap();
        assert_eq!(finished.created, 1);
        assert!(!app.engine().is_syncing());

        let next_pass = app.trigger_sync().await.unwrap();
        assert!(next_pass.errors.is_empty());
        assert!(dir.path().join("References/smith2020.md").exists());
    }

    #[tokio::test]
    async fn manual_sync_leaves_watch_state_alone() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let store = Arc::new(GatedStore::new(dir.path()));
        let mut app = SyncApp::new(
            settings(&dir, "library.json"),
            store.clone(),
            Arc::new(RecordingNotifier::default()),
        );
        assert_eq!(app.enable().unwrap(), WatchState::WatchingFile);

        let observe = async {
            timeout(Duration::from_secs(5), store.entered.notified())
                .await
                .unwrap();
            let during = (app.watch_state(), app.engine().is_syncing());
            store.release.notify_one();
            during
        };
        let (result, during) = tokio::join!(app.trigger_sync(), observe);

        assert_eq!(during, (WatchState::WatchingFile, true));
        assert_eq!(result.unwrap().created, 1);
        assert_eq!(app.watch_state(), WatchState::WatchingFile);
    }
}
