//! Watches the export file and triggers syncs.
//!
//! When the file exists it is watched directly and changes fire a debounced
//! sync.  When only its directory exists the directory is watched until the
//! file shows up, then the watch moves to the file and a sync runs at once.
//! Watch errors tear the session down and retry after `restart_delay`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::debounce::Debouncer;
use crate::engine::SyncEngine;
use crate::error::SyncError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_RESTART_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    WatchingFile,
    WatchingParentDirectory,
    /// Reported while a sync this watcher started is running.
    Syncing,
}

#[derive(Debug, Clone, Copy)]
pub struct WatchOptions {
    pub debounce: Duration,
    pub restart_delay: Duration,
}

impl Default for WatchOptions {
    fn default() -> Self {
        Self {
            debounce: DEFAULT_DEBOUNCE,
            restart_delay: DEFAULT_RESTART_DELAY,
        }
    }
}

type SharedState = Arc<Mutex<WatchState>>;

pub struct ExportWatcher {
    engine: Arc<SyncEngine>,
    options: WatchOptions,
    state: SharedState,
    /// Syncs spawned by the event task that have not finished yet.
    syncs: Arc<AtomicUsize>,
    task: Option<JoinHandle<()>>,
}

impl ExportWatcher {
    pub fn new(engine: Arc<SyncEngine>, options: WatchOptions) -> Self {
        Self {
            engine,
            options,
            state: Arc::new(Mutex::new(WatchState::Idle)),
            syncs: Arc::new(AtomicUsize::new(0)),
            task: None,
        }
    }

    /// Begin watching.  Any previous session is stopped first.  Must be
    /// called inside a tokio runtime.
    pub fn start(&mut self) -> Result<WatchState, SyncError> {
        self.stop();

        let target = self.engine.settings().resolved_export_path();
        let Some(session) = Session::open(&target)? else {
            warn!(
                path = %target.display(),
                "export file and its directory do not exist, not watching"
            );
            return Ok(WatchState::Idle);
        };

        let mode = session.mode;
        info!(path = %target.display(), state = ?mode, "export watcher started");
        self.spawn_session(target, session);
        Ok(mode)
    }

    fn spawn_session(&mut self, target: PathBuf, session: Session) {
        set_state(&self.state, session.mode);
        let task = WatchTask {
            engine: self.engine.clone(),
            target,
            options: self.options,
            state: self.state.clone(),
            syncs: self.syncs.clone(),
        };
        self.task = Some(tokio::spawn(task.run(session)));
    }

    /// Drop the OS watch and the event task.  Safe to call repeatedly.  A
    /// sync that already started runs to completion.
    pub fn stop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("export watcher stopped");
        }
        // A fresh cell so a task that is still unwinding cannot overwrite it.
        self.state = Arc::new(Mutex::new(WatchState::Idle));
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Current mode, or [`WatchState::Syncing`] while a sync this watcher
    /// triggered is running.  Manual syncs on the same engine are not
    /// reported.
    pub fn state(&self) -> WatchState {
        if self.is_running() && self.syncs.load(Ordering::Acquire) > 0 {
            return WatchState::Syncing;
        }
        self.state
            .lock()
            .map(|state| *state)
            .unwrap_or(WatchState::Idle)
    }
}

impl Drop for ExportWatcher {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

fn set_state(state: &SharedState, value: WatchState) {
    if let Ok(mut guard) = state.lock() {
        *guard = value;
    }
}

/// One live OS watch plus the channel its callback feeds.  Dropping the
/// session releases the OS watch.
struct Session {
    mode: WatchState,
    _watcher: Option<RecommendedWatcher>,
    events: mpsc::UnboundedReceiver<notify::Result<Event>>,
}

impl Session {
    /// `None` when neither the file nor its parent directory exists.
    fn open(target: &Path) -> Result<Option<Self>, SyncError> {
        let (mode, watch_path) = if target.is_file() {
            (WatchState::WatchingFile, target.to_path_buf())
        } else {
            match target.parent() {
                Some(parent) if parent.is_dir() => {
                    (WatchState::WatchingParentDirectory, parent.to_path_buf())
                }
                _ => return Ok(None),
            }
        };

        let (tx, events) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |res| {
            let _ = tx.send(res);
        })?;
        watcher.watch(&watch_path, RecursiveMode::NonRecursive)?;

        Ok(Some(Self {
            mode,
            _watcher: Some(watcher),
            events,
        }))
    }
}

enum Outcome {
    FileAppeared,
    /// The watched file was removed or renamed away.
    FileGone,
    Failed(SyncError),
    Closed,
}

struct WatchTask {
    engine: Arc<SyncEngine>,
    target: PathBuf,
    options: WatchOptions,
    state: SharedState,
    syncs: Arc<AtomicUsize>,
}

impl WatchTask {
    async fn run(self, first: Session) {
        let mut debouncer = Debouncer::new(self.options.debounce);
        let mut session = first;

        loop {
            set_state(&self.state, session.mode);
            let outcome = self.drive(&mut session, &mut debouncer).await;
            drop(session);
            set_state(&self.state, WatchState::Idle);

            let appeared = matches!(outcome, Outcome::FileAppeared);
            let replaced = matches!(outcome, Outcome::FileGone);
            let mut failure = match outcome {
                Outcome::Closed => return,
                Outcome::Failed(err) => Some(err),
                Outcome::FileAppeared | Outcome::FileGone => None,
            };

            session = loop {
                if let Some(err) = failure.take() {
                    error!(
                        %err,
                        delay_ms = self.options.restart_delay.as_millis() as u64,
                        "export watcher failed, restarting"
                    );
                    tokio::time::sleep(self.options.restart_delay).await;
                }
                match Session::open(&self.target) {
                    Ok(Some(next)) => break next,
                    Ok(None) => {
                        warn!(
                            path = %self.target.display(),
                            "export file and its directory are gone, watcher idle"
                        );
                        return;
                    }
                    Err(err) => failure = Some(err),
                }
            };

            if appeared {
                // The new file counts as the leading event of its window.
                debouncer.should_fire(Instant::now());
                self.spawn_sync("export file appeared");
            } else if replaced
                && session.mode == WatchState::WatchingFile
                && debouncer.should_fire(Instant::now())
            {
                // Replaced by rename: the content may be new.
                self.spawn_sync("export file replaced");
            }
        }
    }

    async fn drive(&self, session: &mut Session, debouncer: &mut Debouncer) -> Outcome {
        let file_name = self.target.file_name();

        while let Some(res) = session.events.recv().await {
            let event = match res {
                Ok(event) => event,
                Err(err) => return Outcome::Failed(err.into()),
            };

            match session.mode {
                WatchState::WatchingFile => match event.kind {
                    EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_)) => {
                        debug!(path = %self.target.display(), "export file moved or removed");
                        return Outcome::FileGone;
                    }
                    EventKind::Modify(ModifyKind::Metadata(_)) => {}
                    EventKind::Create(_) | EventKind::Modify(_) => {
                        if debouncer.should_fire(Instant::now()) {
                            self.spawn_sync("export file changed");
                        }
                    }
                    _ => {}
                },
                _ => {
                    let names_target = event
                        .paths
                        .iter()
                        .any(|path| path.file_name().is_some() && path.file_name() == file_name);
                    let appeared =
                        matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
                    if names_target && appeared {
                        debug!(path = %self.target.display(), "export file appeared");
                        return Outcome::FileAppeared;
                    }
                }
            }
        }
        Outcome::Closed
    }

    fn spawn_sync(&self, reason: &'static str) {
        debug!(reason, "triggering sync");
        let engine = self.engine.clone();
        let running = RunningSync::start(self.syncs.clone());
        tokio::spawn(async move {
            let _running = running;
            engine.sync().await;
        });
    }
}

/// Counts one watcher-triggered sync for as long as it lives.
struct RunningSync(Arc<AtomicUsize>);

impl RunningSync {
    fn start(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::AcqRel);
        Self(count)
    }
}

impl Drop for RunningSync {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::applier::BatchOptions;
    use crate::engine::EngineSettings;
    use crate::notifier::RecordingNotifier;
    use crate::store::testing::GatedStore;
    use crate::store::{FsNoteStore, NoteStore};
    use notify::event::{DataChange, RemoveKind};
    use std::io::Write;
    use tempfile::TempDir;

    const SMITH: &str = r#"[{"id":"AAAA1111","citation-key":"smith2020","title":"On Foo"}]"#;

    fn watcher(dir: &TempDir, export_path: &str) -> ExportWatcher {
        let store = Arc::new(FsNoteStore::new(dir.path(), ".trash"));
        watcher_on(dir, export_path, store, Duration::from_millis(100))
    }

    fn watcher_on(
        dir: &TempDir,
        export_path: &str,
        store: Arc<dyn NoteStore>,
        restart_delay: Duration,
    ) -> ExportWatcher {
        let settings = EngineSettings {
            vault_root: dir.path().to_path_buf(),
            export_path: export_path.to_string(),
            stub_folder: "Refs".to_string(),
            batch: BatchOptions::default(),
        };
        let engine = SyncEngine::new(settings, store, Arc::new(RecordingNotifier::default()));
        ExportWatcher::new(
            Arc::new(engine),
            WatchOptions {
                debounce: Duration::from_millis(50),
                restart_delay,
            },
        )
    }

    /// Run `watcher` on a session whose events come from the returned sender
    /// instead of the OS.
    fn feed(
        watcher: &mut ExportWatcher,
        dir: &TempDir,
        export_name: &str,
    ) -> mpsc::UnboundedSender<notify::Result<Event>> {
        let (tx, events) = mpsc::unbounded_channel();
        let session = Session {
            mode: WatchState::WatchingFile,
            _watcher: None,
            events,
        };
        watcher.spawn_session(dir.path().join(export_name), session);
        tx
    }

    async fn eventually(check: impl Fn() -> bool) -> bool {
        for _ in 0..100 {
            if check() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }

    #[tokio::test]
    async fn stays_idle_without_file_or_directory() {
        let dir = TempDir::new().unwrap();
        let mut watcher = watcher(&dir, "missing/dir/library.json");
        assert_eq!(watcher.start().unwrap(), WatchState::Idle);
        assert!(!watcher.is_running());
        assert_eq!(watcher.state(), WatchState::Idle);
    }

    #[tokio::test]
    async fn stop_is_idempotent() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), "[]").unwrap();
        let mut watcher = watcher(&dir, "library.json");
        assert_eq!(watcher.start().unwrap(), WatchState::WatchingFile);
        assert!(watcher.is_running());

        watcher.stop();
        watcher.stop();
        assert_eq!(watcher.state(), WatchState::Idle);
        assert!(!watcher.is_running());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn change_to_watched_file_triggers_sync() {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("library.json");
        // Same length as the real content so it can be overwritten with a
        // single write and no truncation event.
        std::fs::write(&export, " ".repeat(SMITH.len())).unwrap();

        let mut watcher = watcher(&dir, "library.json");
        assert_eq!(watcher.start().unwrap(), WatchState::WatchingFile);

        let mut file = std::fs::OpenOptions::new().write(true).open(&export).unwrap();
        file.write_all(SMITH.as_bytes()).unwrap();
        drop(file);

        let note = dir.path().join("Refs/smith2020.md");
        assert!(eventually(|| note.exists()).await);
        watcher.stop();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn file_appearing_in_directory_switches_mode_and_syncs() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("exports")).unwrap();

        let mut watcher = watcher(&dir, "exports/library.json");
        assert_eq!(watcher.start().unwrap(), WatchState::WatchingParentDirectory);

        let staged = dir.path().join("staged.json");
        std::fs::write(&staged, SMITH).unwrap();
        std::fs::rename(&staged, dir.path().join("exports/library.json")).unwrap();

        let note = dir.path().join("Refs/smith2020.md");
        assert!(eventually(|| note.exists()).await);
        assert!(eventually(|| watcher.state() == WatchState::WatchingFile).await);
        watcher.stop();
    }

    #[tokio::test]
    async fn watch_error_restarts_after_delay_without_syncing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let store = Arc::new(FsNoteStore::new(dir.path(), ".trash"));
        let mut watcher = watcher_on(&dir, "library.json", store, Duration::from_millis(500));
        let tx = feed(&mut watcher, &dir, "library.json");
        assert_eq!(watcher.state(), WatchState::WatchingFile);

        tx.send(Err(notify::Error::generic("inotify queue overflow")))
            .unwrap();
        assert!(eventually(|| watcher.state() == WatchState::Idle).await);
        assert!(eventually(|| watcher.state() == WatchState::WatchingFile).await);

        // The failed session was torn down and a fresh OS watch replaced it.
        assert!(tx.is_closed());
        assert!(watcher.is_running());
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!dir.path().join("Refs/smith2020.md").exists());
        watcher.stop();
    }

    #[tokio::test]
    async fn replaced_file_is_watched_again_and_synced() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let mut watcher = watcher(&dir, "library.json");
        let tx = feed(&mut watcher, &dir, "library.json");

        tx.send(Ok(Event::new(EventKind::Remove(RemoveKind::File))))
            .unwrap();

        let note = dir.path().join("Refs/smith2020.md");
        assert!(eventually(|| note.exists()).await);
        assert!(eventually(|| watcher.state() == WatchState::WatchingFile).await);
        assert!(tx.is_closed());
        watcher.stop();
    }

    #[tokio::test]
    async fn removed_file_falls_back_to_directory_watch() {
        let dir = TempDir::new().unwrap();
        let export = dir.path().join("library.json");
        std::fs::write(&export, SMITH).unwrap();
        let mut watcher = watcher(&dir, "library.json");
        let tx = feed(&mut watcher, &dir, "library.json");

        std::fs::remove_file(&export).unwrap();
        tx.send(Ok(Event::new(EventKind::Remove(RemoveKind::File))))
            .unwrap();

        assert!(
            eventually(|| watcher.state() == WatchState::WatchingParentDirectory).await
        );
        assert!(!dir.path().join("Refs").exists());
        watcher.stop();
    }

    #[tokio::test]
    async fn syncing_is_reported_only_while_a_watcher_sync_runs() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("library.json"), SMITH).unwrap();
        let store = Arc::new(GatedStore::new(dir.path()));
        let mut watcher =
            watcher_on(&dir, "library.json", store.clone(), Duration::from_millis(100));
        let tx = feed(&mut watcher, &dir, "library.json");

        let change = EventKind::Modify(ModifyKind::Data(DataChange::Content));
        tx.send(Ok(Event::new(change))).unwrap();
        tokio::time::timeout(Duration::from_secs(5), store.entered.notified())
            .await
            .unwrap();
        assert_eq!(watcher.state(), WatchState::Syncing);

        store.release.notify_one();
        let note = dir.path().join("Refs/smith2020.md");
        assert!(eventually(|| note.exists()).await);
        assert!(eventually(|| watcher.state() == WatchState::WatchingFile).await);
        watcher.stop();
    }
}
