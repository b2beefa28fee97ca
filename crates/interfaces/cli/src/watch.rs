use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Result, anyhow};
use fs2::FileExt;
use tracing::{error, info, warn};

use citevault_config::AppConfig;
use citevault_sync::{FsNoteStore, Notifier, Settings, SyncApp, WatchState};

#[derive(Debug, Clone)]
pub(crate) struct WatchPaths {
    runtime_dir: PathBuf,
    pub(crate) pid_file: PathBuf,
    pub(crate) lock_file: PathBuf,
}

/// Per-vault runtime files, so two vaults can be watched side by side.
pub(crate) fn watch_paths(vault_root: &Path) -> WatchPaths {
    let runtime_dir = vault_root.join(".citevault");
    WatchPaths {
        pid_file: runtime_dir.join("watch.pid"),
        lock_file: runtime_dir.join("watch.lock"),
        runtime_dir,
    }
}

/// Take the per-vault watch lock.  The returned file holds the lock until
/// it is dropped.
pub(crate) fn acquire_lock(paths: &WatchPaths) -> Result<File> {
    fs::create_dir_all(&paths.runtime_dir)?;
    let lock_file = File::create(&paths.lock_file)?;
    lock_file.try_lock_exclusive().map_err(|_| {
        anyhow!(
            "another watcher already holds the lock at {}",
            paths.lock_file.display()
        )
    })?;
    Ok(lock_file)
}

pub(crate) async fn run_watch_mode(
    config: AppConfig,
    config_path: &Path,
    notifier: Arc<dyn Notifier>,
    initial_sync: bool,
) -> Result<()> {
    let paths = watch_paths(&config.vault_root());
    let _lock = acquire_lock(&paths)?;
    fs::write(&paths.pid_file, std::process::id().to_string())?;

    let store = Arc::new(FsNoteStore::new(config.vault_root(), &config.sync.trash_folder));
    let mut app = SyncApp::new(Settings::from(&config), store, notifier);

    if initial_sync {
        app.trigger_sync().await;
    }
    let state = app.enable().unwrap_or_else(|err| {
        error!(%err, "could not start the export watcher");
        WatchState::Idle
    });
    if state == WatchState::Idle {
        warn!(
            "nothing is being watched; check sync.export_file_path and sync.auto_sync, \
             then send SIGHUP"
        );
    }
    info!(vault = %config.vault_root().display(), ?state, "watch mode running");

    let result = wait_for_shutdown(&mut app, config, config_path).await;

    app.disable();
    let _ = fs::remove_file(&paths.pid_file);
    info!("watch mode stopped");
    result
}

#[cfg(unix)]
async fn wait_for_shutdown(
    app: &mut SyncApp,
    mut config: AppConfig,
    config_path: &Path,
) -> Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sighup = signal(SignalKind::hangup())?;
    loop {
        tokio::select! {
            _ = sigterm.recv() => break,
            _ = sigint.recv() => break,
            _ = sighup.recv() => reload(app, &mut config, config_path),
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown(
    _app: &mut SyncApp,
    _config: AppConfig,
    _config_path: &Path,
) -> Result<()> {
    tokio::signal::ctrl_c().await?;
    Ok(())
}

#[cfg_attr(not(unix), allow(dead_code))]
fn reload(app: &mut SyncApp, current: &mut AppConfig, config_path: &Path) {
    let next = match AppConfig::load_from(config_path) {
        Ok(next) => next,
        Err(err) => {
            error!(%err, "could not reload configuration, keeping current settings");
            return;
        }
    };

    let settings = reloaded_settings(app.settings(), current, &next);
    match app.update_settings(settings) {
        Ok(state) => info!(?state, "configuration reloaded"),
        Err(err) => error!(%err, "watcher did not restart after reload"),
    }
    *current = next;
}

/// Settings for a reloaded config.  The note store is bound to the vault it
/// was opened on, so vault and trash changes wait for a restart.
fn reloaded_settings(active: &Settings, current: &AppConfig, next: &AppConfig) -> Settings {
    if next.vault.path != current.vault.path
        || next.sync.trash_folder != current.sync.trash_folder
    {
        warn!("vault.path and sync.trash_folder changes take effect after a restart");
    }
    let mut settings = Settings::from(next);
    settings.vault_root = active.vault_root.clone();
    settings
}
