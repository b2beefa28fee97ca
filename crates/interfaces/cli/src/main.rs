mod watch;

use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use citevault_config::{AppConfig, DEFAULT_CONFIG_PATH};
use citevault_sync::{FsNoteStore, Notifier, Settings, SyncApp, TracingNotifier};

#[derive(Debug, Parser)]
#[command(
    name = "citevault",
    version,
    about = "Keep Markdown reference notes in step with a Zotero Better BibTeX export"
)]
struct Cli {
    /// Settings file.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run one sync from the export file (the default).
    Sync,
    /// Keep syncing whenever the export file changes.
    Watch {
        /// Sync once before starting to watch.
        #[arg(long)]
        initial_sync: bool,
    },
    /// Print the path of the library overview file.
    OpenBase,
    /// Inspect or edit settings.
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
enum ConfigCommands {
    Show,
    /// Example: citevault config set sync.export_file_path ~/Zotero/library.json
    Set { key: String, value: String },
}

/// Prints notices on stdout for an interactive user.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn show(&self, message: &str) {
        println!("{message}");
    }
}

fn notifier() -> Arc<dyn Notifier> {
    if std::io::stdout().is_terminal() {
        Arc::new(ConsoleNotifier)
    } else {
        Arc::new(TracingNotifier)
    }
}

fn build_app(config: &AppConfig) -> SyncApp {
    let store = Arc::new(FsNoteStore::new(config.vault_root(), &config.sync.trash_folder));
    SyncApp::new(Settings::from(config), store, notifier())
}

/// `RUST_LOG` wins over `telemetry.log_level`.  Watch mode also writes to a
/// daily file when `telemetry.log_dir` is set; keep the guard alive until exit.
fn init_tracing(config: &AppConfig, watch_mode: bool) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.telemetry.log_level));

    let log_dir = config.telemetry.log_dir.trim();
    if watch_mode && !log_dir.is_empty() {
        let appender = tracing_appender::rolling::daily(log_dir, "citevault.log");
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .with_ansi(false)
            .init();
        return Some(guard);
    }

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    None
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Sync);

    let config = AppConfig::load_from(&cli.config)?;
    let _log_guard = init_tracing(&config, matches!(command, Commands::Watch { .. }));

    match command {
        Commands::Sync => {
            let app = build_app(&config);
            let Some(result) = app.trigger_sync().await else {
                bail!(
                    "no export file configured; \
                     run `citevault config set sync.export_file_path <path>`"
                );
            };
            if !result.errors.is_empty() {
                for error in &result.errors {
                    eprintln!("- {error}");
                }
                bail!("sync finished with {} error(s)", result.errors.len());
            }
        }
        Commands::Watch { initial_sync } => {
            watch::run_watch_mode(config, &cli.config, notifier(), initial_sync).await?;
        }
        Commands::OpenBase => {
            let app = build_app(&config);
            let Some(path) = app.open_base().await else {
                bail!("library overview not found");
            };
            println!("{}", config.vault_root().join(path).display());
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => print_config(&config, &cli.config),
            ConfigCommands::Set { key, value } => {
                // Edit the file itself so environment overrides are not persisted.
                let mut stored = AppConfig::load_file(&cli.config)?;
                stored.set_value(&key, &value)?;
                stored.save_to(&cli.config)?;
                println!("{key} updated in {}", cli.config.display());
                println!("restart `citevault watch` or send it SIGHUP to apply");
            }
        },
    }

    Ok(())
}

fn print_config(config: &AppConfig, path: &std::path::Path) {
    let export = if config.sync.has_export_path() {
        config.sync.export_file_path.as_str()
    } else {
        "(not set)"
    };
    let log_dir = if config.telemetry.log_dir.trim().is_empty() {
        "(stderr only)"
    } else {
        config.telemetry.log_dir.as_str()
    };

    println!("citevault configuration ({})", path.display());
    println!("- vault.path            : {}", config.vault.path);
    println!("- sync.export_file_path : {export}");
    println!("- sync.stub_folder      : {}", config.sync.effective_stub_folder());
    println!("- sync.auto_sync        : {}", config.sync.auto_sync);
    println!("- sync.debounce_ms      : {}", config.sync.debounce_ms);
    println!("- sync.batch_size       : {}", config.sync.batch_size);
    println!("- sync.batch_delay_ms   : {}", config.sync.batch_delay_ms);
    println!("- sync.restart_delay_ms : {}", config.sync.restart_delay_ms);
    println!("- sync.trash_folder     : {}", config.sync.trash_folder);
    println!("- telemetry.log_level   : {}", config.telemetry.log_level);
    println!("- telemetry.log_dir     : {log_dir}");
}
