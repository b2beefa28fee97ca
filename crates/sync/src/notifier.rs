use std::sync::Mutex;

use tracing::info;

use crate::schema::SyncResult;

pub const UP_TO_DATE: &str = "Zotero library is up to date.";

/// User-visible notifications.  The CLI prints them; a GUI host would show a
/// toast.
pub trait Notifier: Send + Sync {
    fn show(&self, message: &str);
}

/// Sends notifications to the tracing subscriber.  Used when no terminal is
/// attached, e.g. a watch daemon writing to a log file.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn show(&self, message: &str) {
        info!(target: "citevault::notice", "{message}");
    }
}

/// Keeps every message.  Handy for embedding hosts that render notices
/// themselves, and for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default()
    }
}

impl Notifier for RecordingNotifier {
    fn show(&self, message: &str) {
        if let Ok(mut guard) = self.messages.lock() {
            guard.push(message.to_string());
        }
    }
}

/// One-line summary of a sync pass.
pub fn summary_message(result: &SyncResult) -> String {
    let mut parts = Vec::new();
    if result.created > 0 {
        parts.push(format!("{} added", result.created));
    }
    if result.updated > 0 {
        parts.push(format!("{} updated", result.updated));
    }
    if result.deleted > 0 {
        parts.push(format!("{} deleted", result.deleted));
    }

    if parts.is_empty() && result.errors.is_empty() {
        return UP_TO_DATE.to_string();
    }

    let mut message = if parts.is_empty() {
        "Zotero sync: no changes".to_string()
    } else {
        format!("Zotero sync: {}", parts.join(", "))
    };
    if !result.errors.is_empty() {
        message.push_str(&format!(" ({} error(s))", result.errors.len()));
    }
    message
}
