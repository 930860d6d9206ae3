use log::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyLevel {
    Info,
    Success,
    Error,
}

/// Transient user-facing status messages. Fire-and-forget.
pub trait Notifier: Send + Sync {
    fn notify(&self, level: NotifyLevel, message: &str);

    fn info(&self, message: &str) {
        self.notify(NotifyLevel::Info, message);
    }

    fn success(&self, message: &str) {
        self.notify(NotifyLevel::Success, message);
    }

    fn error(&self, message: &str) {
        self.notify(NotifyLevel::Error, message);
    }
}

/// Routes notifications into the log under the `notify` target.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, level: NotifyLevel, message: &str) {
        match level {
            NotifyLevel::Info => info!(target: "notify", "{}", message),
            NotifyLevel::Success => info!(target: "notify", "✔ {}", message),
            NotifyLevel::Error => error!(target: "notify", "{}", message),
        }
    }
}
