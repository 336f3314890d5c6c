//! User-facing notifications ("toasts") raised by store mutations.

use log::{info, warn};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ToastVariant {
    Default,
    Destructive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Toast {
    pub title: String,
    pub description: String,
    pub variant: ToastVariant,
}

impl Toast {
    pub fn success(description: impl Into<String>) -> Self {
        Toast {
            title: "Success".to_string(),
            description: description.into(),
            variant: ToastVariant::Default,
        }
    }

    /// Error toast carrying the backend's message verbatim.
    pub fn error(description: impl Into<String>) -> Self {
        Toast {
            title: "Error".to_string(),
            description: description.into(),
            variant: ToastVariant::Destructive,
        }
    }
}

pub trait Notifier {
    fn notify(&self, toast: Toast);
}

/// Writes toasts to the log; the command-line stand-in for the toast area.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, toast: Toast) {
        match toast.variant {
            ToastVariant::Default => info!("{}: {}", toast.title, toast.description),
            ToastVariant::Destructive => warn!("{}: {}", toast.title, toast.description),
        }
    }
}
