//! User-facing notifications.
//!
//! The dashboard reports the outcome of user actions (a rejected form, a
//! failed connection attempt) through a [`Notifier`]. Front ends decide how
//! to surface them; the CLI prints them.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    /// An action completed.
    Info,
    /// An action failed and the user has to retry it.
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: Notice, message: &str);
}
