//! Session-scoped logging with ordered key/value annotations
//!
//! Every log line of a session should identify the player and the game it
//! belongs to, so concurrent sessions can be untangled in the output. A
//! [`SessionLogger`] is a plain value carried on the session and cloned into
//! its background tasks. Annotations render as `[Key: value]` prefixes in the
//! order they were first set, ahead of a `[Category]` tag naming the
//! component that logged.

use log::{error, info, warn};

/// Ordered key/value annotations attached to one session's log output.
#[derive(Debug, Clone, Default)]
pub struct SessionLogger {
    annotations: Vec<(String, String)>,
}

impl SessionLogger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an annotation. Updating an existing key keeps its original
    /// position so lines stay visually aligned across a session.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(entry) = self.annotations.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
        } else {
            self.annotations.push((key.to_string(), value));
        }
    }

    /// Drop all annotations. Called when a session tears down.
    pub fn clear(&mut self) {
        self.annotations.clear();
    }

    pub fn info(&self, category: &str, msg: impl AsRef<str>) {
        info!("[{}]{} {}", category, self.prefix(), msg.as_ref());
    }

    pub fn warn(&self, category: &str, msg: impl AsRef<str>) {
        warn!("[{}]{} {}", category, self.prefix(), msg.as_ref());
    }

    pub fn error(&self, category: &str, msg: impl AsRef<str>) {
        error!("[{}]{} {}", category, self.prefix(), msg.as_ref());
    }

    fn prefix(&self) -> String {
        let mut out = String::new();
        for (key, value) in &self.annotations {
            out.push_str(&format!("[{key}: {value}]"));
        }
        out
    }
}
