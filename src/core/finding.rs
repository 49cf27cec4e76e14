use crate::core::Severity;
use serde::{Deserialize, Serialize};

/// Outcome of comparing one measured environment value against its requirement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub name: String,
    pub severity: Severity,
    pub message: String,
}

impl Finding {
    pub fn new(name: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            severity,
            message: message.into(),
        }
    }

    pub fn ok(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, Severity::Ok, message)
    }

    pub fn warning(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, Severity::Warning, message)
    }

    pub fn blocking(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(name, Severity::Blocking, message)
    }
}
