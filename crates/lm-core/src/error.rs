//! Failure taxonomy shared by every fallible component.
//!
//! Each module keeps its own `thiserror` enum; `kind()` classifies it so the
//! coordinator can decide between a silent fallback and escalation.

/// Coarse classification of a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Dictionary, file or directory absent. Recovered by templates or defaults.
    ResourceMissing,
    /// Parse or deserialize failure. Recovered by quarantine.
    ResourceCorrupt,
    /// Location not writable. Recovered by falling back to the default folder.
    PermissionDenied,
    /// Two writers on one resource. Unreachable while load claims are honored.
    ConcurrencyViolation,
}

impl ErrorKind {
    /// Classify an I/O error.
    pub fn of_io(e: &std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::ResourceMissing,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::WouldBlock => ErrorKind::ConcurrencyViolation,
            _ => ErrorKind::ResourceCorrupt,
        }
    }
}
