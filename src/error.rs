//! Core error kinds.
//!
//! Mirrors the hand-rolled `Display`/`Error` style the rest of this codebase
//! uses for domain errors (no derive-macro error crate) — only the wiring
//! layer in [`crate::control_surface`] translates these into the wire error
//! taxonomy from the bus contract.

use std::fmt;

/// What kind of entity a lookup failed to find.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotFoundKind {
    Session,
    Track,
    MoveSource,
    MoveDest,
}

impl fmt::Display for NotFoundKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NotFoundKind::Session => write!(f, "session"),
            NotFoundKind::Track => write!(f, "track"),
            NotFoundKind::MoveSource => write!(f, "move source track"),
            NotFoundKind::MoveDest => write!(f, "move destination track"),
        }
    }
}

/// Core-level error kinds, per the error handling design.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A confined client was denied a URI by the authorizer. Recoverable at
    /// the caller; never crashes the core.
    Authorization(String),
    /// A lookup or mutation referenced an entity that does not exist.
    NotFound(NotFoundKind),
    /// The engine refused or did not respond to a request.
    BackendUnavailable(String),
    /// A precondition for the operation was not met (e.g. video sink
    /// creation on a backend without out-of-process buffer streaming).
    PreconditionFailed(String),
    /// A transient condition, such as buffering.
    Transient(TransientKind),
    /// An invariant would otherwise have been violated. Logged and causes
    /// the affected session to be abandoned, never the whole process.
    Fatal(String),
    /// The engine did not accept a request within the per-call deadline.
    Timeout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransientKind {
    Buffering(u8),
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CoreError::Authorization(reason) => write!(f, "not authorized: {reason}"),
            CoreError::NotFound(kind) => write!(f, "{kind} not found"),
            CoreError::BackendUnavailable(msg) => write!(f, "backend unavailable: {msg}"),
            CoreError::PreconditionFailed(msg) => write!(f, "precondition failed: {msg}"),
            CoreError::Transient(TransientKind::Buffering(pct)) => {
                write!(f, "buffering: {pct}%")
            }
            CoreError::Fatal(msg) => write!(f, "fatal: {msg}"),
            CoreError::Timeout => write!(f, "timed out waiting for the engine to respond"),
        }
    }
}

impl std::error::Error for CoreError {}

impl CoreError {
    pub fn not_found(kind: NotFoundKind) -> Self {
        CoreError::NotFound(kind)
    }
}
