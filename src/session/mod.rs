//! Portal session lifecycle: probe, re-login with backoff, persisted cookies.

pub mod artifact;
mod manager;

pub use artifact::ArtifactFile;
pub use manager::{SessionHandle, SessionManager, SessionSettings, SessionState};
