//! Platform session lifecycle.

mod manager;
mod state;

pub use manager::{RecoveryOutcome, SessionManager};
pub use state::{Session, SessionEvent, SessionState};
