// Re-export needed modules for testing
pub mod api;
pub mod collaborators;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod models;
pub mod negotiation;

// Re-export main types for convenience
pub use config::SessionConfig;
pub use dashboard::{Dashboard, DashboardSnapshot};
pub use error::{ExchangeError, Result};
pub use models::*;
pub use negotiation::{ActionLabel, MeetingState, NegotiationSession, SessionEvent};
