//! Domain layer for the hostel management client.
//!
//! Holds the mirrored row types, the session and response shapes, the error
//! taxonomy, configuration, session persistence and dashboard statistics.
//! Nothing here performs network I/O.

pub mod clock;
pub mod error;
pub mod models;
pub mod session_store;
pub mod settings;
pub mod stats;
pub mod time_utils;
pub mod validation;

pub use error::{HostelError, Result};
