//! Runtime layer for Hostel Monitor.
//!
//! Owns the authenticated session and its refresh schedule, the resilient
//! data fetcher, typed table services, and the realtime relay that keeps the
//! dashboard lists current.

pub mod api_client;
pub mod dashboard;
pub mod live_list;
pub mod policy;
pub mod relay;
pub mod services;
pub mod session_manager;

mod refresh_scheduler;

#[cfg(test)]
mod test_support;

pub use hostel_core as core;
pub use hostel_data as data;
