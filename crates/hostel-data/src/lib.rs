//! Outbound plumbing for the hostel client.
//!
//! HTTP transport, the auth service client, PostgREST query building, the
//! realtime change feed, and the pure pagination and retry helpers the
//! runtime composes into its resilient fetcher.

pub mod auth_backend;
pub mod pagination;
pub mod postgrest;
pub mod realtime;
pub mod retry;
pub mod transport;

pub use hostel_core as core;
