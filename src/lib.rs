//! Wagate - Messaging Network Gateway Core
//!
//! Connection-lifecycle state machine and outbound-dispatch policy for a
//! single persistent messaging-network session, embedded by a backend
//! service.
//!
//! Key principles:
//! - One logical connection, retried indefinitely
//! - Credentials survive restarts; invalidation forces a fresh pairing
//! - Partial media-send failure never aborts a whole dispatch

pub mod config;
pub mod wa;
