//! Entity mapping contract and tracking states.
//!
//! # Responsibility
//! - Define what a caller-supplied record type must provide to be persisted.
//! - Keep the session layer independent of concrete record shapes.

pub mod entity;
