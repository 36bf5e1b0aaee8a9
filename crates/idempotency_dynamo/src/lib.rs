//! AWS-oriented adapters and Lambda wiring for the idempotency protocol.
//!
//! This crate owns runtime integration details (the DynamoDB record store
//! and the Lambda entrypoint); the protocol itself lives in
//! `idempotency_core`.

pub mod adapters;
pub mod handlers;
