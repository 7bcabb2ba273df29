//! HTTP request handlers for the smsgate API.
//!
//! There is a single handler: every method on every path is a potential
//! provider callback. Responses follow the error taxonomy in
//! `smsgate_core::GateError`; internal failures never leak detail to the
//! caller.

pub mod ingest;

pub use ingest::ingest_callback;
