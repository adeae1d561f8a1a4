//! # solicitor-rotation
//!
//! Assignment and SLA rotation engine for legal search work items.
//!
//! Routes each work item through a ranked chain of eligible solicitors until
//! one accepts, enforces the response and completion windows with periodic
//! scans, and keeps every ledger write a compare-and-swap so several
//! instances can share one Postgres database.

pub mod clock;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod model;
pub mod notify;
pub mod store;
pub mod telemetry;
