//! # Leasewatch Core
//!
//! Orchestration engine behind portfolio scans: it collects data about a
//! selection of tenants from several external sources, drives the run
//! through a fixed pipeline and records the outcome.
//!
//! ## Overview
//!
//! - **Connectors** ([`scan::connector`]): one integration per external
//!   source, behind the [`scan::connector::SourceConnector`] trait
//! - **Coordinator** ([`scan::coordinator`]): validates a configuration,
//!   fans out to connectors, advances the `connect -> collect -> analyze ->
//!   compile -> score` pipeline and owns cancellation
//! - **Event stream** ([`scan::event_stream`]): ordered, append-only log of
//!   live updates with resumable reads
//! - **Metrics** ([`scan::metrics`]): counters folded from the event stream
//!   and source statuses
//! - **History** ([`scan::history`]): storage and paginated retrieval of
//!   terminal runs
//!
//! ## Feature Flags
//!
//! - `postgres`: enables the SQLx-backed history store

pub mod api_types;
pub mod error;
pub mod scan;

pub use error::{Result, ScanError};
pub use leasewatch_model as model;
