//! Connector implementations and the built-in source catalog.

pub mod catalog;
pub mod http_feed;
pub mod scripted;

pub use catalog::{builtin_descriptor, builtin_descriptors, demo_registry};
pub use http_feed::{HttpFeedConfig, HttpFeedConnector};
pub use scripted::{ScriptOutcome, ScriptedConnector, SourceScript};
