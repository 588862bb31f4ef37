//! Distributed cache with change-notification invalidation.
//!
//! Cache clients keep one self-healing duplex channel to a change-tracking
//! service and subscribe their change-tracked entries on it. When a tracked
//! resource changes, the service pushes the change to every interested
//! subscriber and the client drops the matching entries.

pub mod cache;
pub mod client;
mod config;
mod errors;
pub mod metrics;
pub mod proto;
pub mod server;
pub mod store;
pub mod utils;

pub use cache::Cache;
pub use cache::CacheContext;
pub use cache::ChangeDependency;
pub use cache::ContextFactory;
pub use cache::Expiration;
pub use client::ChangeReporter;
pub use config::*;
pub use errors::*;
pub use server::ChangeTrackingServer;
pub use store::KeyEvent;
pub use utils::*;
