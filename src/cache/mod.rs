//! Client-side cache.
//!
//! - [`Cache`]: typed get/add API with sliding, absolute or change-tracked
//!   lifetimes
//! - [`InvalidationOrchestrator`]: removes change-tracked entries when the
//!   service pushes a change for their resource
//! - [`PendingCallbacks`]: one-shot key callbacks
//! - [`ContextFactory`] / [`CacheContext`]: the shared connection state

mod callbacks;
mod context;
mod dependency;
mod facade;
mod item;
mod orchestrator;

pub use callbacks::*;
pub use context::*;
pub use dependency::*;
pub use facade::*;
pub use item::*;
pub use orchestrator::*;

#[cfg(test)]
mod facade_test;
#[cfg(test)]
mod orchestrator_test;
