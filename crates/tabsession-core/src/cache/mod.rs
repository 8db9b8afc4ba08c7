//! Entity invalidation for the data-fetch cache.
//!
//! UI regions subscribe their cache keys under the entities they display.
//! A mutation invalidates an entity, and the affected keys are refreshed as
//! one deferred batch instead of a synchronous loop on the mutating tick.

pub mod key;
pub mod registry;
pub mod worker;

pub use key::CacheKey;
pub use registry::{BatchState, InvalidationBatch, InvalidationRegistry};
pub use worker::{CacheRefresher, InvalidationWorker};
