//! Fixed-window rate limiting for Warden.
//!
//! Requests are mapped to a key, counted in a [`CounterStore`] and checked against the
//! quota of the [`RateLimitPolicy`] selected for their route. Counts live in memory or in
//! Redis when several processes share quotas.

#![deny(missing_docs)]

pub mod clock;
mod error;
pub mod key;
mod manager;
mod policy;
mod request;
mod route;
pub mod storage;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::RateLimitError;
pub use key::KeyGenerator;
pub use manager::RateLimitManager;
pub use policy::{Decision, Denial, QuotaState, RateLimitPolicy, RateLimitPolicyBuilder};
pub use request::{RateLimitRequest, RateLimitRequestBuilder};
pub use route::RouteTable;
pub use storage::{CounterStore, InMemoryStorage, RateLimitRecord, RedisStorage, Storage, StorageError};
