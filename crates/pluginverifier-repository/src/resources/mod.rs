//! The generic resource repository.
//!
//! A [`ResourceRepository`] maps keys to resources that a [`ResourceProvider`] creates on
//! demand. Clients receive a [`ResourceLock`], and the entry stays pinned until every lock on it
//! has been released. A [`SweepPolicy`] decides which unlocked entries to evict once the total
//! [`ResourceWeight`] grows too large.

mod error;
mod lock;
mod provider;
mod repository;
mod sweep;
mod usage;
mod weight;

pub use error::*;
pub use lock::*;
pub use provider::*;
pub use repository::{RepositoryBuilder, Resource, ResourceKey, ResourceRepository};
pub use sweep::*;
pub use usage::*;
pub use weight::*;
