//! Shared, lazily closed ZIP/JAR filesystems.

mod cache;
mod filesystem;

pub use cache::*;
pub use filesystem::*;
