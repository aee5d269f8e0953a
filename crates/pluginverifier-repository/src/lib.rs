//! Resource lifecycle management for the plugin verifier.
//!
//! Plugin archives, IDE and JDK descriptors and opened JAR filesystems are expensive to
//! provision. This crate caches them behind three closely related containers:
//!
//! - [`resources::ResourceRepository`]: a generic, weighted, key-indexed cache with
//!   request coalescing, reference-counted locks and a pluggable [`resources::SweepPolicy`].
//! - [`files::FileRepository`]: the same repository specialized to files on disk, seeded from
//!   the repository directory on startup and bounded by disk space.
//! - [`archives::ArchiveFilesystemCache`]: opened ZIP/JAR filesystems keyed by canonical path,
//!   closed after an idle retention period.
//!
//! All of them share one contract: a resource is provisioned at most once per key at a time,
//! it is never disposed while somebody holds a lock on it, and it is disposed exactly once.

#[macro_use]
pub mod metrics;

pub mod archives;
pub mod config;
pub mod files;
pub mod logging;
pub mod resources;
pub mod utils;
