//! Repositories of files on disk.

mod mapper;
mod repository;

pub use mapper::*;
pub use repository::*;
