//! Coordination stores shipped with the engine
//!
//! - [`MemoryStore`]: records in process memory, for tests and single-process runs
//! - [`FileStore`]: JSON record files guarded by file locks, shared by every
//!   agent process on the same host

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;
