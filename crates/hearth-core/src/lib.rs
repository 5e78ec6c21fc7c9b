//! Hearth Core
//!
//! Shared primitives for the hearth asset cache: the variable-size block
//! allocator that backs asset payloads, counting semaphores, the decode task
//! pool, and logging/profiling setup.

pub mod alloc;
pub mod logging;
pub mod profiling;
pub mod sync;
pub mod task_pool;

pub use task_pool::TaskPool;
