// Shared plumbing used by readers, scanners and the block cache

pub mod io_pool;

pub use io_pool::ReaderPool;
