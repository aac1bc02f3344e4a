// Export public modules
pub mod common;
pub mod storage;
pub mod index;
pub mod transaction;

// Re-export key items for convenient access
pub use storage::buffer::BufferPoolManager;
pub use storage::buffer::BufferPoolError;
pub use storage::disk::DiskManager;
pub use storage::table::{TableHeap, Tuple};
pub use index::btree::BPlusTree;
pub use transaction::{LockManager, Transaction, TransactionManager, TransactionState};
pub use transaction::wal::log_manager::LogManager;
pub use transaction::wal::recovery::LogRecovery;
