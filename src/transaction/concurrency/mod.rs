// Transaction concurrency module exports

pub mod lock_manager;
pub mod transaction;
pub mod transaction_manager;

// Public exports
pub use lock_manager::{LockManager, LockType};
pub use transaction::{Transaction, TransactionState, WriteRecord, WriteType};
pub use transaction_manager::{TransactionManager, TransactionError};
