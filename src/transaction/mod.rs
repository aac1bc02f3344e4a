// Transaction management: concurrency control and write-ahead logging

pub mod wal;
pub mod concurrency;

// Public exports
pub use wal::log_manager::LogManager;
pub use wal::log_record::{LogRecord, LogRecordType};
pub use wal::recovery::LogRecovery;
pub use concurrency::{
    LockManager, Transaction, TransactionError, TransactionManager, TransactionState,
};
