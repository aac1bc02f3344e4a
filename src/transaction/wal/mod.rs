// Write-ahead logging: record format, append buffer + flush thread, recovery

pub mod log_record;
pub mod log_manager;
pub mod recovery;
