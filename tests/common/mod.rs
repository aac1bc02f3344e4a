use std::sync::Arc;
use anyhow::Result;
use tempfile::TempDir;

use granitedb::storage::buffer::BufferPoolManager;
use granitedb::storage::disk::DiskManager;
use granitedb::transaction::wal::log_manager::LogManager;

/// Buffer pool over a throwaway database; the TempDir keeps the files alive
/// for the duration of the test
#[allow(dead_code)]
pub fn create_test_buffer_pool(pool_size: usize) -> Result<(Arc<BufferPoolManager>, TempDir)> {
    let dir = TempDir::new()?;
    let disk_manager = Arc::new(DiskManager::new(
        dir.path().join("test.db"),
        dir.path().join("test.log"),
    )?);
    Ok((
        Arc::new(BufferPoolManager::new(pool_size, disk_manager)),
        dir,
    ))
}

/// Full WAL-enabled stack: disk manager, log manager, and a buffer pool that
/// honors the write-ahead rule. The flush thread is NOT started; tests
/// enable logging explicitly.
#[allow(dead_code)]
pub fn create_test_engine(
    pool_size: usize,
) -> Result<(
    Arc<DiskManager>,
    Arc<LogManager>,
    Arc<BufferPoolManager>,
    TempDir,
)> {
    let dir = TempDir::new()?;
    let (disk_manager, log_manager, buffer_pool) = open_engine(&dir, pool_size)?;
    Ok((disk_manager, log_manager, buffer_pool, dir))
}

/// Reopen the engine over existing files, as a restart after a crash would
#[allow(dead_code)]
pub fn open_engine(
    dir: &TempDir,
    pool_size: usize,
) -> Result<(Arc<DiskManager>, Arc<LogManager>, Arc<BufferPoolManager>)> {
    let disk_manager = Arc::new(DiskManager::new(
        dir.path().join("test.db"),
        dir.path().join("test.log"),
    )?);
    let log_manager = Arc::new(LogManager::new(Arc::clone(&disk_manager)));
    let buffer_pool = Arc::new(BufferPoolManager::new_with_wal(
        pool_size,
        Arc::clone(&disk_manager),
        Arc::clone(&log_manager),
    ));
    Ok((disk_manager, log_manager, buffer_pool))
}
