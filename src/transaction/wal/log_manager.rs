use std::sync::Arc;
use std::thread::JoinHandle;
use log::warn;
use parking_lot::{Condvar, Mutex};
use thiserror::Error;

use crate::common::types::{Lsn, INVALID_LSN, LOG_BUFFER_SIZE, LOG_TIMEOUT};
use crate::storage::disk::{DiskManager, DiskManagerError};
use crate::transaction::wal::log_record::LogRecord;

#[derive(Error, Debug)]
pub enum LogManagerError {
    #[error("Log record of {0} bytes exceeds the log buffer capacity")]
    RecordTooLarge(usize),

    #[error("Disk manager error: {0}")]
    DiskManagerError(#[from] DiskManagerError),
}

pub type Result<T> = std::result::Result<T, LogManagerError>;

/// Write-ahead log manager: an in-memory append buffer drained by a
/// background flush thread. LSNs are assigned strictly increasing from 0
/// under the append mutex; `persistent_lsn` is the highest LSN known to be
/// on disk. Logging is enabled by starting the flush thread and disabled by
/// stopping it; cooperating components consult `is_enabled` before emitting
/// records.
pub struct LogManager {
    disk_manager: Arc<DiskManager>,
    inner: Mutex<LogInner>,
    /// wakes the flush thread (buffer full, force, shutdown)
    flush_requested: Condvar,
    /// broadcast after each completed flush
    flush_completed: Condvar,
    flush_thread: Mutex<Option<JoinHandle<()>>>,
}

struct LogInner {
    log_buffer: Vec<u8>,
    offset: usize,
    next_lsn: Lsn,
    persistent_lsn: Lsn,
    enabled: bool,
    /// set by force requests so an idle flush thread skips its timed wait
    flush_pending: bool,
    flushes_started: u64,
    flushes_completed: u64,
}

impl LogManager {
    pub fn new(disk_manager: Arc<DiskManager>) -> Self {
        Self {
            disk_manager,
            inner: Mutex::new(LogInner {
                log_buffer: vec![0u8; LOG_BUFFER_SIZE],
                offset: 0,
                next_lsn: 0,
                persistent_lsn: INVALID_LSN,
                enabled: false,
                flush_pending: false,
                flushes_started: 0,
                flushes_completed: 0,
            }),
            flush_requested: Condvar::new(),
            flush_completed: Condvar::new(),
            flush_thread: Mutex::new(None),
        }
    }

    /// Whether log-record emission is active (the flush thread is running)
    pub fn is_enabled(&self) -> bool {
        self.inner.lock().enabled
    }

    pub fn persistent_lsn(&self) -> Lsn {
        self.inner.lock().persistent_lsn
    }

    pub fn next_lsn(&self) -> Lsn {
        self.inner.lock().next_lsn
    }

    /// Enable logging and start the background flush thread
    pub fn run_flush_thread(self: &Arc<Self>) {
        {
            let mut inner = self.inner.lock();
            if inner.enabled {
                return;
            }
            inner.enabled = true;
        }
        let manager = Arc::clone(self);
        *self.flush_thread.lock() = Some(std::thread::spawn(move || manager.flush_loop()));
    }

    /// Disable logging, then join the flush thread; the thread drains its
    /// current buffer before exiting
    pub fn stop_flush_thread(&self) {
        {
            let mut inner = self.inner.lock();
            if !inner.enabled {
                return;
            }
            inner.enabled = false;
            self.flush_requested.notify_one();
        }
        if let Some(handle) = self.flush_thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Append a record, assigning its LSN. Blocks while the record does not
    /// fit in the remaining buffer, signalling the flush thread and waiting
    /// for the in-flight flush to make room.
    pub fn append_log_record(&self, record: &mut LogRecord) -> Result<Lsn> {
        let len = record.size as usize;
        if len > LOG_BUFFER_SIZE {
            return Err(LogManagerError::RecordTooLarge(len));
        }

        let mut inner = self.inner.lock();
        while inner.offset + len > LOG_BUFFER_SIZE {
            inner.flush_pending = true;
            self.flush_requested.notify_one();
            self.flush_completed.wait(&mut inner);
        }

        record.lsn = inner.next_lsn;
        inner.next_lsn += 1;
        let offset = inner.offset;
        record.serialize_into(&mut inner.log_buffer[offset..offset + len]);
        inner.offset += len;
        Ok(record.lsn)
    }

    /// Block until the most recently initiated flush completes; no-op when
    /// none is outstanding
    pub fn wait_for_flush(&self) {
        let mut inner = self.inner.lock();
        let target = inner.flushes_started;
        while inner.flushes_completed < target {
            self.flush_completed.wait(&mut inner);
        }
    }

    /// Signal the flush thread and wait for a flush initiated after this
    /// call to complete
    pub fn force_flush_and_wait(&self) {
        let mut inner = self.inner.lock();
        if !inner.enabled {
            return;
        }
        let target = inner.flushes_started + 1;
        inner.flush_pending = true;
        self.flush_requested.notify_one();
        while inner.flushes_completed < target {
            self.flush_completed.wait(&mut inner);
        }
    }

    /// Block until everything up to `lsn` is durable. This is the
    /// force-at-commit loop and the write-ahead gate for dirty page flushes.
    pub fn flush_till_lsn(&self, lsn: Lsn) {
        let mut inner = self.inner.lock();
        while inner.enabled && inner.persistent_lsn < lsn {
            inner.flush_pending = true;
            self.flush_requested.notify_one();
            self.flush_completed.wait(&mut inner);
        }
    }

    fn flush_loop(&self) {
        // the flush buffer lives outside the mutex; only the swap is locked
        let mut flush_buffer = vec![0u8; LOG_BUFFER_SIZE];
        loop {
            let mut inner = self.inner.lock();
            if inner.enabled && inner.offset == 0 && !inner.flush_pending {
                let _ = self.flush_requested.wait_for(&mut inner, LOG_TIMEOUT);
            }

            let running = inner.enabled;
            let flush_size = inner.offset;
            let last_lsn = inner.next_lsn - 1;
            if flush_size > 0 {
                std::mem::swap(&mut inner.log_buffer, &mut flush_buffer);
                inner.offset = 0;
            }
            inner.flush_pending = false;
            inner.flushes_started += 1;
            let seq = inner.flushes_started;
            drop(inner);

            let mut wrote = flush_size > 0;
            if flush_size > 0 {
                if let Err(e) = self.disk_manager.write_log(&flush_buffer[..flush_size]) {
                    warn!("log flush of {} bytes failed: {}", flush_size, e);
                    wrote = false;
                }
            }

            let mut inner = self.inner.lock();
            if wrote && last_lsn > inner.persistent_lsn {
                inner.persistent_lsn = last_lsn;
            }
            inner.flushes_completed = seq;
            self.flush_completed.notify_all();

            if !running {
                break;
            }
        }
    }
}
