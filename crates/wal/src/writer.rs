//! Append side of the WAL: a buffered, fsync-aware writer with an optional
//! group-commit worker.
//!
//! In **direct mode** every [`Wal::append`] serializes the record and writes
//! it through the buffered writer under a mutex; nothing is fsynced until
//! [`Wal::sync`]. In **group-commit mode** appends are handed to a background
//! worker over a bounded channel. The worker batches frames and performs one
//! buffered-write + `fsync` cycle per batch, flushing when the batch fills,
//! when the periodic tick fires, on an explicit flush request, or when a
//! durability barrier arrives.
//!
//! Background I/O errors are never dropped: they are parked in a shared slot
//! and returned from the next [`Wal::sync`], [`Wal::wait_for_pending`], or
//! [`Wal::close`] call.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{bounded, tick, Receiver, Sender};
use crossbeam::select;
use parking_lot::Mutex;

use crate::{Record, WalError};

/// Capacity of the in-memory queue between producers and the worker.
/// Producers block on `append` once this many records are in flight.
const GROUP_COMMIT_QUEUE_DEPTH: usize = 100;

/// Number of batched records that triggers a flush ahead of the tick.
const GROUP_COMMIT_BATCH_RECORDS: usize = 10;

/// Tunables for [`Wal::open`].
#[derive(Debug, Clone)]
pub struct WalOptions {
    /// Batch appends through a background worker instead of writing inline.
    pub group_commit: bool,
    /// Maximum delay before the worker flushes a non-empty batch.
    pub group_commit_interval: Duration,
    /// Capacity of the byte-level write buffer in front of the file.
    pub buffer_size: usize,
}

impl Default for WalOptions {
    fn default() -> Self {
        Self {
            group_commit: true,
            group_commit_interval: Duration::from_millis(10),
            buffer_size: 64 * 1024,
        }
    }
}

/// Work items handed to the group-commit worker.
enum Job {
    /// An encoded frame to batch.
    Record(Vec<u8>),
    /// Flush whatever is batched now, without waiting for the tick.
    Flush,
}

/// State shared between the front end and the group-commit worker.
struct Shared {
    writer: Mutex<BufWriter<File>>,
    /// First I/O error from a background flush, held until a synchronous
    /// call can return it.
    deferred_error: Mutex<Option<io::Error>>,
}

impl Shared {
    /// Writes every frame in `batch`, flushes the buffer, and fsyncs.
    /// On failure the error is parked for the next synchronous caller and
    /// the batch is dropped; retrying after a failed fsync would report
    /// durability the kernel no longer guarantees.
    fn flush_batch(&self, batch: &mut Vec<Vec<u8>>) {
        if batch.is_empty() {
            return;
        }
        let mut writer = self.writer.lock();
        let result = (|| -> io::Result<()> {
            for frame in batch.iter() {
                writer.write_all(frame)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()
        })();
        if let Err(e) = result {
            tracing::error!(error = %e, records = batch.len(), "wal flush failed");
            let mut slot = self.deferred_error.lock();
            if slot.is_none() {
                *slot = Some(e);
            }
        }
        batch.clear();
    }
}

/// An append-only write-ahead log.
///
/// All methods other than [`Wal::close`] take `&self`; the log is safe to
/// share across threads behind an `Arc` or inside a larger engine struct.
pub struct Wal {
    shared: Arc<Shared>,
    closed: AtomicBool,
    /// `Some` in group-commit mode.
    jobs: Option<Sender<Job>>,
    barriers: Option<Sender<Sender<()>>>,
    worker: Option<JoinHandle<()>>,
}

impl Wal {
    /// Opens (or creates) the log at `path` for appending and, in
    /// group-commit mode, starts the background worker.
    pub fn open<P: AsRef<Path>>(path: P, opts: WalOptions) -> Result<Self, WalError> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;

        let shared = Arc::new(Shared {
            writer: Mutex::new(BufWriter::with_capacity(opts.buffer_size, file)),
            deferred_error: Mutex::new(None),
        });

        let (jobs, barriers, worker) = if opts.group_commit {
            let (job_tx, job_rx) = bounded(GROUP_COMMIT_QUEUE_DEPTH);
            let (barrier_tx, barrier_rx) = bounded::<Sender<()>>(1);
            let worker_shared = Arc::clone(&shared);
            let interval = opts.group_commit_interval;
            let handle = thread::Builder::new()
                .name("wal-group-commit".into())
                .spawn(move || group_commit_loop(worker_shared, job_rx, barrier_rx, interval))?;
            (Some(job_tx), Some(barrier_tx), Some(handle))
        } else {
            (None, None, None)
        };

        tracing::debug!(path = %path.as_ref().display(), group_commit = opts.group_commit, "wal opened");

        Ok(Self {
            shared,
            closed: AtomicBool::new(false),
            jobs,
            barriers,
            worker,
        })
    }

    /// Appends a record.
    ///
    /// Direct mode: serializes and writes through the buffered writer; the
    /// record is *not* fsynced until [`Wal::sync`]. Group-commit mode: hands
    /// the encoded frame to the worker and returns as soon as it is
    /// enqueued; durability follows at the next batch flush.
    pub fn append(&self, record: &Record) -> Result<(), WalError> {
        self.ensure_open()?;
        let frame = record.encode();
        match &self.jobs {
            Some(jobs) => jobs.send(Job::Record(frame)).map_err(|_| WalError::Closed),
            None => {
                let mut writer = self.shared.writer.lock();
                writer.write_all(&frame)?;
                Ok(())
            }
        }
    }

    /// Forces buffered data to disk.
    ///
    /// Direct mode: flushes the buffer and fsyncs before returning.
    /// Group-commit mode: asks the worker to flush its batch immediately but
    /// does not wait for it; any error from an *earlier* background flush is
    /// returned here.
    pub fn sync(&self) -> Result<(), WalError> {
        self.ensure_open()?;
        match &self.jobs {
            Some(jobs) => {
                self.take_deferred_error()?;
                jobs.send(Job::Flush).map_err(|_| WalError::Closed)
            }
            None => self.flush_direct(),
        }
    }

    /// Durability barrier: returns only after every record enqueued before
    /// this call has been written to the file and fsynced.
    ///
    /// In direct mode this is equivalent to [`Wal::sync`].
    pub fn wait_for_pending(&self) -> Result<(), WalError> {
        self.ensure_open()?;
        match &self.barriers {
            Some(barriers) => {
                let (done_tx, done_rx) = bounded(1);
                barriers.send(done_tx).map_err(|_| WalError::Closed)?;
                done_rx.recv().map_err(|_| WalError::Closed)?;
                self.take_deferred_error()
            }
            None => self.flush_direct(),
        }
    }

    /// Stops the worker (flushing anything batched), flushes and fsyncs the
    /// file, and surfaces any deferred background error.
    ///
    /// Every subsequent operation, including a second `close`, fails with
    /// [`WalError::Closed`].
    pub fn close(&mut self) -> Result<(), WalError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Err(WalError::Closed);
        }
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), WalError> {
        // Dropping the job sender closes the channel; the worker flushes its
        // remaining batch and exits.
        drop(self.jobs.take());
        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                tracing::error!("wal group-commit worker panicked");
            }
        }
        drop(self.barriers.take());

        {
            let mut writer = self.shared.writer.lock();
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        self.take_deferred_error()
    }

    fn flush_direct(&self) -> Result<(), WalError> {
        let mut writer = self.shared.writer.lock();
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), WalError> {
        if self.closed.load(Ordering::Acquire) {
            Err(WalError::Closed)
        } else {
            Ok(())
        }
    }

    fn take_deferred_error(&self) -> Result<(), WalError> {
        match self.shared.deferred_error.lock().take() {
            Some(e) => Err(WalError::Io(e)),
            None => Ok(()),
        }
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        // Best-effort teardown when the caller skipped close(); errors have
        // nowhere to go from a destructor.
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.shutdown();
        }
    }
}

/// The single-consumer group-commit loop.
///
/// Waits on three inputs at once: the record channel, the periodic tick, and
/// the barrier channel. A barrier drains every record already sitting in the
/// channel into the batch, flushes, and only then signals completion, which
/// gives [`Wal::wait_for_pending`] its ordering guarantee.
fn group_commit_loop(
    shared: Arc<Shared>,
    jobs: Receiver<Job>,
    barriers: Receiver<Sender<()>>,
    interval: Duration,
) {
    let ticker = tick(interval);
    let mut batch: Vec<Vec<u8>> = Vec::with_capacity(GROUP_COMMIT_BATCH_RECORDS);

    loop {
        select! {
            recv(jobs) -> msg => match msg {
                Ok(Job::Record(frame)) => {
                    batch.push(frame);
                    if batch.len() >= GROUP_COMMIT_BATCH_RECORDS {
                        shared.flush_batch(&mut batch);
                    }
                }
                Ok(Job::Flush) => shared.flush_batch(&mut batch),
                Err(_) => {
                    // Channel closed: flush what is left and exit.
                    shared.flush_batch(&mut batch);
                    return;
                }
            },
            recv(ticker) -> _ => {
                if !batch.is_empty() {
                    shared.flush_batch(&mut batch);
                }
            }
            recv(barriers) -> request => {
                if let Ok(done) = request {
                    while let Ok(job) = jobs.try_recv() {
                        if let Job::Record(frame) = job {
                            batch.push(frame);
                        }
                    }
                    shared.flush_batch(&mut batch);
                    let _ = done.send(());
                }
            }
        }
    }
}
