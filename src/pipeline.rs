//! parallel checksum pipeline
//!
//! a fixed pool of workers reads [`ChecksumJob`]s from a bounded queue,
//! streams each file through its hash, and emits [`ChecksumResult`]s on a
//! bounded output queue. per-file failures are carried in the result; the
//! pool itself never fails. cancellation is cooperative: workers abandon
//! in-flight files at the next read boundary and drain remaining jobs
//! without processing them.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::digest::{checksum_cancelable, Digest, DigestAlgorithm};
use crate::error::Result;

/// queue capacity between producers, workers, and the consumer
const CHANNEL_CAPACITY: usize = 256;

/// cooperative cancellation token shared across a streaming operation
#[derive(Clone, Debug, Default)]
pub struct Cancel(Arc<AtomicBool>);

impl Cancel {
    pub fn new() -> Self {
        Self::default()
    }

    /// request cancellation; observers stop at their next check point
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// a single file to digest
#[derive(Clone, Debug)]
pub struct ChecksumJob {
    pub path: PathBuf,
    pub algorithm: DigestAlgorithm,
    /// digest the file is expected to have, carried through to the result
    pub expected: Option<Digest>,
}

/// outcome of one job; order across jobs is unspecified
#[derive(Debug)]
pub struct ChecksumResult {
    pub path: PathBuf,
    pub algorithm: DigestAlgorithm,
    pub expected: Option<Digest>,
    pub computed: Result<Digest>,
}

impl ChecksumResult {
    /// true when a computed digest differs from the expected one
    pub fn is_mismatch(&self) -> bool {
        match (&self.computed, &self.expected) {
            (Ok(computed), Some(expected)) => computed != expected,
            _ => false,
        }
    }
}

/// worker pool digesting files from a job queue
pub struct Digester {
    jobs: Sender<ChecksumJob>,
    results: Receiver<ChecksumResult>,
}

impl Digester {
    /// spawn a pool with one worker per cpu core
    pub fn spawn_default(cancel: &Cancel) -> Self {
        Self::spawn(num_cpus::get(), cancel)
    }

    /// spawn a pool of `workers` threads
    ///
    /// workers exit when the job queue closes or cancellation fires; the
    /// result queue closes once the last worker exits.
    pub fn spawn(workers: usize, cancel: &Cancel) -> Self {
        let (job_tx, job_rx) = bounded::<ChecksumJob>(CHANNEL_CAPACITY);
        let (res_tx, res_rx) = bounded::<ChecksumResult>(CHANNEL_CAPACITY);

        for _ in 0..workers.max(1) {
            let jobs = job_rx.clone();
            let results = res_tx.clone();
            let cancel = cancel.clone();
            thread::spawn(move || {
                for job in jobs.iter() {
                    // once canceled, keep draining so producers never block
                    if cancel.is_canceled() {
                        continue;
                    }
                    let computed = checksum_cancelable(job.algorithm, &job.path, &cancel);
                    let result = ChecksumResult {
                        path: job.path,
                        algorithm: job.algorithm,
                        expected: job.expected,
                        computed,
                    };
                    if results.send(result).is_err() {
                        break;
                    }
                }
            });
        }

        Digester {
            jobs: job_tx,
            results: res_rx,
        }
    }

    /// clone of the job queue for a producer thread
    pub fn sender(&self) -> Sender<ChecksumJob> {
        self.jobs.clone()
    }

    /// drop the pool's own job handle and hand back the result stream
    ///
    /// the stream ends once every producer clone is dropped and the
    /// workers have flushed their last results.
    pub fn finish(self) -> Receiver<ChecksumResult> {
        drop(self.jobs);
        self.results
    }
}
