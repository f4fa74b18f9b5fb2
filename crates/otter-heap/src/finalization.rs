//! Background finalization: runs destructors of dead objects off the
//! mutator thread.
//!
//! Only storage that is private to a dead object may be sent here: the task
//! must not touch layouts, type records or any other shared cell, since those
//! may already have been reclaimed by the time the worker runs it.

use crossbeam_channel::{Receiver, Sender, unbounded};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::JoinHandle;

/// A unit of finalization work
pub trait FinalizeTask: Send {
    /// Release the owned storage
    fn finalize(self: Box<Self>);
}

enum Message {
    Batch(Vec<Box<dyn FinalizeTask>>),
    Shutdown,
}

#[derive(Default)]
struct Progress {
    submitted: usize,
    finalized: usize,
}

struct Shared {
    progress: Mutex<Progress>,
    idle: Condvar,
}

/// Worker thread draining finalization batches
pub struct BackgroundFinalizer {
    tx: Sender<Message>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl BackgroundFinalizer {
    /// Start the worker thread
    pub fn spawn() -> Self {
        let (tx, rx) = unbounded();
        let shared = Arc::new(Shared {
            progress: Mutex::new(Progress::default()),
            idle: Condvar::new(),
        });
        let worker_shared = Arc::clone(&shared);
        let worker = std::thread::Builder::new()
            .name("otter-finalizer".into())
            .spawn(move || run_worker(rx, worker_shared))
            .ok();
        Self { tx, shared, worker }
    }

    /// Queue a batch of tasks.
    ///
    /// Falls back to running the batch inline if the worker is gone.
    pub fn submit(&self, batch: Vec<Box<dyn FinalizeTask>>) {
        let count = batch.len();
        self.shared.progress.lock().submitted += count;
        if let Err(err) = self.tx.send(Message::Batch(batch)) {
            if let Message::Batch(batch) = err.into_inner() {
                finish_batch(batch, &self.shared);
            }
        }
    }

    /// Block until every submitted task has run
    pub fn flush(&self) {
        let mut progress = self.shared.progress.lock();
        while progress.finalized < progress.submitted {
            self.shared.idle.wait(&mut progress);
        }
    }

    /// Total tasks finalized so far
    pub fn finalized(&self) -> usize {
        self.shared.progress.lock().finalized
    }
}

fn finish_batch(batch: Vec<Box<dyn FinalizeTask>>, shared: &Shared) {
    let count = batch.len();
    for task in batch {
        task.finalize();
    }
    let mut progress = shared.progress.lock();
    progress.finalized += count;
    shared.idle.notify_all();
}

fn run_worker(rx: Receiver<Message>, shared: Arc<Shared>) {
    while let Ok(message) = rx.recv() {
        match message {
            Message::Batch(batch) => finish_batch(batch, &shared),
            Message::Shutdown => break,
        }
    }
}

impl Drop for BackgroundFinalizer {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl std::fmt::Debug for BackgroundFinalizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let progress = self.shared.progress.lock();
        f.debug_struct("BackgroundFinalizer")
            .field("submitted", &progress.submitted)
            .field("finalized", &progress.finalized)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted(Arc<AtomicUsize>, Vec<u64>);

    impl FinalizeTask for Counted {
        fn finalize(self: Box<Self>) {
            self.0.fetch_add(self.1.len(), Ordering::SeqCst);
        }
    }

    #[test]
    fn test_batches_run_off_thread() {
        let freed = Arc::new(AtomicUsize::new(0));
        let finalizer = BackgroundFinalizer::spawn();

        let batch: Vec<Box<dyn FinalizeTask>> = (0..4)
            .map(|_| Box::new(Counted(Arc::clone(&freed), vec![0; 3])) as Box<dyn FinalizeTask>)
            .collect();
        finalizer.submit(batch);
        finalizer.flush();

        assert_eq!(freed.load(Ordering::SeqCst), 12);
        assert_eq!(finalizer.finalized(), 4);
    }

    #[test]
    fn test_drop_joins_worker() {
        let freed = Arc::new(AtomicUsize::new(0));
        {
            let finalizer = BackgroundFinalizer::spawn();
            finalizer.submit(vec![Box::new(Counted(Arc::clone(&freed), vec![1]))]);
        }
        assert_eq!(freed.load(Ordering::SeqCst), 1);
    }
}
