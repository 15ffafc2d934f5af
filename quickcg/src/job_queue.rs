//! The job queue. This runs 1 or more worker threads and has them run method compilation jobs in
//! the order they were queued.

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::{
    cmp,
    collections::VecDeque,
    env,
    error::Error,
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
};

/// A job for the job queue.
pub(crate) struct Job {
    main: Box<dyn FnOnce() + Send>,
}

impl Job {
    pub(crate) fn new(main: Box<dyn FnOnce() + Send>) -> Self {
        Self { main }
    }
}

pub(crate) struct JobQueue {
    /// The hard cap on the number of worker threads.
    max_worker_threads: usize,
    /// How many worker threads are waiting for work?
    idle_worker_threads: AtomicUsize,
    /// Once set, worker threads exit as soon as they next look for work.
    shutting_down: AtomicBool,
    /// [JoinHandle]s to each worker thread so that on shutdown we can see whether any of them
    /// panicked, and if so percolate the panic upwards.
    worker_threads: Mutex<Vec<JoinHandle<()>>>,
    /// The ordered queue of jobs.
    queue: Arc<(Condvar, Mutex<VecDeque<Job>>)>,
}

impl JobQueue {
    /// Create a queue with at most `QCG_JOBS` worker threads (default: one less than the number of
    /// CPUs). There is always at least one worker thread.
    pub(crate) fn new() -> Result<Arc<Self>, Box<dyn Error>> {
        let max = match env::var("QCG_JOBS") {
            Ok(x) => x
                .parse::<usize>()
                .map_err(|e| format!("Invalid value for QCG_JOBS: {e}"))?,
            _ => num_cpus::get().saturating_sub(1),
        };
        Ok(Self::with_max_workers(max))
    }

    pub(crate) fn with_max_workers(max: usize) -> Arc<Self> {
        Arc::new(Self {
            queue: Arc::new((Condvar::new(), Mutex::new(VecDeque::new()))),
            max_worker_threads: cmp::max(1, max),
            worker_threads: Mutex::new(Vec::new()),
            idle_worker_threads: AtomicUsize::new(0),
            shutting_down: AtomicBool::new(false),
        })
    }

    /// Queue `job` to be run on a worker thread.
    pub(crate) fn push(self: &Arc<Self>, job: Job) {
        let (cv, mtx) = &*self.queue;
        mtx.lock().push_back(job);
        cv.notify_one();

        // Is there an idle worker thread that can take the job on?
        if self.idle_worker_threads.load(Ordering::Relaxed) == 0 {
            // Do we have enough active worker threads? If not, spin another up.
            let mut lk = self.worker_threads.lock();
            if lk.len() < self.max_worker_threads {
                self.idle_worker_threads.fetch_add(1, Ordering::Relaxed);
                let self_cl = Arc::clone(self);
                let hdl = thread::spawn(move || self_cl.work());
                lk.push(hdl);
            }
        }
    }

    fn work(&self) {
        let (cv, mtx) = &*self.queue;
        let mut lk = mtx.lock();
        while !self.shutting_down.load(Ordering::Relaxed) {
            self.idle_worker_threads.fetch_sub(1, Ordering::Relaxed);
            match lk.pop_front() {
                Some(job) => {
                    MutexGuard::unlocked(&mut lk, job.main);
                    self.idle_worker_threads.fetch_add(1, Ordering::Relaxed);
                }
                None => {
                    self.idle_worker_threads.fetch_add(1, Ordering::Relaxed);
                    cv.wait(&mut lk);
                }
            }
        }
    }

    /// Stop the worker threads once they have finished their current job and join them. Jobs
    /// still queued are dropped. If a worker thread panicked, the panic is resumed on this thread.
    pub(crate) fn shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        {
            // Holding the queue lock means no worker is between its check and its wait.
            let _lk = self.queue.1.lock();
            self.queue.0.notify_all();
        }
        let mut lk = self.worker_threads.lock();
        for hdl in lk.drain(..) {
            if let Err(e) = hdl.join() {
                // Despite the name `resume_unwind` will abort if the unwind strategy in Rust is
                // set to `abort`.
                eprintln!("quickcg worker thread error");
                std::panic::resume_unwind(e);
            }
        }
        self.queue.1.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn runs_every_job() {
        let jq = JobQueue::with_max_workers(3);
        let (tx, rx) = mpsc::channel();
        for i in 0..20 {
            let tx = tx.clone();
            jq.push(Job::new(Box::new(move || tx.send(i).unwrap())));
        }
        drop(tx);
        let mut got = rx.iter().take(20).collect::<Vec<_>>();
        got.sort_unstable();
        assert_eq!(got, (0..20).collect::<Vec<_>>());
        assert!(jq.worker_threads.lock().len() <= 3);
        jq.shutdown();
        assert!(jq.worker_threads.lock().is_empty());
    }

    #[test]
    fn one_worker_keeps_order() {
        let jq = JobQueue::with_max_workers(0);
        let (tx, rx) = mpsc::channel();
        for i in 0..10 {
            let tx = tx.clone();
            jq.push(Job::new(Box::new(move || tx.send(i).unwrap())));
        }
        assert_eq!(rx.iter().take(10).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        jq.shutdown();
    }

    #[test]
    #[should_panic]
    fn worker_panics_percolate() {
        let jq = JobQueue::with_max_workers(1);
        let (tx, rx) = mpsc::channel::<()>();
        jq.push(Job::new(Box::new(move || {
            drop(tx);
            panic!("job failed");
        })));
        // Wait for the job to have run.
        assert!(rx.recv().is_err());
        jq.shutdown();
    }
}
