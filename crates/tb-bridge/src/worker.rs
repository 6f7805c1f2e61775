use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use tb_core::BridgeError;

pub(crate) type Job = Box<dyn FnOnce() + Send>;

/// Dedicated worker thread draining boundary actions in strict submission
/// order, one at a time. Shutdown stops the loop without running whatever is
/// still queued; dropped jobs close their completion channels, so blocked
/// `run_blocking` callers wake up with `BRIDGE_WORKER_STOPPED` instead of
/// hanging.
pub(crate) struct Worker {
    sender: Sender<Job>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

#[derive(Clone)]
pub(crate) struct WorkerClient {
    sender: Sender<Job>,
}

impl Worker {
    pub fn spawn() -> Self {
        let (sender, receiver) = unbounded::<Job>();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let join = thread::Builder::new()
            .name("talebridge-worker".to_string())
            .spawn(move || {
                while let Ok(job) = receiver.recv() {
                    if stop_flag.load(Ordering::Acquire) {
                        break;
                    }
                    job();
                }
            })
            .expect("talebridge worker thread should spawn");
        Self {
            sender,
            stop,
            join: Some(join),
        }
    }

    pub fn client(&self) -> WorkerClient {
        WorkerClient {
            sender: self.sender.clone(),
        }
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let Some(join) = self.join.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        // Wake the loop if it is parked on an empty queue.
        let _ = self.sender.send(Box::new(|| {}));
        let _ = join.join();
    }

    #[cfg(test)]
    pub fn stop_probe(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl WorkerClient {
    pub fn run(&self, job: Job) {
        let _ = self.sender.send(job);
    }

    pub fn run_blocking<R: Send + 'static>(
        &self,
        job: impl FnOnce() -> R + Send + 'static,
    ) -> Result<R, BridgeError> {
        let (done_tx, done_rx) = crossbeam_channel::bounded(1);
        let wrapped: Job = Box::new(move || {
            let _ = done_tx.send(job());
        });
        if self.sender.send(wrapped).is_err() {
            return Err(stopped_error());
        }
        done_rx.recv().map_err(|_| stopped_error())
    }
}

pub(crate) fn stopped_error() -> BridgeError {
    BridgeError::new(
        "BRIDGE_WORKER_STOPPED",
        "Worker thread stopped before the call completed.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn jobs_run_in_submission_order() {
        let worker = Worker::spawn();
        let client = worker.client();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for index in 0..100 {
            let seen = Arc::clone(&seen);
            client.run(Box::new(move || {
                seen.lock().expect("seen poisoned").push(index);
            }));
        }
        let last = client
            .run_blocking(|| ())
            .expect("blocking call should complete");
        drop(last);
        assert_eq!(
            *seen.lock().expect("seen poisoned"),
            (0..100).collect::<Vec<_>>()
        );
        worker.stop();
    }

    #[test]
    fn cross_thread_submissions_serialize_in_per_thread_order() {
        let worker = Worker::spawn();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let submitters: Vec<_> = (0..4usize)
            .map(|submitter| {
                let client = worker.client();
                let seen = Arc::clone(&seen);
                thread::spawn(move || {
                    for sequence in 0..250usize {
                        let seen = Arc::clone(&seen);
                        client.run(Box::new(move || {
                            seen.lock()
                                .expect("seen poisoned")
                                .push((submitter, sequence, thread::current().id()));
                        }));
                    }
                })
            })
            .collect();
        for submitter in submitters {
            submitter.join().expect("submitter thread should complete");
        }
        worker
            .client()
            .run_blocking(|| ())
            .expect("drain barrier should complete");

        let seen = seen.lock().expect("seen poisoned");
        assert_eq!(seen.len(), 1000);
        let worker_thread = seen[0].2;
        let mut next = [0usize; 4];
        for (submitter, sequence, ran_on) in seen.iter() {
            assert_eq!(*ran_on, worker_thread, "jobs must share one executor thread");
            assert_eq!(
                *sequence, next[*submitter],
                "submissions from thread {submitter} must run in order"
            );
            next[*submitter] += 1;
        }
        drop(seen);
        worker.stop();
    }

    #[test]
    fn run_blocking_returns_the_job_result() {
        let worker = Worker::spawn();
        let value = worker
            .client()
            .run_blocking(|| 21 * 2)
            .expect("blocking call should complete");
        assert_eq!(value, 42);
        worker.stop();
    }

    #[test]
    fn stop_drops_queued_jobs_and_wakes_blocked_callers() {
        let worker = Worker::spawn();
        let client = worker.client();
        let stop_requested = worker.stop_probe();

        let (gate_tx, gate_rx) = crossbeam_channel::bounded::<()>(1);
        client.run(Box::new(move || {
            let _ = gate_rx.recv();
        }));

        let ran_second = Arc::new(AtomicBool::new(false));
        let ran_probe = Arc::clone(&ran_second);
        client.run(Box::new(move || {
            ran_probe.store(true, Ordering::SeqCst);
        }));

        let waiter_client = client.clone();
        let waiter = thread::spawn(move || waiter_client.run_blocking(|| 7));

        let stopper = thread::spawn(move || worker.stop());
        while !stop_requested.load(Ordering::Acquire) {
            thread::yield_now();
        }
        gate_tx.send(()).expect("gate should deliver");
        stopper.join().expect("stopper should complete");

        assert!(!ran_second.load(Ordering::SeqCst), "queued job must be dropped");
        let waited = waiter.join().expect("waiter thread should complete");
        let error = waited.expect_err("blocked caller must be woken with a failure");
        assert_eq!(error.code, "BRIDGE_WORKER_STOPPED");
    }
}
