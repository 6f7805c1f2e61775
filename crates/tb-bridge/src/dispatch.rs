use std::sync::Mutex;

pub(crate) type Callback = Box<dyn FnOnce() + Send>;

/// Buffer for engine-originated handler invocations while a dedicated worker
/// is active. Events are captured on the worker thread and only delivered
/// when the host pumps the queue from its own thread.
#[derive(Default)]
pub(crate) struct DispatchQueue {
    queue: Mutex<Vec<Callback>>,
}

impl DispatchQueue {
    pub fn add(&self, callback: Callback) {
        self.queue
            .lock()
            .expect("dispatch queue poisoned")
            .push(callback);
    }

    /// Swap the buffer out before iterating, so callbacks added while one is
    /// running land in the next flush rather than this one.
    pub fn flush(&self) {
        let drained = {
            let mut queue = self.queue.lock().expect("dispatch queue poisoned");
            if queue.is_empty() {
                return;
            }
            std::mem::take(&mut *queue)
        };
        for callback in drained {
            callback();
        }
    }
}
