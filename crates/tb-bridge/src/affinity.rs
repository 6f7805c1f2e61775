use std::sync::Mutex;
use std::thread::{self, ThreadId};

use tb_core::EngineRuntime;

pub(crate) type EngineFactory = Box<dyn FnOnce() -> Box<dyn EngineRuntime> + Send>;

struct EngineSlot {
    factory: Option<EngineFactory>,
    engine: Option<Box<dyn EngineRuntime>>,
    home: Option<ThreadId>,
}

// The engine object is not Send and never leaves the thread it was built on.
// The slot crosses threads only as an opaque container; `with` refuses access
// from every thread except the one recorded as home.
unsafe impl Send for EngineSlot {}

/// Lazily binds the engine to the first thread that touches it and rejects
/// direct access from any other thread afterwards. A wrong-thread call is a
/// host integration bug, so it aborts the calling thread instead of returning
/// an error.
pub(crate) struct EngineCell {
    slot: Mutex<EngineSlot>,
}

impl EngineCell {
    pub fn new(factory: EngineFactory) -> Self {
        Self {
            slot: Mutex::new(EngineSlot {
                factory: Some(factory),
                engine: None,
                home: None,
            }),
        }
    }

    /// True when the calling thread is the engine's home thread. False while
    /// the engine is still uninitialized.
    pub fn is_home_thread(&self) -> bool {
        let slot = self.slot.lock().expect("engine slot poisoned");
        slot.home == Some(thread::current().id())
    }

    /// Run `action` against the engine, initializing it here on first use.
    /// Must not be re-entered from within `action`.
    pub fn with<R>(&self, action: impl FnOnce(&mut dyn EngineRuntime) -> R) -> R {
        let mut slot = self.slot.lock().expect("engine slot poisoned");
        let current = thread::current().id();
        match slot.home {
            None => {
                let factory = slot
                    .factory
                    .take()
                    .expect("engine factory consumed without binding a home thread");
                slot.engine = Some(factory());
                slot.home = Some(current);
            }
            Some(home) => {
                if home != current {
                    panic!("talebridge: engine accessed from a thread other than its home thread");
                }
            }
        }
        let engine = slot
            .engine
            .as_mut()
            .expect("engine present after initialization");
        action(engine.as_mut())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_engine::{FakeEngine, Probe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn cell() -> EngineCell {
        let probe = Arc::new(Probe::default());
        EngineCell::new(Box::new(move || {
            Box::new(FakeEngine::new(Vec::new(), probe))
        }))
    }

    #[test]
    fn first_use_binds_home_thread() {
        let cell = cell();
        assert!(!cell.is_home_thread());
        cell.with(|_| ());
        assert!(cell.is_home_thread());
    }

    #[test]
    fn initialization_happens_exactly_once() {
        let built = Arc::new(AtomicUsize::new(0));
        let built_probe = Arc::clone(&built);
        let probe = Arc::new(Probe::default());
        let cell = EngineCell::new(Box::new(move || {
            built_probe.fetch_add(1, Ordering::SeqCst);
            Box::new(FakeEngine::new(Vec::new(), probe))
        }));
        cell.with(|_| ());
        cell.with(|_| ());
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn foreign_thread_access_panics() {
        let cell = Arc::new(cell());
        cell.with(|_| ());
        let foreign = Arc::clone(&cell);
        let outcome = std::thread::spawn(move || foreign.with(|_| ())).join();
        assert!(outcome.is_err(), "wrong-thread access should abort");
    }
}
