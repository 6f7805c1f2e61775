use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::warn;

use tb_core::{BridgeError, EngineObj, EngineRuntime, ImportResolver, SharedStr};

use crate::affinity::{EngineCell, EngineFactory};
use crate::dispatch::DispatchQueue;
use crate::handles::{Script, Translations};
use crate::session::{self, Session, SessionHandlers, SessionId, SessionLink, SessionSlot};
use crate::worker::{stopped_error, Worker, WorkerClient};

/// Accumulated `update` delta after which a collection pass is scheduled.
const GC_INTERVAL: f64 = 15.0;

/// Shared bridge state: the affinity-guarded engine, the optional dedicated
/// worker, the dispatch-out buffer and the session table. All global mutable
/// state of the boundary lives here, behind one context handed around by
/// `Arc`.
pub(crate) struct BridgeCtx {
    engine: EngineCell,
    worker: Mutex<Option<Worker>>,
    worker_active: AtomicBool,
    /// Set once a dedicated worker has been stopped. The engine's home
    /// thread is gone for good at that point, so every later boundary call
    /// fails instead of reaching for it.
    retired: AtomicBool,
    dispatch: DispatchQueue,
    pub(crate) sessions: Mutex<HashMap<SessionId, SessionSlot>>,
    next_session_id: AtomicU64,
    pending_unpins: Mutex<Vec<EngineObj>>,
    gc_accum: Mutex<f64>,
}

impl BridgeCtx {
    fn new(factory: EngineFactory) -> Self {
        Self {
            engine: EngineCell::new(factory),
            worker: Mutex::new(None),
            worker_active: AtomicBool::new(false),
            retired: AtomicBool::new(false),
            dispatch: DispatchQueue::default(),
            sessions: Mutex::new(HashMap::new()),
            next_session_id: AtomicU64::new(1),
            pending_unpins: Mutex::new(Vec::new()),
            gc_accum: Mutex::new(0.0),
        }
    }

    fn worker_client(&self) -> Option<WorkerClient> {
        if !self.worker_active.load(Ordering::Acquire) {
            return None;
        }
        self.worker
            .lock()
            .expect("worker state poisoned")
            .as_ref()
            .map(Worker::client)
    }

    /// Run an engine-touching action on the home thread. Deferred handle
    /// releases are drained first, so unpins requested from foreign threads
    /// land before the next engine operation.
    pub(crate) fn engine_scope<R>(&self, action: impl FnOnce(&mut dyn EngineRuntime) -> R) -> R {
        self.engine.with(|engine| {
            let deferred = std::mem::take(
                &mut *self
                    .pending_unpins
                    .lock()
                    .expect("unpin queue poisoned"),
            );
            for obj in deferred {
                engine.unpin(obj);
            }
            action(engine)
        })
    }

    /// Fire-and-forget execution path: inline when no dedicated worker is
    /// active, queued to the worker otherwise.
    pub(crate) fn schedule(
        self: &Arc<Self>,
        action: impl FnOnce(&Arc<BridgeCtx>) + Send + 'static,
    ) {
        if self.retired.load(Ordering::Acquire) {
            return;
        }
        if let Some(client) = self.worker_client() {
            let ctx = Arc::clone(self);
            client.run(Box::new(move || action(&ctx)));
        } else {
            action(self);
        }
    }

    /// Blocking round-trip path: inline when no dedicated worker is active,
    /// otherwise queued with the caller parked until the action completes.
    pub(crate) fn schedule_sync<R: Send + 'static>(
        self: &Arc<Self>,
        action: impl FnOnce(&Arc<BridgeCtx>) -> R + Send + 'static,
    ) -> Result<R, BridgeError> {
        if self.retired.load(Ordering::Acquire) {
            return Err(stopped_error());
        }
        if let Some(client) = self.worker_client() {
            let ctx = Arc::clone(self);
            client.run_blocking(move || action(&ctx))
        } else {
            Ok(action(self))
        }
    }

    /// Deliver a host callback: buffered while a dedicated worker is active,
    /// invoked immediately otherwise.
    pub(crate) fn dispatch_out(&self, callback: Box<dyn FnOnce() + Send>) {
        if self.worker_active.load(Ordering::Acquire) {
            self.dispatch.add(callback);
        } else {
            callback();
        }
    }

    /// Drop a handle's pin. Release is the one boundary operation allowed
    /// from any thread; when it cannot reach the home thread directly the
    /// unpin is parked and drained by the next engine action.
    pub(crate) fn release_obj(self: &Arc<Self>, obj: EngineObj) {
        if self.retired.load(Ordering::Acquire) {
            // The engine died with its worker; its objects are already gone.
            return;
        }
        if self.worker_client().is_some() {
            self.schedule(move |ctx| ctx.engine_scope(|engine| engine.unpin(obj)));
        } else if self.engine.is_home_thread() {
            self.engine_scope(|engine| engine.unpin(obj));
        } else {
            self.pending_unpins
                .lock()
                .expect("unpin queue poisoned")
                .push(obj);
        }
    }

    pub(crate) fn allocate_session(
        &self,
        handlers: Arc<dyn SessionHandlers>,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> SessionId {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.sessions
            .lock()
            .expect("session table poisoned")
            .insert(id, SessionSlot::new(handlers, user_data));
        id
    }
}

/// The boundary context. Owns the embedded engine (built lazily on first use,
/// on whatever thread that turns out to be), the optional dedicated worker
/// thread, and every live handle's bookkeeping.
pub struct Bridge {
    ctx: Arc<BridgeCtx>,
}

impl Bridge {
    /// Build a bridge around an engine factory. The factory runs exactly
    /// once, on the thread that first executes an engine action; that thread
    /// becomes the engine's permanent home.
    pub fn new(factory: impl FnOnce() -> Box<dyn EngineRuntime> + Send + 'static) -> Self {
        Self {
            ctx: Arc::new(BridgeCtx::new(Box::new(factory))),
        }
    }

    /// Force engine initialization now, as a blocking round-trip.
    pub fn init(&self) -> Result<(), BridgeError> {
        self.ctx.schedule_sync(|ctx| ctx.engine_scope(|_| ()))
    }

    /// Route every subsequent boundary call through a dedicated worker
    /// thread. Call before the first engine use: the worker becomes the
    /// engine's home thread. No-op when already enabled.
    pub fn enable_dedicated_thread(&self) {
        let mut worker = self.ctx.worker.lock().expect("worker state poisoned");
        if worker.is_some() {
            return;
        }
        *worker = Some(Worker::spawn());
        self.ctx.worker_active.store(true, Ordering::Release);
    }

    /// Stop the dedicated worker, if any. Actions still queued are dropped;
    /// blocked round-trip callers are woken with `BRIDGE_WORKER_STOPPED`.
    pub fn dispose(&self) {
        self.ctx.worker_active.store(false, Ordering::Release);
        let worker = self.ctx.worker.lock().expect("worker state poisoned").take();
        if let Some(worker) = worker {
            self.ctx.retired.store(true, Ordering::Release);
            worker.stop();
        }
    }

    /// Schedule a manual collection pass.
    pub fn collect_garbage(&self) {
        self.ctx
            .schedule(|ctx| ctx.engine_scope(|engine| engine.collect()));
    }

    /// Per-frame pump. Flushes deferred handler invocations on the calling
    /// thread, and schedules a collection pass roughly every
    /// [`GC_INTERVAL`] accumulated time units.
    pub fn update(&self, delta: f64) {
        self.ctx.dispatch.flush();
        let due = {
            let mut accum = self.ctx.gc_accum.lock().expect("gc accumulator poisoned");
            *accum += delta;
            if *accum >= GC_INTERVAL {
                *accum = 0.0;
                true
            } else {
                false
            }
        };
        if due {
            self.collect_garbage();
        }
    }

    /// Compile a script. Imports are resolved through the host-supplied
    /// resolver; the engine never sees a filesystem. Failure returns an
    /// error and surfaces the diagnostic to the log, never a panic.
    pub fn parse(
        &self,
        source: &str,
        path: Option<&str>,
        resolver: Option<Arc<dyn ImportResolver>>,
    ) -> Result<Script, BridgeError> {
        let source = source.to_string();
        let path = path.map(str::to_string);
        let parsed = self.ctx.schedule_sync(move |ctx| {
            ctx.engine_scope(|engine| -> Result<EngineObj, BridgeError> {
                let obj = engine.parse(&source, path.as_deref(), resolver.as_deref())?;
                engine.pin(obj);
                Ok(obj)
            })
        })?;
        match parsed {
            Ok(obj) => Ok(Script::new(Arc::clone(&self.ctx), obj)),
            Err(error) => {
                warn!(code = %error.code, "parse failed: {}", error.message);
                Err(error)
            }
        }
    }

    /// Extract the localized-string table of a compiled script.
    pub fn extract_translations(&self, script: &Script) -> Result<Translations, BridgeError> {
        let script_obj = script.obj();
        let extracted = self.ctx.schedule_sync(move |ctx| {
            ctx.engine_scope(|engine| -> Result<EngineObj, BridgeError> {
                let obj = engine.extract_translations(script_obj)?;
                engine.pin(obj);
                Ok(obj)
            })
        })?;
        match extracted {
            Ok(obj) => Ok(Translations::new(Arc::clone(&self.ctx), obj)),
            Err(error) => {
                warn!(code = %error.code, "translation extraction failed: {}", error.message);
                Err(error)
            }
        }
    }

    /// Reprint a compiled script as source text.
    pub fn print_script(&self, script: &Script) -> Result<SharedStr, BridgeError> {
        let script_obj = script.obj();
        let printed = self
            .ctx
            .schedule_sync(move |ctx| ctx.engine_scope(|engine| engine.print_script(script_obj)))??;
        Ok(SharedStr::from(printed))
    }

    /// Begin a playback. The session handle is returned immediately; with a
    /// dedicated worker active the first event may fire after this call
    /// returns, and only reaches the handlers once the host pumps
    /// [`Bridge::update`].
    pub fn play(
        &self,
        script: &Script,
        handlers: Arc<dyn SessionHandlers>,
        beat: Option<&str>,
        translations: Option<&Translations>,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Session {
        self.spawn_session(script, handlers, beat, translations, user_data, None)
    }

    /// Reconstruct a playback from a snapshot produced by `save`, then resume
    /// it, re-raising the event the snapshot was taken at.
    pub fn resume(
        &self,
        script: &Script,
        handlers: Arc<dyn SessionHandlers>,
        snapshot: &str,
        beat: Option<&str>,
        translations: Option<&Translations>,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Session {
        self.spawn_session(
            script,
            handlers,
            beat,
            translations,
            user_data,
            Some(snapshot.to_string()),
        )
    }

    fn spawn_session(
        &self,
        script: &Script,
        handlers: Arc<dyn SessionHandlers>,
        beat: Option<&str>,
        translations: Option<&Translations>,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
        snapshot: Option<String>,
    ) -> Session {
        let id = self.ctx.allocate_session(handlers, user_data);
        let script_obj = script.obj();
        let translations_obj = translations.map(Translations::obj);
        let beat = beat.map(str::to_string);

        self.ctx.schedule(move |ctx| {
            let started = ctx.engine_scope(|engine| {
                let session_obj = engine.create_session(script_obj, translations_obj)?;
                engine.pin(session_obj);
                let event = match &snapshot {
                    Some(snapshot) => engine.restore(session_obj, snapshot),
                    None => engine.start(session_obj, beat.as_deref()),
                };
                match event {
                    Ok(event) => Ok((session_obj, event)),
                    Err(error) => {
                        engine.unpin(session_obj);
                        Err(error)
                    }
                }
            });
            match started {
                Ok((session_obj, event)) => {
                    let attached = {
                        let mut sessions = ctx.sessions.lock().expect("session table poisoned");
                        match sessions.get_mut(&id) {
                            Some(slot) => {
                                slot.obj = Some(session_obj);
                                true
                            }
                            None => false,
                        }
                    };
                    if !attached {
                        // Handle released before playback could attach.
                        ctx.engine_scope(|engine| engine.unpin(session_obj));
                        return;
                    }
                    session::deliver_event(ctx, id, event);
                }
                Err(error) => {
                    warn!(code = %error.code, "playback failed to start: {}", error.message);
                    session::fail_session(ctx, id);
                }
            }
        });

        Session::new(SessionLink {
            ctx: Arc::clone(&self.ctx),
            id,
        })
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.dispose();
    }
}
