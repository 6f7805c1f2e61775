use std::any::Any;
use std::ops::Deref;
use std::sync::Arc;

use tracing::warn;

use tb_core::{BridgeError, ChoiceOption, EngineObj, FieldValue, SharedStr, StepEvent, TextTag};

use crate::bridge::BridgeCtx;
use crate::marshal::{options_from_native, tags_from_native};

pub type SessionId = u64;

/// Where a playback currently stands, as seen by the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Created, first event not yet delivered.
    Created,
    /// Paused at a dialogue line; `advance` is the accepted next call.
    AwaitingAdvance,
    /// Paused at a choice; `select` is the accepted next call.
    AwaitingChoice,
    /// Ran to the end, or failed. No further events will be delivered.
    Finished,
    /// The handle was released.
    Released,
}

/// The acknowledgment the engine is waiting on. Stored boundary-side so that
/// stale or mismatched host calls can be ignored without touching the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PendingKind {
    Advance,
    Select { option_count: usize },
}

/// Host reactions to playback events. Each callback runs on the thread that
/// pumps [`Bridge::update`](crate::Bridge::update) when a dedicated worker is
/// active, or inline on the calling thread otherwise. Calling back into the
/// session from inside a handler is allowed.
pub trait SessionHandlers: Send + Sync {
    fn on_dialogue(
        &self,
        session: &SessionLink,
        speaker: SharedStr,
        text: SharedStr,
        tags: Vec<TextTag>,
    );

    fn on_choice(&self, session: &SessionLink, options: Vec<ChoiceOption>);

    fn on_finish(&self, session: &SessionLink);
}

pub(crate) struct SessionSlot {
    pub(crate) obj: Option<EngineObj>,
    pub(crate) state: PlaybackState,
    pub(crate) pending: Option<PendingKind>,
    /// Bumped on every delivered event. Acknowledgments carry the generation
    /// they were issued against; when `restore` or `start` replaces the
    /// pending pause, acknowledgments from before the replacement stop
    /// matching and are dropped instead of stepping the new pause.
    pub(crate) generation: u64,
    pub(crate) handlers: Arc<dyn SessionHandlers>,
    pub(crate) user_data: Option<Arc<dyn Any + Send + Sync>>,
}

impl SessionSlot {
    pub(crate) fn new(
        handlers: Arc<dyn SessionHandlers>,
        user_data: Option<Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        Self {
            obj: None,
            state: PlaybackState::Created,
            pending: None,
            generation: 0,
            handlers,
            user_data,
        }
    }
}

/// Record a step result against the session slot, then hand the matching
/// handler invocation to the dispatch-out path. The slot lock is released
/// before the handler can run, so handlers may call back into the session.
pub(crate) fn deliver_event(ctx: &Arc<BridgeCtx>, id: SessionId, event: StepEvent) {
    let handlers = {
        let mut sessions = ctx.sessions.lock().expect("session table poisoned");
        let Some(slot) = sessions.get_mut(&id) else {
            return;
        };
        slot.generation += 1;
        match &event {
            StepEvent::Dialogue { .. } => {
                slot.state = PlaybackState::AwaitingAdvance;
                slot.pending = Some(PendingKind::Advance);
            }
            StepEvent::Choice { options } => {
                slot.state = PlaybackState::AwaitingChoice;
                slot.pending = Some(PendingKind::Select {
                    option_count: options.len(),
                });
            }
            StepEvent::Finished => {
                slot.state = PlaybackState::Finished;
                slot.pending = None;
            }
        }
        Arc::clone(&slot.handlers)
    };

    let link = SessionLink {
        ctx: Arc::clone(ctx),
        id,
    };
    ctx.dispatch_out(Box::new(move || match event {
        StepEvent::Dialogue {
            speaker,
            text,
            tags,
        } => handlers.on_dialogue(
            &link,
            SharedStr::from_option(speaker),
            SharedStr::from(text),
            tags_from_native(tags),
        ),
        StepEvent::Choice { options } => handlers.on_choice(&link, options_from_native(options)),
        StepEvent::Finished => handlers.on_finish(&link),
    }));
}

/// Terminate a session after an engine fault. The fault itself has already
/// been logged; the host just sees the playback finish.
pub(crate) fn fail_session(ctx: &Arc<BridgeCtx>, id: SessionId) {
    deliver_event(ctx, id, StepEvent::Finished);
}

/// Take the pending acknowledgment if it matches `expected` and was issued
/// against the still-current event, and return the engine object to step.
/// Mismatches mean a stale or duplicated host call and are ignored.
fn take_pending(
    ctx: &BridgeCtx,
    id: SessionId,
    expected: PendingKind,
    generation: u64,
) -> Option<EngineObj> {
    let mut sessions = ctx.sessions.lock().expect("session table poisoned");
    let slot = sessions.get_mut(&id)?;
    if slot.generation != generation {
        return None;
    }
    let matches = match (slot.pending, expected) {
        (Some(PendingKind::Advance), PendingKind::Advance) => true,
        (Some(PendingKind::Select { .. }), PendingKind::Select { .. }) => true,
        _ => false,
    };
    if !matches {
        return None;
    }
    let obj = slot.obj?;
    slot.pending = None;
    Some(obj)
}

fn step_session(
    ctx: &Arc<BridgeCtx>,
    id: SessionId,
    expected: PendingKind,
    generation: u64,
    step: impl FnOnce(&mut dyn tb_core::EngineRuntime, EngineObj) -> Result<StepEvent, BridgeError>,
) {
    let Some(obj) = take_pending(ctx, id, expected, generation) else {
        return;
    };
    match ctx.engine_scope(|engine| step(engine, obj)) {
        Ok(event) => deliver_event(ctx, id, event),
        Err(error) => {
            warn!(code = %error.code, "playback step failed: {}", error.message);
            fail_session(ctx, id);
        }
    }
}

/// Cheap, cloneable reference to a live playback. Handlers receive one of
/// these; it carries no ownership, so it never extends the session's life.
#[derive(Clone)]
pub struct SessionLink {
    pub(crate) ctx: Arc<BridgeCtx>,
    pub(crate) id: SessionId,
}

impl SessionLink {
    /// Acknowledge the current dialogue pause. A no-op unless the session is
    /// awaiting exactly this call.
    pub fn advance(&self) {
        let generation = {
            let sessions = self.ctx.sessions.lock().expect("session table poisoned");
            match sessions.get(&self.id) {
                Some(slot) if slot.pending == Some(PendingKind::Advance) => slot.generation,
                _ => return,
            }
        };
        let id = self.id;
        self.ctx.schedule(move |ctx| {
            step_session(ctx, id, PendingKind::Advance, generation, |engine, obj| {
                engine.advance(obj)
            });
        });
    }

    /// Resolve the current choice pause with `index` into the full option
    /// list, disabled options included. A no-op unless the session is
    /// awaiting a choice.
    ///
    /// # Panics
    ///
    /// Panics when `index` is out of range for the presented options; that is
    /// a host programming error, not a recoverable condition.
    pub fn select(&self, index: usize) {
        let (option_count, generation) = {
            let sessions = self.ctx.sessions.lock().expect("session table poisoned");
            let Some(slot) = sessions.get(&self.id) else {
                return;
            };
            match slot.pending {
                Some(PendingKind::Select { option_count }) => (option_count, slot.generation),
                _ => return,
            }
        };
        // The guard is released before the assert; a contract panic must not
        // poison the session table.
        assert!(
            index < option_count,
            "choice index {index} out of range for {option_count} options"
        );
        let id = self.id;
        self.ctx.schedule(move |ctx| {
            step_session(
                ctx,
                id,
                PendingKind::Select { option_count: 0 },
                generation,
                |engine, obj| engine.select(obj, index),
            );
        });
    }

    /// Restart the playback from the top of `beat`, or of the script's
    /// entry beat. Fire-and-forget; the pause it stops at is delivered
    /// through the handlers, replacing whatever acknowledgment was pending.
    pub fn start(&self, beat: Option<&str>) {
        let id = self.id;
        let beat = beat.map(str::to_string);
        self.ctx.schedule(move |ctx| {
            let obj = {
                let sessions = ctx.sessions.lock().expect("session table poisoned");
                sessions.get(&id).and_then(|slot| slot.obj)
            };
            let Some(obj) = obj else {
                return;
            };
            match ctx.engine_scope(|engine| engine.start(obj, beat.as_deref())) {
                Ok(event) => deliver_event(ctx, id, event),
                Err(error) => {
                    warn!(code = %error.code, "restart failed: {}", error.message);
                    fail_session(ctx, id);
                }
            }
        });
    }

    /// Snapshot the playback as a blocking round-trip.
    pub fn save(&self) -> Result<SharedStr, BridgeError> {
        let id = self.id;
        let saved = self.ctx.schedule_sync(move |ctx| {
            let obj = session_obj(ctx, id)?;
            ctx.engine_scope(|engine| engine.save(obj))
        })??;
        Ok(SharedStr::from(saved))
    }

    /// Rewind the playback to a snapshot taken earlier. Fire-and-forget: the
    /// pause the snapshot was taken at is re-delivered through the handlers,
    /// replacing whatever acknowledgment was pending.
    pub fn restore(&self, snapshot: &str) {
        let id = self.id;
        let snapshot = snapshot.to_string();
        self.ctx.schedule(move |ctx| {
            let obj = {
                let sessions = ctx.sessions.lock().expect("session table poisoned");
                sessions.get(&id).and_then(|slot| slot.obj)
            };
            let Some(obj) = obj else {
                return;
            };
            match ctx.engine_scope(|engine| engine.restore(obj, &snapshot)) {
                Ok(event) => deliver_event(ctx, id, event),
                Err(error) => {
                    warn!(code = %error.code, "restore failed: {}", error.message);
                    fail_session(ctx, id);
                }
            }
        });
    }

    /// Read one character field as a blocking round-trip.
    pub fn get_field(&self, character: &str, field: &str) -> Result<FieldValue, BridgeError> {
        let id = self.id;
        let character = character.to_string();
        let field = field.to_string();
        self.ctx.schedule_sync(move |ctx| {
            let obj = session_obj(ctx, id)?;
            ctx.engine_scope(|engine| engine.get_field(obj, &character, &field))
        })?
    }

    /// Write one character field as a blocking round-trip.
    pub fn set_field(
        &self,
        character: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<(), BridgeError> {
        let id = self.id;
        let character = character.to_string();
        let field = field.to_string();
        self.ctx.schedule_sync(move |ctx| {
            let obj = session_obj(ctx, id)?;
            ctx.engine_scope(|engine| engine.set_field(obj, &character, &field, value))
        })?
    }

    /// Current playback state as last observed on the boundary.
    pub fn state(&self) -> PlaybackState {
        let sessions = self.ctx.sessions.lock().expect("session table poisoned");
        sessions
            .get(&self.id)
            .map(|slot| slot.state)
            .unwrap_or(PlaybackState::Released)
    }

    /// The host payload attached when the playback was started.
    pub fn user_data(&self) -> Option<Arc<dyn Any + Send + Sync>> {
        let sessions = self.ctx.sessions.lock().expect("session table poisoned");
        sessions.get(&self.id).and_then(|slot| slot.user_data.clone())
    }
}

fn session_obj(ctx: &BridgeCtx, id: SessionId) -> Result<EngineObj, BridgeError> {
    let sessions = ctx.sessions.lock().expect("session table poisoned");
    sessions
        .get(&id)
        .and_then(|slot| slot.obj)
        .ok_or_else(|| {
            BridgeError::new(
                "BRIDGE_SESSION_RELEASED",
                "Session handle was released or never attached.",
            )
        })
}

/// Owning handle to a playback. Dropping or releasing it detaches the
/// handlers and lets the engine reclaim the session.
pub struct Session {
    link: SessionLink,
}

impl Session {
    pub(crate) fn new(link: SessionLink) -> Self {
        Self { link }
    }

    pub fn link(&self) -> SessionLink {
        self.link.clone()
    }

    /// Detach and release now instead of at drop.
    pub fn release(self) {}
}

impl Deref for Session {
    type Target = SessionLink;

    fn deref(&self) -> &SessionLink {
        &self.link
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        let slot = self
            .link
            .ctx
            .sessions
            .lock()
            .expect("session table poisoned")
            .remove(&self.link.id);
        if let Some(slot) = slot {
            if let Some(obj) = slot.obj {
                self.link.ctx.release_obj(obj);
            }
        }
    }
}
