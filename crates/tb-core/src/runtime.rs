use crate::error::BridgeError;
use crate::value::FieldValue;

/// Opaque token naming one engine-owned object (script, session or
/// translation table). Tokens are only meaningful to the engine that issued
/// them.
pub type EngineObj = u64;

/// Tag payload as the engine emits it, before boundary marshaling.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeTag {
    pub value: String,
    pub offset: usize,
    pub closing: bool,
}

/// Choice option payload as the engine emits it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeOption {
    pub text: String,
    pub tags: Vec<NativeTag>,
    pub enabled: bool,
}

/// Where a playback stopped and why. Each stepping call runs the script until
/// it either needs an acknowledgment (`Dialogue`), a decision (`Choice`), or
/// has nothing left to run (`Finished`).
#[derive(Debug, Clone, PartialEq)]
pub enum StepEvent {
    Dialogue {
        speaker: Option<String>,
        text: String,
        tags: Vec<NativeTag>,
    },
    Choice {
        options: Vec<NativeOption>,
    },
    Finished,
}

/// Host-supplied import resolution. The engine asks for a path and the host
/// answers with the file content, or `None` when the path cannot be provided.
/// The engine never touches a filesystem itself.
pub trait ImportResolver: Send + Sync {
    fn load(&self, path: &str) -> Option<String>;
}

/// Capability interface of the embedded narrative engine. The bridge is the
/// only caller, and it guarantees that every method runs on the engine's home
/// thread. Objects handed out as [`EngineObj`] stay alive while pinned;
/// `collect` may reclaim anything unpinned.
pub trait EngineRuntime {
    fn parse(
        &mut self,
        source: &str,
        path: Option<&str>,
        resolver: Option<&dyn ImportResolver>,
    ) -> Result<EngineObj, BridgeError>;

    fn extract_translations(&mut self, script: EngineObj) -> Result<EngineObj, BridgeError>;

    fn print_script(&mut self, script: EngineObj) -> Result<String, BridgeError>;

    fn create_session(
        &mut self,
        script: EngineObj,
        translations: Option<EngineObj>,
    ) -> Result<EngineObj, BridgeError>;

    /// Begin or restart playback at `beat` (or the default entry point) and
    /// run to the first pause.
    fn start(&mut self, session: EngineObj, beat: Option<&str>)
        -> Result<StepEvent, BridgeError>;

    /// Acknowledge a dialogue pause and run to the next one.
    fn advance(&mut self, session: EngineObj) -> Result<StepEvent, BridgeError>;

    /// Resolve a choice pause with the given full-list index and run on.
    fn select(&mut self, session: EngineObj, index: usize) -> Result<StepEvent, BridgeError>;

    fn save(&mut self, session: EngineObj) -> Result<String, BridgeError>;

    /// Load a snapshot and resume, re-raising the pause the snapshot was
    /// taken at.
    fn restore(&mut self, session: EngineObj, snapshot: &str) -> Result<StepEvent, BridgeError>;

    fn get_field(
        &mut self,
        session: EngineObj,
        character: &str,
        field: &str,
    ) -> Result<FieldValue, BridgeError>;

    fn set_field(
        &mut self,
        session: EngineObj,
        character: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<(), BridgeError>;

    /// Register an external strong reference to `obj`.
    fn pin(&mut self, obj: EngineObj);

    /// Drop one external strong reference to `obj`.
    fn unpin(&mut self, obj: EngineObj);

    /// Reclaim unpinned objects.
    fn collect(&mut self);
}
