mod affinity;
mod bridge;
mod dispatch;
mod handles;
mod marshal;
mod session;
mod worker;

#[cfg(test)]
mod fake_engine;

pub use bridge::Bridge;
pub use handles::{Script, Translations};
pub use session::{PlaybackState, Session, SessionHandlers, SessionId, SessionLink};
pub use tb_core::{
    BridgeError, ChoiceOption, EngineRuntime, FieldValue, ImportResolver, SharedStr, TextTag,
};
