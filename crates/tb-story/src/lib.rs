//! Line-oriented narrative script engine. Scripts are a sequence of beats;
//! each beat interleaves dialogue lines, branching choices, character field
//! assignments and jumps. The engine is deliberately thread-naive: it is
//! always driven from a single thread through [`tb_core::EngineRuntime`].

pub mod ast;
pub mod engine;
mod expr;
pub mod parser;
mod snapshot;
mod tags;

pub use engine::StoryEngine;
