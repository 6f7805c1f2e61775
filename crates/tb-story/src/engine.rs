use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tb_core::{
    BridgeError, EngineObj, EngineRuntime, FieldValue, ImportResolver, NativeOption, StepEvent,
};

use crate::ast::{Node, Script};
use crate::expr::{self, CharacterFields};
use crate::parser;
use crate::snapshot::StorySnapshot;
use crate::tags::strip_tags;

/// Statements executed between two pauses before the engine assumes a loop
/// with no exit.
const STEP_LIMIT: usize = 10_000;

type TranslationMap = BTreeMap<String, String>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cursor {
    beat: usize,
    node: usize,
}

/// One playback over a compiled script. `cursor` always points at a pause
/// node (`Line` or `Choice`) or is `None` once the playback ran off the end.
struct PlaySession {
    script: Arc<Script>,
    translations: Option<Arc<TranslationMap>>,
    cursor: Option<Cursor>,
    fields: CharacterFields,
}

fn line_key(beat: &str, node: usize) -> String {
    format!("{}/{}", beat, node)
}

fn arm_key(beat: &str, node: usize, arm: usize) -> String {
    format!("{}/{}/{}", beat, node, arm)
}

impl PlaySession {
    fn translated<'a>(&'a self, key: &str, fallback: &'a str) -> &'a str {
        self.translations
            .as_ref()
            .and_then(|map| map.get(key))
            .map_or(fallback, String::as_str)
    }

    fn start(&mut self, beat: Option<&str>) -> Result<StepEvent, BridgeError> {
        let index = match beat {
            Some(name) => self.script.beat_index(name).ok_or_else(|| {
                BridgeError::new(
                    "ENGINE_BEAT_NOT_FOUND",
                    format!("Beat \"{}\" does not exist.", name),
                )
            })?,
            None => match self.script.entry_index() {
                Some(index) => index,
                None => {
                    self.cursor = None;
                    return Ok(StepEvent::Finished);
                }
            },
        };
        self.cursor = Some(Cursor {
            beat: index,
            node: 0,
        });
        self.run_to_pause()
    }

    fn advance(&mut self) -> Result<StepEvent, BridgeError> {
        let cursor = self.pause_cursor()?;
        let beat = &self.script.beats[cursor.beat];
        if !matches!(beat.nodes[cursor.node], Node::Line { .. }) {
            return Err(BridgeError::new(
                "ENGINE_STATE",
                "No dialogue is awaiting acknowledgment.",
            ));
        }
        self.cursor = Some(Cursor {
            beat: cursor.beat,
            node: cursor.node + 1,
        });
        self.run_to_pause()
    }

    fn select(&mut self, index: usize) -> Result<StepEvent, BridgeError> {
        let cursor = self.pause_cursor()?;
        let script = Arc::clone(&self.script);
        let beat = &script.beats[cursor.beat];
        let Node::Choice { arms } = &beat.nodes[cursor.node] else {
            return Err(BridgeError::new(
                "ENGINE_STATE",
                "No choice is awaiting a decision.",
            ));
        };
        let arm = arms.get(index).ok_or_else(|| {
            BridgeError::new(
                "ENGINE_CHOICE_INDEX",
                format!("Choice index {} is out of range.", index),
            )
        })?;
        if let Some(when) = &arm.when {
            if !expr::eval_condition(when, &self.fields)? {
                return Err(BridgeError::new(
                    "ENGINE_OPTION_DISABLED",
                    format!("Choice {} is disabled by its condition.", index),
                ));
            }
        }
        self.cursor = match &arm.target {
            Some(target) => Some(Cursor {
                beat: self.resolve_beat(target)?,
                node: 0,
            }),
            None => Some(Cursor {
                beat: cursor.beat,
                node: cursor.node + 1,
            }),
        };
        self.run_to_pause()
    }

    fn save(&self) -> Result<String, BridgeError> {
        let cursor = self.pause_cursor()?;
        let beat = &self.script.beats[cursor.beat];
        StorySnapshot::capture(&beat.name, cursor.node, &self.fields).to_json()
    }

    fn restore(&mut self, snapshot: &str) -> Result<StepEvent, BridgeError> {
        let snapshot = StorySnapshot::from_json(snapshot)?;
        let beat_index = self.script.beat_index(&snapshot.beat).ok_or_else(|| {
            BridgeError::new(
                "ENGINE_BAD_SNAPSHOT",
                format!("Snapshot beat \"{}\" does not exist.", snapshot.beat),
            )
        })?;
        let beat = &self.script.beats[beat_index];
        let at_pause = beat
            .nodes
            .get(snapshot.node)
            .is_some_and(|node| matches!(node, Node::Line { .. } | Node::Choice { .. }));
        if !at_pause {
            return Err(BridgeError::new(
                "ENGINE_BAD_SNAPSHOT",
                "Snapshot position is not a pause in this script.",
            ));
        }
        self.fields = snapshot.restore_fields();
        self.cursor = Some(Cursor {
            beat: beat_index,
            node: snapshot.node,
        });
        self.emit()
    }

    /// Execute statements until the cursor lands on a pause, then emit it.
    fn run_to_pause(&mut self) -> Result<StepEvent, BridgeError> {
        for _ in 0..STEP_LIMIT {
            let Some(cursor) = self.cursor else {
                return Ok(StepEvent::Finished);
            };
            let script = Arc::clone(&self.script);
            let beat = &script.beats[cursor.beat];
            let Some(node) = beat.nodes.get(cursor.node) else {
                self.cursor = None;
                return Ok(StepEvent::Finished);
            };
            match node {
                Node::Line { .. } | Node::Choice { .. } => return self.emit(),
                Node::Set {
                    character,
                    field,
                    expr,
                } => {
                    let value = expr::eval(expr, &self.fields)?;
                    self.fields
                        .entry(character.clone())
                        .or_default()
                        .insert(field.clone(), value);
                    self.cursor = Some(Cursor {
                        beat: cursor.beat,
                        node: cursor.node + 1,
                    });
                }
                Node::Goto { target } => {
                    self.cursor = Some(Cursor {
                        beat: self.resolve_beat(target)?,
                        node: 0,
                    });
                }
            }
        }
        Err(BridgeError::new(
            "ENGINE_STEP_LIMIT",
            format!(
                "Playback executed {} statements without pausing; assuming a loop with no exit.",
                STEP_LIMIT
            ),
        ))
    }

    /// Build the event for the pause the cursor is parked at. Does not move
    /// the cursor, so a restore can re-raise the same event.
    fn emit(&self) -> Result<StepEvent, BridgeError> {
        let cursor = self.pause_cursor()?;
        let beat = &self.script.beats[cursor.beat];
        match &beat.nodes[cursor.node] {
            Node::Line { speaker, text } => {
                let text = self.translated(&line_key(&beat.name, cursor.node), text);
                let (text, tags) = strip_tags(text);
                Ok(StepEvent::Dialogue {
                    speaker: speaker.clone(),
                    text,
                    tags,
                })
            }
            Node::Choice { arms } => {
                let mut options = Vec::with_capacity(arms.len());
                for (index, arm) in arms.iter().enumerate() {
                    let enabled = match &arm.when {
                        Some(when) => expr::eval_condition(when, &self.fields)?,
                        None => true,
                    };
                    let text =
                        self.translated(&arm_key(&beat.name, cursor.node, index), &arm.text);
                    let (text, tags) = strip_tags(text);
                    options.push(NativeOption {
                        text,
                        tags,
                        enabled,
                    });
                }
                Ok(StepEvent::Choice { options })
            }
            _ => Err(BridgeError::new(
                "ENGINE_STATE",
                "Playback cursor is not at a pause.",
            )),
        }
    }

    fn pause_cursor(&self) -> Result<Cursor, BridgeError> {
        self.cursor.ok_or_else(|| {
            BridgeError::new("ENGINE_STATE", "Playback already ran to completion.")
        })
    }

    fn resolve_beat(&self, target: &str) -> Result<usize, BridgeError> {
        self.script.beat_index(target).ok_or_else(|| {
            BridgeError::new(
                "ENGINE_BEAT_NOT_FOUND",
                format!("Beat \"{}\" does not exist.", target),
            )
        })
    }
}

enum Object {
    Script(Arc<Script>),
    Translations(Arc<TranslationMap>),
    Session(PlaySession),
}

struct Stored {
    object: Object,
    pins: usize,
}

/// Object-table front of the engine. Scripts, translation tables and
/// sessions live here under opaque tokens; anything unpinned is fair game
/// for `collect`.
#[derive(Default)]
pub struct StoryEngine {
    objects: HashMap<EngineObj, Stored>,
    next_obj: EngineObj,
}

impl StoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn insert(&mut self, object: Object) -> EngineObj {
        self.next_obj += 1;
        self.objects.insert(
            self.next_obj,
            Stored { object, pins: 0 },
        );
        self.next_obj
    }

    fn script(&self, obj: EngineObj) -> Result<&Arc<Script>, BridgeError> {
        match self.objects.get(&obj).map(|stored| &stored.object) {
            Some(Object::Script(script)) => Ok(script),
            _ => Err(BridgeError::new(
                "ENGINE_BAD_SCRIPT",
                "Object is not a live script.",
            )),
        }
    }

    fn translation_map(&self, obj: EngineObj) -> Result<&Arc<TranslationMap>, BridgeError> {
        match self.objects.get(&obj).map(|stored| &stored.object) {
            Some(Object::Translations(map)) => Ok(map),
            _ => Err(BridgeError::new(
                "ENGINE_BAD_TRANSLATIONS",
                "Object is not a live translation table.",
            )),
        }
    }

    fn session_mut(&mut self, obj: EngineObj) -> Result<&mut PlaySession, BridgeError> {
        match self.objects.get_mut(&obj).map(|stored| &mut stored.object) {
            Some(Object::Session(session)) => Ok(session),
            _ => Err(BridgeError::new(
                "ENGINE_BAD_SESSION",
                "Object is not a live session.",
            )),
        }
    }
}

impl EngineRuntime for StoryEngine {
    fn parse(
        &mut self,
        source: &str,
        path: Option<&str>,
        resolver: Option<&dyn ImportResolver>,
    ) -> Result<EngineObj, BridgeError> {
        let script = parser::parse_script(source, path, resolver)?;
        Ok(self.insert(Object::Script(Arc::new(script))))
    }

    fn extract_translations(&mut self, script: EngineObj) -> Result<EngineObj, BridgeError> {
        let script = Arc::clone(self.script(script)?);
        let mut map = TranslationMap::new();
        for beat in &script.beats {
            for (node_index, node) in beat.nodes.iter().enumerate() {
                match node {
                    Node::Line { text, .. } => {
                        map.insert(line_key(&beat.name, node_index), text.clone());
                    }
                    Node::Choice { arms } => {
                        for (arm_index, arm) in arms.iter().enumerate() {
                            map.insert(
                                arm_key(&beat.name, node_index, arm_index),
                                arm.text.clone(),
                            );
                        }
                    }
                    _ => {}
                }
            }
        }
        Ok(self.insert(Object::Translations(Arc::new(map))))
    }

    fn print_script(&mut self, script: EngineObj) -> Result<String, BridgeError> {
        Ok(self.script(script)?.render())
    }

    fn create_session(
        &mut self,
        script: EngineObj,
        translations: Option<EngineObj>,
    ) -> Result<EngineObj, BridgeError> {
        let script = Arc::clone(self.script(script)?);
        let translations = translations
            .map(|obj| self.translation_map(obj).map(Arc::clone))
            .transpose()?;
        Ok(self.insert(Object::Session(PlaySession {
            script,
            translations,
            cursor: None,
            fields: CharacterFields::new(),
        })))
    }

    fn start(
        &mut self,
        session: EngineObj,
        beat: Option<&str>,
    ) -> Result<StepEvent, BridgeError> {
        self.session_mut(session)?.start(beat)
    }

    fn advance(&mut self, session: EngineObj) -> Result<StepEvent, BridgeError> {
        self.session_mut(session)?.advance()
    }

    fn select(&mut self, session: EngineObj, index: usize) -> Result<StepEvent, BridgeError> {
        self.session_mut(session)?.select(index)
    }

    fn save(&mut self, session: EngineObj) -> Result<String, BridgeError> {
        self.session_mut(session)?.save()
    }

    fn restore(&mut self, session: EngineObj, snapshot: &str) -> Result<StepEvent, BridgeError> {
        self.session_mut(session)?.restore(snapshot)
    }

    fn get_field(
        &mut self,
        session: EngineObj,
        character: &str,
        field: &str,
    ) -> Result<FieldValue, BridgeError> {
        Ok(self
            .session_mut(session)?
            .fields
            .get(character)
            .and_then(|fields| fields.get(field))
            .cloned()
            .unwrap_or(FieldValue::Null))
    }

    fn set_field(
        &mut self,
        session: EngineObj,
        character: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<(), BridgeError> {
        self.session_mut(session)?
            .fields
            .entry(character.to_string())
            .or_default()
            .insert(field.to_string(), value);
        Ok(())
    }

    fn pin(&mut self, obj: EngineObj) {
        if let Some(stored) = self.objects.get_mut(&obj) {
            stored.pins += 1;
        }
    }

    fn unpin(&mut self, obj: EngineObj) {
        if let Some(stored) = self.objects.get_mut(&obj) {
            stored.pins = stored.pins.saturating_sub(1);
        }
    }

    fn collect(&mut self) {
        self.objects.retain(|_, stored| stored.pins > 0);
    }
}
