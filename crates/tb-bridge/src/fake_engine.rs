//! Scripted engine double for boundary tests. It honors the runtime contract
//! (pause cursor, snapshots, pins) without any real script semantics: every
//! parsed script plays the event template handed to the constructor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::Receiver;
use tb_core::{
    BridgeError, EngineObj, EngineRuntime, FieldValue, ImportResolver, StepEvent,
};

/// Shared observation point for assertions. Tests keep a clone and inspect it
/// after driving the bridge.
#[derive(Default)]
pub(crate) struct Probe {
    pub set_fields: Mutex<Vec<(String, String, FieldValue)>>,
    pub steps: Mutex<Vec<String>>,
    pub collects: AtomicUsize,
    pub pins: Mutex<HashMap<EngineObj, usize>>,
    /// When set, the next `restore` parks on this gate before running.
    /// Lets a test hold the worker mid-call while the host races it.
    pub restore_gate: Mutex<Option<Receiver<()>>>,
}

impl Probe {
    pub fn record_step(&self, name: &str) {
        self.steps
            .lock()
            .expect("probe steps poisoned")
            .push(name.to_string());
    }

    pub fn pin_count(&self, obj: EngineObj) -> usize {
        self.pins
            .lock()
            .expect("probe pins poisoned")
            .get(&obj)
            .copied()
            .unwrap_or(0)
    }

    pub fn collect_count(&self) -> usize {
        self.collects.load(Ordering::SeqCst)
    }
}

struct FakeSession {
    cursor: usize,
    fields: HashMap<(String, String), FieldValue>,
}

pub(crate) struct FakeEngine {
    template: Vec<StepEvent>,
    probe: Arc<Probe>,
    next_obj: EngineObj,
    scripts: HashMap<EngineObj, String>,
    sessions: HashMap<EngineObj, FakeSession>,
    live: HashMap<EngineObj, usize>,
}

impl FakeEngine {
    pub fn new(template: Vec<StepEvent>, probe: Arc<Probe>) -> Self {
        Self {
            template,
            probe,
            next_obj: 1,
            scripts: HashMap::new(),
            sessions: HashMap::new(),
            live: HashMap::new(),
        }
    }

    fn allocate(&mut self) -> EngineObj {
        let obj = self.next_obj;
        self.next_obj += 1;
        self.live.insert(obj, 0);
        obj
    }

    fn event_at(&self, cursor: usize) -> StepEvent {
        self.template
            .get(cursor)
            .cloned()
            .unwrap_or(StepEvent::Finished)
    }

    fn session_mut(&mut self, session: EngineObj) -> Result<&mut FakeSession, BridgeError> {
        self.sessions.get_mut(&session).ok_or_else(|| {
            BridgeError::new("ENGINE_BAD_SESSION", "Unknown session object.")
        })
    }
}

impl EngineRuntime for FakeEngine {
    fn parse(
        &mut self,
        source: &str,
        _path: Option<&str>,
        resolver: Option<&dyn ImportResolver>,
    ) -> Result<EngineObj, BridgeError> {
        if source.contains("!bad") {
            return Err(BridgeError::new("ENGINE_PARSE", "Malformed source."));
        }
        let mut expanded = String::new();
        for line in source.lines() {
            if let Some(path) = line.strip_prefix("import ") {
                let loaded = resolver.and_then(|resolver| resolver.load(path.trim()));
                match loaded {
                    Some(content) => expanded.push_str(&content),
                    None => {
                        return Err(BridgeError::new(
                            "ENGINE_IMPORT",
                            format!("Cannot resolve import '{}'.", path.trim()),
                        ));
                    }
                }
            } else {
                expanded.push_str(line);
            }
            expanded.push('\n');
        }
        let obj = self.allocate();
        self.scripts.insert(obj, expanded);
        Ok(obj)
    }

    fn extract_translations(&mut self, script: EngineObj) -> Result<EngineObj, BridgeError> {
        if !self.scripts.contains_key(&script) {
            return Err(BridgeError::new("ENGINE_BAD_SCRIPT", "Unknown script object."));
        }
        Ok(self.allocate())
    }

    fn print_script(&mut self, script: EngineObj) -> Result<String, BridgeError> {
        self.scripts
            .get(&script)
            .cloned()
            .ok_or_else(|| BridgeError::new("ENGINE_BAD_SCRIPT", "Unknown script object."))
    }

    fn create_session(
        &mut self,
        script: EngineObj,
        _translations: Option<EngineObj>,
    ) -> Result<EngineObj, BridgeError> {
        if !self.scripts.contains_key(&script) {
            return Err(BridgeError::new("ENGINE_BAD_SCRIPT", "Unknown script object."));
        }
        let obj = self.allocate();
        self.sessions.insert(
            obj,
            FakeSession {
                cursor: 0,
                fields: HashMap::new(),
            },
        );
        Ok(obj)
    }

    fn start(
        &mut self,
        session: EngineObj,
        beat: Option<&str>,
    ) -> Result<StepEvent, BridgeError> {
        self.probe.record_step("start");
        if beat == Some("missing") {
            return Err(BridgeError::new("ENGINE_BEAT_NOT_FOUND", "No such beat."));
        }
        self.session_mut(session)?.cursor = 0;
        Ok(self.event_at(0))
    }

    fn advance(&mut self, session: EngineObj) -> Result<StepEvent, BridgeError> {
        self.probe.record_step("advance");
        let slot = self.session_mut(session)?;
        slot.cursor += 1;
        let cursor = slot.cursor;
        Ok(self.event_at(cursor))
    }

    fn select(&mut self, session: EngineObj, index: usize) -> Result<StepEvent, BridgeError> {
        self.probe.record_step(&format!("select:{index}"));
        let slot = self.session_mut(session)?;
        slot.cursor += 1;
        let cursor = slot.cursor;
        Ok(self.event_at(cursor))
    }

    fn save(&mut self, session: EngineObj) -> Result<String, BridgeError> {
        let slot = self.session_mut(session)?;
        Ok(slot.cursor.to_string())
    }

    fn restore(&mut self, session: EngineObj, snapshot: &str) -> Result<StepEvent, BridgeError> {
        let gate = self
            .probe
            .restore_gate
            .lock()
            .expect("probe gate poisoned")
            .take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.probe.record_step("restore");
        let cursor: usize = snapshot
            .trim()
            .parse()
            .map_err(|_| BridgeError::new("ENGINE_BAD_SNAPSHOT", "Unreadable snapshot."))?;
        self.session_mut(session)?.cursor = cursor;
        Ok(self.event_at(cursor))
    }

    fn get_field(
        &mut self,
        session: EngineObj,
        character: &str,
        field: &str,
    ) -> Result<FieldValue, BridgeError> {
        let slot = self.session_mut(session)?;
        Ok(slot
            .fields
            .get(&(character.to_string(), field.to_string()))
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
        self.probe
            .set_fields
            .lock()
            .expect("probe set_fields poisoned")
            .push((character.to_string(), field.to_string(), value.clone()));
        let slot = self.session_mut(session)?;
        slot.fields
            .insert((character.to_string(), field.to_string()), value);
        Ok(())
    }

    fn pin(&mut self, obj: EngineObj) {
        if let Some(count) = self.live.get_mut(&obj) {
            *count += 1;
        }
        let mut pins = self.probe.pins.lock().expect("probe pins poisoned");
        *pins.entry(obj).or_insert(0) += 1;
    }

    fn unpin(&mut self, obj: EngineObj) {
        if let Some(count) = self.live.get_mut(&obj) {
            *count = count.saturating_sub(1);
        }
        let mut pins = self.probe.pins.lock().expect("probe pins poisoned");
        if let Some(count) = pins.get_mut(&obj) {
            *count = count.saturating_sub(1);
        }
    }

    fn collect(&mut self) {
        self.probe.collects.fetch_add(1, Ordering::SeqCst);
        let unpinned: Vec<EngineObj> = self
            .live
            .iter()
            .filter(|(_, pins)| **pins == 0)
            .map(|(obj, _)| *obj)
            .collect();
        for obj in unpinned {
            self.live.remove(&obj);
            self.scripts.remove(&obj);
            self.sessions.remove(&obj);
        }
    }
}
