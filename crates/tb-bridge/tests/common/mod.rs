#![allow(dead_code)]

use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant};

use tb_bridge::{
    Bridge, ChoiceOption, EngineRuntime, SessionHandlers, SessionLink, SharedStr, TextTag,
};
use tb_story::StoryEngine;

pub fn story_bridge() -> Bridge {
    Bridge::new(|| Box::new(StoryEngine::new()) as Box<dyn EngineRuntime>)
}

#[derive(Debug, Clone, PartialEq)]
pub enum Seen {
    Dialogue {
        speaker: Option<String>,
        text: String,
    },
    Choice(Vec<(String, bool)>),
    Finished,
}

#[derive(Default)]
pub struct Recorder {
    events: Mutex<Vec<Seen>>,
    pub threads: Mutex<Vec<thread::ThreadId>>,
}

impl Recorder {
    pub fn events(&self) -> Vec<Seen> {
        self.events.lock().expect("events poisoned").clone()
    }

    fn record(&self, event: Seen) {
        self.events.lock().expect("events poisoned").push(event);
        self.threads
            .lock()
            .expect("threads poisoned")
            .push(thread::current().id());
    }
}

impl SessionHandlers for Recorder {
    fn on_dialogue(
        &self,
        _session: &SessionLink,
        speaker: SharedStr,
        text: SharedStr,
        _tags: Vec<TextTag>,
    ) {
        self.record(Seen::Dialogue {
            speaker: speaker.as_str().map(str::to_string),
            text: text.to_string(),
        });
    }

    fn on_choice(&self, _session: &SessionLink, options: Vec<ChoiceOption>) {
        self.record(Seen::Choice(
            options
                .iter()
                .map(|option| (option.text.to_string(), option.enabled))
                .collect(),
        ));
    }

    fn on_finish(&self, _session: &SessionLink) {
        self.record(Seen::Finished);
    }
}

pub fn dialogue(speaker: Option<&str>, text: &str) -> Seen {
    Seen::Dialogue {
        speaker: speaker.map(str::to_string),
        text: text.to_string(),
    }
}

pub fn pump_until(bridge: &Bridge, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !done() {
        assert!(Instant::now() < deadline, "timed out pumping the bridge");
        bridge.update(0.016);
        thread::yield_now();
    }
}
