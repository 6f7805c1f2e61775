use std::collections::VecDeque;
use std::fs;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tb_bridge::{
    Bridge, ChoiceOption, EngineRuntime, ImportResolver, Session, SessionHandlers, SessionLink,
    SharedStr, TextTag, Translations,
};
use tb_story::StoryEngine;
use tracing::debug;

use crate::{PlayArgs, PrintArgs};

/// Serves `import` statements from the directory the root script lives in.
struct FileResolver {
    base: PathBuf,
}

impl ImportResolver for FileResolver {
    fn load(&self, path: &str) -> Option<String> {
        fs::read_to_string(self.base.join(path)).ok()
    }
}

enum PlayerEvent {
    Dialogue { speaker: SharedStr, text: String },
    Choice(Vec<ChoiceOption>),
    Finished,
}

/// Session handlers that park events for the terminal loop. The loop owns
/// all printing and prompting; handlers only enqueue.
#[derive(Default)]
struct EventQueue {
    events: Mutex<VecDeque<PlayerEvent>>,
}

impl EventQueue {
    fn pop(&self) -> Option<PlayerEvent> {
        self.events.lock().expect("event queue poisoned").pop_front()
    }

    fn push(&self, event: PlayerEvent) {
        self.events.lock().expect("event queue poisoned").push_back(event);
    }
}

impl SessionHandlers for EventQueue {
    fn on_dialogue(
        &self,
        _session: &SessionLink,
        speaker: SharedStr,
        text: SharedStr,
        _tags: Vec<TextTag>,
    ) {
        self.push(PlayerEvent::Dialogue {
            speaker,
            text: text.to_string(),
        });
    }

    fn on_choice(&self, _session: &SessionLink, options: Vec<ChoiceOption>) {
        self.push(PlayerEvent::Choice(options));
    }

    fn on_finish(&self, _session: &SessionLink) {
        self.push(PlayerEvent::Finished);
    }
}

fn script_dir(script: &Path) -> PathBuf {
    script
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .to_path_buf()
}

fn story_bridge(dedicated: bool) -> Result<Bridge> {
    let bridge = Bridge::new(|| Box::new(StoryEngine::new()) as Box<dyn EngineRuntime>);
    if dedicated {
        bridge.enable_dedicated_thread();
        bridge.init()?;
    }
    Ok(bridge)
}

fn load_translations(bridge: &Bridge, path: &Path) -> Result<Translations> {
    let source =
        fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let resolver = Arc::new(FileResolver {
        base: script_dir(path),
    });
    let localized = bridge.parse(&source, path.to_str(), Some(resolver))?;
    Ok(bridge.extract_translations(&localized)?)
}

pub fn run_play(args: PlayArgs) -> Result<()> {
    let source = fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read {}", args.script.display()))?;
    let bridge = story_bridge(args.dedicated_thread)?;
    let resolver = Arc::new(FileResolver {
        base: script_dir(&args.script),
    });
    let script = bridge.parse(&source, args.script.to_str(), Some(resolver))?;
    let translations = args
        .translations
        .as_deref()
        .map(|path| load_translations(&bridge, path))
        .transpose()?;

    let queue = Arc::new(EventQueue::default());
    let session = match &args.resume {
        Some(path) => {
            let snapshot = fs::read_to_string(path)
                .with_context(|| format!("cannot read {}", path.display()))?;
            bridge.resume(
                &script,
                Arc::clone(&queue) as Arc<dyn SessionHandlers>,
                &snapshot,
                args.beat.as_deref(),
                translations.as_ref(),
                None,
            )
        }
        None => bridge.play(
            &script,
            Arc::clone(&queue) as Arc<dyn SessionHandlers>,
            args.beat.as_deref(),
            translations.as_ref(),
            None,
        ),
    };

    println!("commands: enter advances, a number picks, :save FILE, :load FILE, :quit");
    let stdin = io::stdin();
    let mut input = stdin.lock();
    run_loop(&bridge, &session, &queue, &mut input)?;

    if args.dedicated_thread {
        bridge.dispose();
    }
    Ok(())
}

fn run_loop(
    bridge: &Bridge,
    session: &Session,
    queue: &EventQueue,
    input: &mut impl BufRead,
) -> Result<()> {
    loop {
        bridge.update(0.016);
        let Some(event) = queue.pop() else {
            thread::sleep(Duration::from_millis(8));
            continue;
        };
        let flow = match event {
            PlayerEvent::Dialogue { speaker, text } => {
                match speaker.as_str() {
                    Some(speaker) => println!("{}: {}", speaker, text),
                    None => println!("{}", text),
                }
                prompt_dialogue(session, input)?
            }
            PlayerEvent::Choice(options) => {
                for line in option_lines(&options) {
                    println!("{}", line);
                }
                prompt_choice(session, &options, input)?
            }
            PlayerEvent::Finished => {
                println!("(the story ends here)");
                Flow::Stop
            }
        };
        if flow == Flow::Stop {
            return Ok(());
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

fn option_lines(options: &[ChoiceOption]) -> Vec<String> {
    options
        .iter()
        .enumerate()
        .map(|(index, option)| {
            if option.enabled {
                format!("  {}. {}", index + 1, option.text)
            } else {
                format!("  {}. {} (unavailable)", index + 1, option.text)
            }
        })
        .collect()
}

fn prompt_dialogue(session: &Session, input: &mut impl BufRead) -> Result<Flow> {
    loop {
        let line = read_line(input, "> ")?;
        if line.is_empty() {
            session.advance();
            return Ok(Flow::Continue);
        }
        match run_meta(session, &line)? {
            Meta::Quit => return Ok(Flow::Stop),
            Meta::Loaded => return Ok(Flow::Continue),
            Meta::Handled => {}
            Meta::NotMeta => println!("press enter to continue, or :quit"),
        }
    }
}

fn prompt_choice(
    session: &Session,
    options: &[ChoiceOption],
    input: &mut impl BufRead,
) -> Result<Flow> {
    loop {
        let line = read_line(input, "? ")?;
        if let Some(index) = parse_choice(&line, options) {
            session.select(index);
            return Ok(Flow::Continue);
        }
        match run_meta(session, &line)? {
            Meta::Quit => return Ok(Flow::Stop),
            Meta::Loaded => return Ok(Flow::Continue),
            Meta::Handled => {}
            Meta::NotMeta => println!("pick an available option by number, or :quit"),
        }
    }
}

/// Map a typed line to a choice index. Only in-range, enabled options are
/// accepted; everything else re-prompts.
fn parse_choice(line: &str, options: &[ChoiceOption]) -> Option<usize> {
    let number: usize = line.trim().parse().ok()?;
    let index = number.checked_sub(1)?;
    options.get(index).filter(|option| option.enabled)?;
    Some(index)
}

enum Meta {
    Handled,
    Loaded,
    Quit,
    NotMeta,
}

fn run_meta(session: &Session, line: &str) -> Result<Meta> {
    if line == ":quit" {
        return Ok(Meta::Quit);
    }
    if let Some(path) = line.strip_prefix(":save ") {
        let snapshot = session.save()?;
        fs::write(path.trim(), snapshot.as_str().unwrap_or(""))
            .with_context(|| format!("cannot write {}", path.trim()))?;
        println!("saved to {}", path.trim());
        return Ok(Meta::Handled);
    }
    if let Some(path) = line.strip_prefix(":load ") {
        let snapshot = fs::read_to_string(path.trim())
            .with_context(|| format!("cannot read {}", path.trim()))?;
        debug!(path = path.trim(), "restoring snapshot");
        session.restore(&snapshot);
        return Ok(Meta::Loaded);
    }
    Ok(Meta::NotMeta)
}

fn read_line(input: &mut impl BufRead, prompt: &str) -> Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut line = String::new();
    if input.read_line(&mut line)? == 0 {
        // End of input behaves like :quit.
        return Ok(":quit".to_string());
    }
    Ok(line.trim().to_string())
}

pub fn run_print(args: PrintArgs) -> Result<()> {
    let source = fs::read_to_string(&args.script)
        .with_context(|| format!("cannot read {}", args.script.display()))?;
    let bridge = story_bridge(false)?;
    let resolver = Arc::new(FileResolver {
        base: script_dir(&args.script),
    });
    let script = bridge.parse(&source, args.script.to_str(), Some(resolver))?;
    print!("{}", bridge.print_script(&script)?);
    Ok(())
}
