use tb_core::{BridgeError, ImportResolver};

use crate::ast::{Beat, ChoiceArm, Node, Script};

const MAX_IMPORT_DEPTH: usize = 8;

/// Compile source text into a [`Script`]. `path` only decorates diagnostics;
/// imports are resolved through `resolver` and spliced in before any line is
/// interpreted, so an imported beat is indistinguishable from a local one.
pub fn parse_script(
    source: &str,
    path: Option<&str>,
    resolver: Option<&dyn ImportResolver>,
) -> Result<Script, BridgeError> {
    let expanded = expand_imports(source, resolver, 0)?;
    let script = parse_expanded(&expanded, path)?;
    check_targets(&script, path)?;
    Ok(script)
}

fn expand_imports(
    source: &str,
    resolver: Option<&dyn ImportResolver>,
    depth: usize,
) -> Result<String, BridgeError> {
    let mut expanded = String::with_capacity(source.len());
    for line in source.lines() {
        let Some(import) = line.trim().strip_prefix("import ") else {
            expanded.push_str(line);
            expanded.push('\n');
            continue;
        };
        let import = import.trim();
        if import.is_empty() {
            return Err(BridgeError::new(
                "ENGINE_IMPORT",
                "Import statement is missing a path.",
            ));
        }
        if depth >= MAX_IMPORT_DEPTH {
            return Err(BridgeError::new(
                "ENGINE_IMPORT",
                format!("Import \"{}\" exceeds the nesting limit.", import),
            ));
        }
        let content = resolver
            .and_then(|resolver| resolver.load(import))
            .ok_or_else(|| {
                BridgeError::new(
                    "ENGINE_IMPORT",
                    format!("Cannot resolve import \"{}\".", import),
                )
            })?;
        expanded.push_str(&expand_imports(&content, resolver, depth + 1)?);
    }
    Ok(expanded)
}

struct BeatBuilder {
    name: String,
    implicit: bool,
    nodes: Vec<Node>,
    pending_arms: Vec<ChoiceArm>,
}

impl BeatBuilder {
    fn new(name: String, implicit: bool) -> Self {
        Self {
            name,
            implicit,
            nodes: Vec::new(),
            pending_arms: Vec::new(),
        }
    }

    fn flush_arms(&mut self) {
        if !self.pending_arms.is_empty() {
            self.nodes.push(Node::Choice {
                arms: std::mem::take(&mut self.pending_arms),
            });
        }
    }

    fn finish(mut self, beats: &mut Vec<Beat>, path: Option<&str>) -> Result<(), BridgeError> {
        self.flush_arms();
        if self.implicit && self.nodes.is_empty() {
            return Ok(());
        }
        if beats.iter().any(|beat| beat.name == self.name) {
            return Err(parse_error(
                path,
                format!("Beat \"{}\" is declared twice.", self.name),
            ));
        }
        beats.push(Beat {
            name: self.name,
            nodes: self.nodes,
        });
        Ok(())
    }
}

fn parse_expanded(source: &str, path: Option<&str>) -> Result<Script, BridgeError> {
    let mut beats = Vec::new();
    // Content before the first `beat` header lands in an implicit `main`.
    let mut current = BeatBuilder::new("main".to_string(), true);

    for (index, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        let line_number = index + 1;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        if let Some(name) = line.strip_prefix("beat ") {
            let name = name.trim();
            if !is_identifier(name) {
                return Err(line_error(
                    path,
                    line_number,
                    format!("\"{}\" is not a valid beat name.", name),
                ));
            }
            let finished = std::mem::replace(&mut current, BeatBuilder::new(name.to_string(), false));
            finished.finish(&mut beats, path)?;
            continue;
        }

        if let Some(rest) = line.strip_prefix('*') {
            current.pending_arms.push(parse_arm(rest, path, line_number)?);
            continue;
        }

        current.flush_arms();

        if let Some(rest) = line.strip_prefix("set ") {
            current.nodes.push(parse_set(rest, path, line_number)?);
        } else if let Some(target) = line.strip_prefix("goto ") {
            let target = target.trim();
            if !is_identifier(target) {
                return Err(line_error(
                    path,
                    line_number,
                    format!("\"{}\" is not a valid goto target.", target),
                ));
            }
            current.nodes.push(Node::Goto {
                target: target.to_string(),
            });
        } else if let Some((speaker, text)) = line.split_once(':') {
            let speaker = speaker.trim();
            current.nodes.push(Node::Line {
                speaker: (!speaker.is_empty()).then(|| speaker.to_string()),
                text: text.trim().to_string(),
            });
        } else {
            return Err(line_error(
                path,
                line_number,
                format!("Unrecognized statement \"{}\".", line),
            ));
        }
    }

    current.finish(&mut beats, path)?;
    Ok(Script { beats })
}

/// `* text [when condition] [-> target]`. The keyword splits are taken from
/// the right, so option text may itself contain the word `when`.
fn parse_arm(rest: &str, path: Option<&str>, line_number: usize) -> Result<ChoiceArm, BridgeError> {
    let (rest, target) = match rest.rsplit_once(" -> ") {
        Some((rest, target)) => {
            let target = target.trim();
            if !is_identifier(target) {
                return Err(line_error(
                    path,
                    line_number,
                    format!("\"{}\" is not a valid choice target.", target),
                ));
            }
            (rest, Some(target.to_string()))
        }
        None => (rest, None),
    };
    let (text, when) = match rest.rsplit_once(" when ") {
        Some((text, when)) => (text, Some(when.trim().to_string())),
        None => (rest, None),
    };
    let text = text.trim();
    if text.is_empty() {
        return Err(line_error(path, line_number, "Choice text is empty."));
    }
    Ok(ChoiceArm {
        text: text.to_string(),
        when,
        target,
    })
}

fn parse_set(rest: &str, path: Option<&str>, line_number: usize) -> Result<Node, BridgeError> {
    let Some((place, expr)) = rest.split_once('=') else {
        return Err(line_error(
            path,
            line_number,
            "Set statement is missing \"=\".",
        ));
    };
    let Some((character, field)) = place.trim().split_once('.') else {
        return Err(line_error(
            path,
            line_number,
            "Set statement needs a character.field target.",
        ));
    };
    let (character, field, expr) = (character.trim(), field.trim(), expr.trim());
    if !is_identifier(character) || !is_identifier(field) {
        return Err(line_error(
            path,
            line_number,
            format!("\"{}.{}\" is not a valid field target.", character, field),
        ));
    }
    if expr.is_empty() {
        return Err(line_error(path, line_number, "Set expression is empty."));
    }
    Ok(Node::Set {
        character: character.to_string(),
        field: field.to_string(),
        expr: expr.to_string(),
    })
}

fn check_targets(script: &Script, path: Option<&str>) -> Result<(), BridgeError> {
    let check = |target: &str| -> Result<(), BridgeError> {
        if script.beat_index(target).is_none() {
            return Err(parse_error(
                path,
                format!("Jump target \"{}\" is not a declared beat.", target),
            ));
        }
        Ok(())
    };
    for beat in &script.beats {
        for node in &beat.nodes {
            match node {
                Node::Goto { target } => check(target)?,
                Node::Choice { arms } => {
                    for arm in arms {
                        if let Some(target) = &arm.target {
                            check(target)?;
                        }
                    }
                }
                _ => {}
            }
        }
    }
    Ok(())
}

fn is_identifier(text: &str) -> bool {
    let mut chars = text.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|ch| ch.is_ascii_alphanumeric() || ch == '_')
}

fn parse_error(path: Option<&str>, message: impl Into<String>) -> BridgeError {
    BridgeError::new(
        "ENGINE_PARSE",
        format!("{}: {}", path.unwrap_or("<source>"), message.into()),
    )
}

fn line_error(path: Option<&str>, line: usize, message: impl Into<String>) -> BridgeError {
    BridgeError::new(
        "ENGINE_PARSE",
        format!(
            "{} line {}: {}",
            path.unwrap_or("<source>"),
            line,
            message.into()
        ),
    )
}
