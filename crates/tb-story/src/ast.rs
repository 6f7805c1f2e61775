use std::fmt::Write as _;

/// A compiled script: an ordered list of named beats. Playback enters at the
/// beat named `main` when it exists, otherwise at the first beat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Script {
    pub beats: Vec<Beat>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Beat {
    pub name: String,
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    /// A dialogue pause. `speaker` is `None` for narrator lines.
    Line {
        speaker: Option<String>,
        text: String,
    },
    /// A choice pause over the full arm list, conditions included.
    Choice { arms: Vec<ChoiceArm> },
    /// `set character.field = expr`, executed without pausing.
    Set {
        character: String,
        field: String,
        expr: String,
    },
    /// Unconditional jump to another beat.
    Goto { target: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceArm {
    pub text: String,
    /// Condition deciding whether the arm is selectable. Conditioned-out arms
    /// are still presented, disabled.
    pub when: Option<String>,
    /// Beat to jump to on selection; `None` falls through past the choice.
    pub target: Option<String>,
}

impl Script {
    pub fn beat_index(&self, name: &str) -> Option<usize> {
        self.beats.iter().position(|beat| beat.name == name)
    }

    pub fn entry_index(&self) -> Option<usize> {
        self.beat_index("main").or(if self.beats.is_empty() {
            None
        } else {
            Some(0)
        })
    }

    /// Regenerate canonical source text. The output parses back to an equal
    /// script; comments and incidental whitespace of the original are gone.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for beat in &self.beats {
            let _ = writeln!(out, "beat {}", beat.name);
            for node in &beat.nodes {
                match node {
                    Node::Line { speaker, text } => match speaker {
                        Some(speaker) => {
                            let _ = writeln!(out, "  {}: {}", speaker, text);
                        }
                        None => {
                            let _ = writeln!(out, "  : {}", text);
                        }
                    },
                    Node::Choice { arms } => {
                        for arm in arms {
                            let mut line = format!("  * {}", arm.text);
                            if let Some(when) = &arm.when {
                                let _ = write!(line, " when {}", when);
                            }
                            if let Some(target) = &arm.target {
                                let _ = write!(line, " -> {}", target);
                            }
                            out.push_str(&line);
                            out.push('\n');
                        }
                    }
                    Node::Set {
                        character,
                        field,
                        expr,
                    } => {
                        let _ = writeln!(out, "  set {}.{} = {}", character, field, expr);
                    }
                    Node::Goto { target } => {
                        let _ = writeln!(out, "  goto {}", target);
                    }
                }
            }
        }
        out
    }
}
