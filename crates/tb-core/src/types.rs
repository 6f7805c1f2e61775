use crate::strings::SharedStr;

/// Decoration applied to a range of dialogue or option text. `offset` is a
/// byte index into the owning text at which the tag applies. Several tags may
/// share one offset; their relative order is the order the engine emitted
/// them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextTag {
    pub value: SharedStr,
    pub offset: usize,
    pub closing: bool,
}

/// One entry of a branching choice. The sequence order handed to the host is
/// the presentation order, and choice indices always address that full order,
/// disabled entries included.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChoiceOption {
    pub text: SharedStr,
    pub tags: Vec<TextTag>,
    pub enabled: bool,
}
