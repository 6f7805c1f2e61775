use tb_core::{ChoiceOption, NativeOption, NativeTag, SharedStr, TextTag};

/// Convert engine-native tags into boundary tags. An empty input yields an
/// empty sequence, never an error; emission order is preserved, including
/// among tags sharing one offset.
pub(crate) fn tags_from_native(tags: Vec<NativeTag>) -> Vec<TextTag> {
    tags.into_iter()
        .map(|tag| TextTag {
            value: SharedStr::from(tag.value),
            offset: tag.offset,
            closing: tag.closing,
        })
        .collect()
}

/// Convert engine-native choice options, marshaling each option's tag
/// sequence in turn. Presentation order is preserved.
pub(crate) fn options_from_native(options: Vec<NativeOption>) -> Vec<ChoiceOption> {
    options
        .into_iter()
        .map(|option| ChoiceOption {
            text: SharedStr::from(option.text),
            tags: tags_from_native(option.tags),
            enabled: option.enabled,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(value: &str, offset: usize, closing: bool) -> NativeTag {
        NativeTag {
            value: value.to_string(),
            offset,
            closing,
        }
    }

    #[test]
    fn empty_input_builds_empty_sequences() {
        assert!(tags_from_native(Vec::new()).is_empty());
        assert!(options_from_native(Vec::new()).is_empty());
    }

    #[test]
    fn same_offset_tags_keep_emission_order() {
        let tags = tags_from_native(vec![
            tag("b", 4, false),
            tag("i", 4, false),
            tag("i", 9, true),
            tag("b", 9, true),
        ]);
        let order = tags
            .iter()
            .map(|tag| (tag.value.as_str().unwrap_or(""), tag.offset, tag.closing))
            .collect::<Vec<_>>();
        assert_eq!(
            order,
            vec![("b", 4, false), ("i", 4, false), ("i", 9, true), ("b", 9, true)]
        );
    }

    #[test]
    fn options_marshal_nested_tags_and_enabled_flags() {
        let options = options_from_native(vec![
            NativeOption {
                text: "Stay".to_string(),
                tags: vec![tag("calm", 0, false), tag("calm", 4, true)],
                enabled: true,
            },
            NativeOption {
                text: "Flee".to_string(),
                tags: Vec::new(),
                enabled: false,
            },
        ]);
        assert_eq!(options.len(), 2);
        assert_eq!(options[0].text, SharedStr::new("Stay"));
        assert_eq!(options[0].tags.len(), 2);
        assert!(options[0].enabled);
        assert!(options[1].tags.is_empty());
        assert!(!options[1].enabled);
    }
}
