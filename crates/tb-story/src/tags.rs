use std::sync::OnceLock;

use regex::Regex;
use tb_core::NativeTag;

fn tag_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| Regex::new(r"</?([A-Za-z][A-Za-z0-9_-]*)>").expect("tag regex"))
}

/// Split inline markup of the form `<tag>`/`</tag>` out of `text`. The
/// returned string is the visible text with all markup removed; each tag's
/// offset is a byte index into that stripped string. Tags meeting at one
/// offset keep their source order.
pub(crate) fn strip_tags(text: &str) -> (String, Vec<NativeTag>) {
    let mut plain = String::new();
    let mut tags = Vec::new();
    let mut last_index = 0usize;
    for captures in tag_regex().captures_iter(text) {
        let full = captures
            .get(0)
            .expect("capture group 0 must exist for each regex capture");
        let name = captures
            .get(1)
            .expect("capture group 1 must exist for each regex capture");
        plain.push_str(&text[last_index..full.start()]);
        tags.push(NativeTag {
            value: name.as_str().to_string(),
            offset: plain.len(),
            closing: full.as_str().starts_with("</"),
        });
        last_index = full.end();
    }
    plain.push_str(&text[last_index..]);
    (plain, tags)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_passes_through() {
        let (plain, tags) = strip_tags("An unmarked line.");
        assert_eq!(plain, "An unmarked line.");
        assert!(tags.is_empty());
    }

    #[test]
    fn offsets_index_the_stripped_text() {
        let (plain, tags) = strip_tags("A <em>quiet</em> road");
        assert_eq!(plain, "A quiet road");
        assert_eq!(tags.len(), 2);
        assert_eq!((tags[0].value.as_str(), tags[0].offset, tags[0].closing), ("em", 2, false));
        assert_eq!((tags[1].value.as_str(), tags[1].offset, tags[1].closing), ("em", 7, true));
    }

    #[test]
    fn adjacent_tags_keep_source_order() {
        let (plain, tags) = strip_tags("<b><i>both</i></b>");
        assert_eq!(plain, "both");
        let order: Vec<(&str, usize, bool)> = tags
            .iter()
            .map(|tag| (tag.value.as_str(), tag.offset, tag.closing))
            .collect();
        assert_eq!(
            order,
            vec![("b", 0, false), ("i", 0, false), ("i", 4, true), ("b", 4, true)]
        );
    }

    #[test]
    fn unterminated_angles_are_left_alone() {
        let (plain, tags) = strip_tags("a < b and b > a");
        assert_eq!(plain, "a < b and b > a");
        assert!(tags.is_empty());
    }

    #[test]
    fn multibyte_text_keeps_byte_offsets() {
        let (plain, tags) = strip_tags("héllo <em>wörld</em>");
        assert_eq!(plain, "héllo wörld");
        assert_eq!(tags[0].offset, "héllo ".len());
        assert_eq!(tags[1].offset, "héllo wörld".len());
    }
}
