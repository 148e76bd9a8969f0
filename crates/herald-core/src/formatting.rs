//! Text helpers for Telegram HTML messages.

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Cuts prefer a newline, then a space, inside the window, and never land in
/// the middle of an HTML entity such as `&amp;`.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut parts = Vec::new();
    let mut rest = text;

    while rest.chars().count() > max_chars {
        let window_end = rest
            .char_indices()
            .nth(max_chars)
            .map(|(i, _)| i)
            .unwrap_or(rest.len());
        let window = &rest[..window_end];

        let mut cut = window
            .rfind('\n')
            .or_else(|| window.rfind(' '))
            .filter(|&i| i > 0)
            .unwrap_or(window_end);
        cut = avoid_entity_split(rest, cut);

        let (head, tail) = rest.split_at(cut);
        parts.push(head.to_string());
        rest = tail.strip_prefix('\n').unwrap_or(tail);
    }

    if !rest.is_empty() {
        parts.push(rest.to_string());
    }
    parts
}

/// Move `cut` back to the start of an entity it would split.
fn avoid_entity_split(text: &str, cut: usize) -> usize {
    const MAX_ENTITY: usize = 8;
    let head = &text[..cut];
    let Some(amp) = head.rfind('&') else {
        return cut;
    };
    if amp == 0 || cut - amp > MAX_ENTITY || head[amp..].contains(';') {
        return cut;
    }
    let closes_after_cut = text[cut..]
        .char_indices()
        .take(MAX_ENTITY)
        .any(|(_, c)| c == ';');
    if closes_after_cut {
        amp
    } else {
        cut
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn normalizes_whitespace() {
        assert_eq!(normalize_whitespace("  /find_data \t chats\n email  x "), "/find_data chats email x");
    }

    #[test]
    fn short_text_is_one_chunk() {
        assert_eq!(split_text("hello", 10), vec!["hello".to_string()]);
        assert!(split_text("", 10).is_empty());
    }

    #[test]
    fn splits_on_newlines_when_possible() {
        let parts = split_text("line one\nline two\nline three", 12);
        assert_eq!(parts, vec!["line one", "line two", "line three"]);
    }

    #[test]
    fn hard_splits_long_words_on_char_boundaries() {
        let parts = split_text("ééééééé", 3);
        assert_eq!(parts, vec!["ééé", "ééé", "é"]);
    }

    #[test]
    fn does_not_cut_entities() {
        let parts = split_text("abcd&amp;efgh", 6);
        assert_eq!(parts[0], "abcd");
        assert!(parts[1].starts_with("&amp;"));
    }
}
