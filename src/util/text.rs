use std::borrow::Cow;

/// Default reading speed used for `read_time` estimates
pub const DEFAULT_WORDS_PER_MINUTE: u32 = 245;

fn is_stripped_control(b: u8) -> bool {
    b == 0x7f || (b < 0x20 && b != b'\t' && b != b'\n' && b != b'\r')
}

/// Strip terminal control characters and ANSI escape sequences.
///
/// Remote folder and feed names end up in terminal output, so they are
/// cleaned before being stored.
///
/// Strips C0 controls (except tab, newline, carriage return), DEL, CSI
/// sequences (`ESC [` ... final byte 0x40-0x7E), OSC sequences (`ESC ]` ...
/// BEL or `ESC \`) and bare ESC bytes.
///
/// Returns `Cow::Borrowed` when nothing needs stripping.
pub fn strip_control_chars(s: &str) -> Cow<'_, str> {
    let bytes = s.as_bytes();
    if !bytes.iter().any(|&b| b == 0x1b || is_stripped_control(b)) {
        return Cow::Borrowed(s);
    }

    let mut out = String::with_capacity(s.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            0x1b if bytes.get(i + 1) == Some(&b'[') => {
                i += 2;
                while let Some(&c) = bytes.get(i) {
                    i += 1;
                    if (0x40..=0x7e).contains(&c) {
                        break;
                    }
                }
            }
            0x1b if bytes.get(i + 1) == Some(&b']') => {
                i += 2;
                while i < bytes.len() {
                    if bytes[i] == 0x07 {
                        i += 1;
                        break;
                    }
                    if bytes[i] == 0x1b && bytes.get(i + 1) == Some(&b'\\') {
                        i += 2;
                        break;
                    }
                    i += 1;
                }
            }
            b if b == 0x1b || is_stripped_control(b) => i += 1,
            _ => {
                let start = i;
                while i < bytes.len() && bytes[i] != 0x1b && !is_stripped_control(bytes[i]) {
                    i += 1;
                }
                // Only ASCII bytes end a run, so the slice is on a char boundary.
                out.push_str(&s[start..i]);
            }
        }
    }

    Cow::Owned(out)
}

/// Clean a remote display name: strip control characters and trim.
///
/// Falls back to `fallback` when nothing printable is left.
pub fn sanitize_name(name: &str, fallback: &str) -> String {
    let cleaned = strip_control_chars(name);
    let trimmed = cleaned.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Count words in text that may contain HTML markup.
///
/// Tags are skipped; everything else is split on whitespace.
pub fn word_count(text: &str) -> usize {
    let mut count = 0;
    let mut in_tag = false;
    let mut in_word = false;

    for c in text.chars() {
        match c {
            '<' => {
                in_tag = true;
                in_word = false;
            }
            '>' if in_tag => in_tag = false,
            _ if in_tag => {}
            c if c.is_whitespace() => in_word = false,
            _ => {
                if !in_word {
                    count += 1;
                    in_word = true;
                }
            }
        }
    }

    count
}

/// Estimated reading time in minutes at `words_per_minute`.
///
/// A zero rate falls back to [`DEFAULT_WORDS_PER_MINUTE`].
pub fn estimate_read_time(text: &str, words_per_minute: u32) -> f64 {
    let wpm = if words_per_minute == 0 {
        DEFAULT_WORDS_PER_MINUTE
    } else {
        words_per_minute
    };
    word_count(text) as f64 / f64::from(wpm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_clean_text_returns_borrowed() {
        let input = "Hello, world!\tTabs\nand newlines\r\n";
        let result = strip_control_chars(input);
        assert!(matches!(result, Cow::Borrowed(_)));
        assert_eq!(result, input);
    }

    #[test]
    fn test_strip_control_chars_removes_controls() {
        let result = strip_control_chars("he\x00ll\x07o\x08 w\x0bor\x0cld\x7f!");
        assert!(matches!(result, Cow::Owned(_)));
        assert_eq!(result, "hello world!");
    }

    #[test]
    fn test_strip_ansi_sequences() {
        assert_eq!(strip_control_chars("\x1b[31mRed\x1b[0m"), "Red");
        assert_eq!(strip_control_chars("\x1b]0;title\x07safe"), "safe");
        assert_eq!(strip_control_chars("\x1b]0;title\x1b\\safe"), "safe");
        assert_eq!(strip_control_chars("a\x1bb"), "ab");
    }

    #[test]
    fn test_strip_unterminated_csi_at_end() {
        assert_eq!(strip_control_chars("text\x1b[12"), "text");
    }

    #[test]
    fn test_strip_unicode_preserved() {
        assert_eq!(strip_control_chars("日本語 \x1b[1m太字\x1b[0m"), "日本語 太字");
    }

    #[test]
    fn test_sanitize_name() {
        assert_eq!(sanitize_name("  Tech News \n", "x"), "Tech News");
        assert_eq!(sanitize_name("\x1b[31m\x1b[0m  ", "fallback"), "fallback");
        assert_eq!(sanitize_name("", "42"), "42");
    }

    #[test]
    fn test_word_count_plain_text() {
        assert_eq!(word_count(""), 0);
        assert_eq!(word_count("one"), 1);
        assert_eq!(word_count("  one two\tthree\nfour  "), 4);
    }

    #[test]
    fn test_word_count_skips_html_tags() {
        let html = r#"<p class="lead">Hello <b>bold</b> world</p><img src="a b c.png"/>"#;
        assert_eq!(word_count(html), 3);
    }

    #[test]
    fn test_word_count_tags_split_words() {
        assert_eq!(word_count("end<br>start"), 2);
    }

    #[test]
    fn test_estimate_read_time() {
        let text = vec!["word"; 490].join(" ");
        assert_eq!(estimate_read_time(&text, 245), 2.0);
        assert_eq!(estimate_read_time(&text, 0), 2.0);
        assert_eq!(estimate_read_time("", 245), 0.0);
    }
}
