//! Greedy word wrapping measured in pixels.
//!
//! Words are packed into a line while the line stays narrower than the limit.
//! A word that is wider than the limit on its own is broken between clusters
//! (see [`emoji_aware_clusters`]), so a glyph token is never cut in half.

use crate::fonts::Font;
use crate::glyphs::emoji_aware_clusters;
use crate::measure::{line_width, GlyphOptions};

/// Wraps `text` so that each line measures at most `max_width` pixels with `font`.
///
/// Explicit newlines are kept as line breaks. Lines may only exceed the limit when
/// they consist of a single cluster that is wider than the limit by itself.
pub fn wrap_text(
    text: &str,
    font: &dyn Font,
    max_width: u32,
    options: &GlyphOptions,
) -> Vec<String> {
    wrap_with(text, max_width, |candidate| {
        line_width(candidate, font, options)
    })
}

/// The wrapping algorithm over an arbitrary width function.
pub fn wrap_with<F>(text: &str, max_width: u32, width_of: F) -> Vec<String>
where
    F: Fn(&str) -> u32,
{
    let max_width = max_width.max(1);
    text.split('\n')
        .flat_map(|line| wrap_line(line, max_width, &width_of))
        .collect()
}

fn wrap_line<F>(line: &str, max_width: u32, width_of: &F) -> Vec<String>
where
    F: Fn(&str) -> u32,
{
    let mut lines: Vec<String> = Vec::new();
    let mut buffer: Vec<String> = Vec::new();

    for word in line.split_whitespace() {
        let candidate = if buffer.is_empty() {
            word.to_string()
        } else {
            format!("{} {}", buffer.join(" "), word)
        };
        if width_of(&candidate) < max_width {
            buffer.push(word.to_string());
            continue;
        }

        let current = buffer.join(" ");
        if !current.is_empty() && width_of(&current) >= max_width {
            let mut chunks = wrap_by_clusters(&current, max_width, width_of);
            let last = chunks.pop().unwrap_or_default();
            lines.extend(chunks);
            buffer = vec![last, word.to_string()];
        } else {
            if !current.is_empty() {
                lines.push(current);
            }
            buffer = vec![word.to_string()];
        }
    }

    if !buffer.is_empty() {
        let current = buffer.join(" ");
        if width_of(&current) >= max_width {
            lines.extend(wrap_by_clusters(&current, max_width, width_of));
        } else {
            lines.push(current);
        }
    }

    strip_edges(lines)
}

/// Breaks `text` between clusters whenever the next cluster would overflow.
fn wrap_by_clusters<F>(text: &str, max_width: u32, width_of: &F) -> Vec<String>
where
    F: Fn(&str) -> u32,
{
    let mut chunks = Vec::new();
    let mut buffer = String::new();

    for cluster in emoji_aware_clusters(text) {
        let candidate = format!("{}{}", buffer, cluster);
        if width_of(&candidate) > max_width && !buffer.is_empty() {
            chunks.push(std::mem::replace(&mut buffer, cluster));
            continue;
        }
        buffer = candidate;
    }

    if !buffer.is_empty() {
        chunks.push(buffer);
    }
    chunks
}

/// Trims the outer edges of a wrapped paragraph and drops edges left empty.
fn strip_edges(mut lines: Vec<String>) -> Vec<String> {
    if let Some(first) = lines.first_mut() {
        *first = first.trim_start().to_string();
    }
    if let Some(last) = lines.last_mut() {
        *last = last.trim_end().to_string();
    }
    lines.retain(|line| !line.is_empty());
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fonts::NativeFont;

    /// Ten pixels per character, glyph tokens count as one character.
    fn fixed(text: &str) -> u32 {
        emoji_aware_clusters(text).len() as u32 * 10
    }

    #[test]
    fn test_short_input_is_one_line() {
        assert_eq!(wrap_with("hello", 100, fixed), vec!["hello"]);
        assert_eq!(wrap_with("hello world", 200, fixed), vec!["hello world"]);
    }

    #[test]
    fn test_breaks_between_words() {
        // "aaa bbb" is 70 px, the limit is strict
        assert_eq!(wrap_with("aaa bbb", 70, fixed), vec!["aaa", "bbb"]);
        assert_eq!(wrap_with("aaa bbb", 71, fixed), vec!["aaa bbb"]);
        assert_eq!(
            wrap_with("one two three four", 90, fixed),
            vec!["one two", "three", "four"]
        );
    }

    #[test]
    fn test_overlong_word_is_split_by_clusters() {
        let lines = wrap_with("abcdefghij", 40, fixed);
        assert_eq!(lines, vec!["abcd", "efgh", "ij"]);
        assert!(lines.iter().all(|line| fixed(line) <= 40));
    }

    #[test]
    fn test_overlong_word_tail_joins_next_word() {
        // the tail "efg" restarts the buffer, and its break lands after the space
        let lines = wrap_with("abcdefg hi", 40, fixed);
        assert_eq!(lines, vec!["abcd", "efg ", "hi"]);
    }

    #[test]
    fn test_glyph_token_is_never_split() {
        let token = "<:blob:123456789012345678>";
        let text = format!("{}{}{}", token, token, token);
        let lines = wrap_with(&text, 15, fixed);
        assert_eq!(lines, vec![token.to_string(), token.to_string(), token.to_string()]);
    }

    #[test]
    fn test_single_cluster_wider_than_limit_is_kept() {
        let lines = wrap_with("😀", 1, |_| 50);
        assert_eq!(lines, vec!["😀"]);
    }

    #[test]
    fn test_newlines_and_blank_input() {
        assert_eq!(wrap_with("top\nbottom", 500, fixed), vec!["top", "bottom"]);
        assert!(wrap_with("", 100, fixed).is_empty());
        assert!(wrap_with("   \n  ", 100, fixed).is_empty());
        assert_eq!(wrap_with("a\n\nb", 100, fixed), vec!["a", "b"]);
    }

    #[test]
    fn test_whitespace_is_normalized() {
        let lines = wrap_with("  spaced    out\twords  ", 1000, fixed);
        assert_eq!(lines, vec!["spaced out words"]);
    }

    #[test]
    fn test_zero_width_does_not_loop() {
        let lines = wrap_with("ab", 0, fixed);
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[test]
    fn test_wrap_text_with_real_font() {
        let font = NativeFont::bundled(24.0).unwrap();
        let options = GlyphOptions::default();
        let text = "the quick brown fox jumps over the lazy dog 😀 again and again";
        let lines = wrap_text(text, &font, 200, &options);
        assert!(lines.len() > 1);
        for line in &lines {
            assert!(line_width(line, &font, &options) <= 200, "{:?} too wide", line);
        }
        assert_eq!(lines.join(" "), text);
    }
}
