//! Slack mrkdwn conversion and Block Kit layout.
//!
//! Completion APIs answer in standard Markdown while Slack renders its own
//! "mrkdwn" dialect:
//!
//! - Uses `*bold*` instead of `**bold**`
//! - Uses `_italic_` instead of `*italic*`
//! - Uses `~strikethrough~` instead of `~~strikethrough~~`
//! - Links use `<url|text>` format
//! - Code blocks use triple backticks (same as standard)
//!
//! The finished answer is laid out as `[section.., divider, context]`, with
//! the section text split to respect the per-block length limit.

use regex::Regex;
use serde::Serialize;
use std::sync::LazyLock;

/// Maximum length of a section block's text.
pub const MAX_BLOCK_TEXT_LENGTH: usize = 3000;

/// Maximum number of blocks in one message.
pub const MAX_BLOCKS: usize = 50;

/// Last section of an answer that did not fit in [`MAX_BLOCKS`].
const TRUNCATION_NOTICE: &str = "_Answer truncated._";

static H1_H2_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{1,2} (.+)$").expect("valid heading regex"));
static H3_H4_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^#{3,4} (.+)$").expect("valid heading regex"));
static BOLD_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\*\*(.+?)\*\*").expect("valid bold regex"));
static STRIKETHROUGH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"~~(.+?)~~").expect("valid strikethrough regex"));
static LINK_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\(([^)]+)\)").expect("valid link regex"));
static DASH_LIST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\s*)[-*] (.*)$").expect("valid list regex"));
static CODE_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```[\w+-]*\s*$").expect("valid fence regex"));

// ============================================================================
// mrkdwn Conversion
// ============================================================================

/// Convert standard Markdown to Slack mrkdwn.
///
/// | Input                | Output              |
/// |----------------------|---------------------|
/// | `# Title`            | `*Title*`           |
/// | `### Section`        | `_Section_`         |
/// | `**bold**`           | `*bold*`            |
/// | `*italic*`           | `_italic_`          |
/// | `~~strike~~`         | `~strike~`          |
/// | `[text](url)`        | `<url|text>`        |
/// | `- item`             | `• item`            |
///
/// Fenced code is left untouched.
pub fn convert_to_slack_mrkdwn(input: &str) -> String {
    let mut in_code_block = false;
    let mut out = Vec::new();

    for line in input.lines() {
        if CODE_FENCE.is_match(line) {
            in_code_block = !in_code_block;
            out.push(line.to_string());
        } else if in_code_block {
            out.push(line.to_string());
        } else {
            out.push(convert_inline(&convert_line(line)));
        }
    }

    out.join("\n")
}

fn convert_line(line: &str) -> String {
    if let Some(caps) = H3_H4_PATTERN.captures(line) {
        return format!("_{}_", &caps[1]);
    }
    if let Some(caps) = H1_H2_PATTERN.captures(line) {
        return format!("**{}**", &caps[1]);
    }
    if let Some(caps) = DASH_LIST_PATTERN.captures(line) {
        return format!("{}• {}", &caps[1], &caps[2]);
    }
    line.to_string()
}

fn convert_inline(line: &str) -> String {
    // Italic goes first so that converted bold markers are not mistaken for it.
    let line = convert_italic(line);
    let line = BOLD_PATTERN.replace_all(&line, "*$1*");
    let line = STRIKETHROUGH_PATTERN.replace_all(&line, "~$1~");
    LINK_PATTERN.replace_all(&line, "<$2|$1>").into_owned()
}

/// Rewrite single-asterisk spans as underscores, leaving `**` pairs alone.
fn convert_italic(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut result = String::with_capacity(text.len());
    let mut i = 0;

    while i < chars.len() {
        let single_open = chars[i] == '*'
            && (i == 0 || chars[i - 1] != '*')
            && chars.get(i + 1).is_some_and(|c| *c != '*' && *c != ' ');

        if single_open {
            if let Some(end) = find_closing_asterisk(&chars, i + 1) {
                result.push('_');
                result.extend(&chars[i + 1..end]);
                result.push('_');
                i = end + 1;
                continue;
            }
        }

        result.push(chars[i]);
        i += 1;
    }

    result
}

fn find_closing_asterisk(chars: &[char], start: usize) -> Option<usize> {
    (start + 1..chars.len()).find(|&i| {
        chars[i] == '*'
            && !matches!(chars[i - 1], ' ' | '\\' | '*')
            && chars.get(i + 1) != Some(&'*')
    })
}

// ============================================================================
// Splitting
// ============================================================================

/// Split text into chunks of at most `max_len` bytes.
///
/// Splits on line breaks where possible, then on spaces, and never inside a
/// UTF-8 character.
pub fn split_message(text: &str, max_len: usize) -> Vec<String> {
    if text.len() <= max_len {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let separator = usize::from(!current.is_empty());
        if current.len() + separator + line.len() <= max_len {
            if separator == 1 {
                current.push('\n');
            }
            current.push_str(line);
            continue;
        }

        if !current.is_empty() {
            chunks.push(std::mem::take(&mut current));
        }

        let mut remaining = line;
        while remaining.len() > max_len {
            let split_point = find_split_point(remaining, max_len);
            chunks.push(remaining[..split_point].to_string());
            remaining = &remaining[split_point..];
        }
        current.push_str(remaining);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

/// Find a split point at or before `max_len`, preferring the last space.
fn find_split_point(text: &str, max_len: usize) -> usize {
    let mut limit = max_len.min(text.len());
    while !text.is_char_boundary(limit) {
        limit -= 1;
    }

    match text[..limit].rfind(' ') {
        Some(pos) if pos > 0 => pos + 1,
        _ if limit > 0 => limit,
        // First character alone exceeds the limit.
        _ => text.chars().next().map_or(text.len(), char::len_utf8),
    }
}

// ============================================================================
// Block Kit
// ============================================================================

/// Text object inside a block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TextObject {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub text: String,
}

impl TextObject {
    pub fn mrkdwn(text: impl Into<String>) -> Self {
        Self {
            kind: "mrkdwn",
            text: text.into(),
        }
    }
}

/// The Block Kit blocks used by the bot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Block {
    Section { text: TextObject },
    Divider,
    Context { elements: Vec<TextObject> },
}

/// Layout of a finished answer: the answer, a divider, then the disclaimer.
///
/// An empty answer produces no section block. An answer too long for
/// [`MAX_BLOCKS`] keeps its leading sections and ends with a truncation note.
pub fn final_message_blocks(text: &str, disclaimer: &str) -> Vec<Block> {
    let converted = convert_to_slack_mrkdwn(text);
    let sections: Vec<String> = split_message(&converted, MAX_BLOCK_TEXT_LENGTH)
        .into_iter()
        .filter(|chunk| !chunk.trim().is_empty())
        .collect();

    // Divider and context take the last two blocks.
    let max_sections = MAX_BLOCKS - 2;
    let truncated = sections.len() > max_sections;
    if truncated {
        tracing::warn!(
            sections = sections.len(),
            max_sections,
            "Answer exceeds the block limit, truncating"
        );
    }

    let mut blocks: Vec<Block> = sections
        .into_iter()
        .take(if truncated { max_sections - 1 } else { max_sections })
        .map(|chunk| Block::Section {
            text: TextObject::mrkdwn(chunk),
        })
        .collect();
    if truncated {
        blocks.push(Block::Section {
            text: TextObject::mrkdwn(TRUNCATION_NOTICE),
        });
    }

    blocks.push(Block::Divider);
    blocks.push(Block::Context {
        elements: vec![TextObject::mrkdwn(disclaimer)],
    });
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn convert_headings() {
        assert_eq!(convert_to_slack_mrkdwn("# Title"), "*Title*");
        assert_eq!(convert_to_slack_mrkdwn("## Subtitle"), "*Subtitle*");
        assert_eq!(convert_to_slack_mrkdwn("### Section"), "_Section_");
    }

    #[test]
    fn convert_bold_and_italic() {
        assert_eq!(convert_to_slack_mrkdwn("**bold text**"), "*bold text*");
        assert_eq!(convert_to_slack_mrkdwn("an *italic* word"), "an _italic_ word");
        assert_eq!(
            convert_to_slack_mrkdwn("**bold** and *italic*"),
            "*bold* and _italic_"
        );
    }

    #[test]
    fn arithmetic_is_not_italic() {
        assert_eq!(convert_to_slack_mrkdwn("2 * 3 * 4 = 24"), "2 * 3 * 4 = 24");
    }

    #[test]
    fn convert_strikethrough_and_link() {
        assert_eq!(convert_to_slack_mrkdwn("~~deleted~~"), "~deleted~");
        assert_eq!(
            convert_to_slack_mrkdwn("[Click here](https://example.com)"),
            "<https://example.com|Click here>"
        );
    }

    #[test]
    fn convert_lists() {
        let result = convert_to_slack_mrkdwn("## Summary\n- Point 1\n  - Nested");
        assert_eq!(result, "*Summary*\n• Point 1\n  • Nested");
    }

    #[test]
    fn preserve_code_blocks() {
        let input = "```rust\nlet x = **y**;\n- not a list\n```\n**after**";
        let result = convert_to_slack_mrkdwn(input);
        assert!(result.contains("let x = **y**;"));
        assert!(result.contains("- not a list"));
        assert!(result.ends_with("*after*"));
    }

    #[test]
    fn split_short_message() {
        assert_eq!(split_message("Short message", 3000), vec!["Short message"]);
    }

    #[test]
    fn split_on_lines() {
        let text = format!("{}\n{}", "a".repeat(20), "b".repeat(20));
        let chunks = split_message(&text, 30);
        assert_eq!(chunks, vec!["a".repeat(20), "b".repeat(20)]);
    }

    #[test]
    fn split_long_line_on_spaces() {
        let text = "word ".repeat(10);
        let chunks = split_message(text.trim_end(), 12);
        assert!(chunks.iter().all(|c| c.len() <= 12));
        assert_eq!(chunks.concat(), text.trim_end());
    }

    #[test]
    fn split_respects_char_boundaries() {
        let text = "答".repeat(10);
        let chunks = split_message(&text, 7);
        assert!(chunks.iter().all(|c| c.len() <= 7));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn final_blocks_layout() {
        let blocks = final_message_blocks("**4**", "May be wrong.");
        assert_eq!(
            serde_json::to_value(&blocks).unwrap(),
            json!([
                {"type": "section", "text": {"type": "mrkdwn", "text": "*4*"}},
                {"type": "divider"},
                {"type": "context", "elements": [{"type": "mrkdwn", "text": "May be wrong."}]}
            ])
        );
    }

    #[test]
    fn final_blocks_split_long_answer() {
        let answer = format!("{}\n{}", "x".repeat(2500), "y".repeat(2500));
        let blocks = final_message_blocks(&answer, "footer");
        assert_eq!(blocks.len(), 4);
        assert!(matches!(blocks[0], Block::Section { .. }));
        assert!(matches!(blocks[1], Block::Section { .. }));
        assert_eq!(blocks[2], Block::Divider);
    }

    #[test]
    fn final_blocks_respect_block_limit() {
        let paragraph = "x".repeat(MAX_BLOCK_TEXT_LENGTH - 1);
        let answer = vec![paragraph.as_str(); 60].join("\n");
        let blocks = final_message_blocks(&answer, "footer");

        assert_eq!(blocks.len(), MAX_BLOCKS);
        assert_eq!(
            blocks[MAX_BLOCKS - 3],
            Block::Section {
                text: TextObject::mrkdwn(TRUNCATION_NOTICE)
            }
        );
        assert_eq!(blocks[MAX_BLOCKS - 2], Block::Divider);

        // Exactly at the limit nothing is dropped.
        let answer = vec![paragraph.as_str(); MAX_BLOCKS - 2].join("\n");
        let blocks = final_message_blocks(&answer, "footer");
        assert_eq!(blocks.len(), MAX_BLOCKS);
        assert!(!blocks.contains(&Block::Section {
            text: TextObject::mrkdwn(TRUNCATION_NOTICE)
        }));
    }

    #[test]
    fn final_blocks_empty_answer() {
        let blocks = final_message_blocks("", "footer");
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0], Block::Divider);
    }
}
