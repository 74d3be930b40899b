//! Markdown-to-prose normalization (§4.G step 10).
//!
//! A deliberate safety net: the Agent is prompted to speak colloquially,
//! but this guarantees the output shape regardless of what the model
//! actually returns.

use regex::Regex;
use std::sync::OnceLock;

fn list_marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*(?:[-*\u{2022}]|\d+[.)])\s+(.*)$").expect("valid regex"))
}

fn spaces_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[ \t]+").expect("valid regex"))
}

fn blank_lines_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\n{3,}").expect("valid regex"))
}

/// Rewrites a Markdown-list reply into a single colloquial sentence, or
/// simply collapses whitespace when no list is present.
#[must_use]
pub fn normalize_reply(text: &str) -> String {
    let mut items = Vec::new();
    let mut leading_lines = Vec::new();
    let mut seen_list = false;

    for line in text.lines() {
        if let Some(caps) = list_marker_re().captures(line) {
            seen_list = true;
            let item = caps[1].trim().trim_end_matches(['。', '.', '，', ',']).to_owned();
            if !item.is_empty() {
                items.push(item);
            }
        } else if !seen_list && !line.trim().is_empty() {
            leading_lines.push(line.trim());
        }
    }

    if !seen_list || items.is_empty() {
        return collapse_whitespace(text);
    }

    let leading =
        leading_lines.join(" ").trim().trim_end_matches(['：', ':', '，', ',', '。', '.']).to_owned();
    let items_joined = items.join("、");
    if leading.is_empty() {
        format!("有{items_joined}可以选，你看看呢？")
    } else {
        format!("{leading}，有{items_joined}可以选，你看看呢？")
    }
}

fn collapse_whitespace(text: &str) -> String {
    let collapsed = spaces_re().replace_all(text, " ");
    blank_lines_re().replace_all(&collapsed, "\n\n").trim().to_owned()
}

#[cfg(test)]
mod tests {
    use super::normalize_reply;

    #[test]
    fn leaves_plain_sentence_untouched() {
        let text = "有肯德基、必胜客、奥乐齐可以选～要不要看看？";
        assert_eq!(normalize_reply(text), text);
    }

    #[test]
    fn converts_bullet_list_to_single_sentence() {
        let text = "附近有这些选择：\n- 肯德基\n- 必胜客\n- 奥乐齐";
        let result = normalize_reply(text);
        assert!(!result.contains('\n'));
        assert!(result.contains("肯德基、必胜客、奥乐齐"));
    }

    #[test]
    fn converts_numbered_list_to_single_sentence() {
        let text = "推荐几个：\n1. 肯德基\n2. 必胜客";
        let result = normalize_reply(text);
        assert!(!result.contains('\n'));
        assert!(result.contains("肯德基、必胜客"));
    }

    #[test]
    fn collapses_excess_whitespace_without_a_list() {
        let text = "第一行\n\n\n\n第二行";
        assert_eq!(normalize_reply(text), "第一行\n\n第二行");
    }
}
