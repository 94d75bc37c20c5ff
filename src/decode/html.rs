//! Plain-text rendering of HTML bodies

use scraper::{Html, Node};

/// Elements whose text is never shown to a reader.
const HIDDEN_ELEMENTS: &[&str] = &["head", "script", "style", "noscript", "template"];

/// Collect the visible text nodes of `html` in document order.
///
/// Each non-blank text node is trimmed and put on its own line. Text
/// inside `head`, `script`, `style`, `noscript` and `template` is
/// skipped.
#[must_use]
pub fn html_to_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let mut out = String::new();

    for node in document.tree.root().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        let hidden = node.ancestors().any(|ancestor| {
            ancestor
                .value()
                .as_element()
                .is_some_and(|el| HIDDEN_ELEMENTS.contains(&el.name()))
        });
        if hidden {
            continue;
        }
        out.push_str(trimmed);
        out.push('\n');
    }

    out.trim().to_string()
}
