//! Selector synthesis.
//!
//! Semantic attributes win over structure: ids, test attributes, names and
//! labels come first, then visible text, then stable classes, and only then
//! ancestor anchors and positions. The result is cached on the element.

use super::node::{collapse_whitespace, DomTree, ElementNode, NodeId};

/// Test-oriented attributes, in priority order
pub const TEST_ATTRIBUTES: [&str; 4] = ["data-testid", "data-test-id", "data-cy", "data-qa"];

/// Tags that never get a tag prefix on short ids
const GENERIC_CONTAINERS: [&str; 9] = [
    "div", "span", "section", "article", "main", "header", "footer", "nav", "aside",
];

/// Tags whose own text makes a reasonable locator
const TEXT_TAGS: [&str; 15] = [
    "button", "a", "span", "label", "legend", "h1", "h2", "h3", "h4", "p", "li", "td", "th",
    "dt", "dd",
];

const STATE_CLASSES: [&str; 20] = [
    "active", "selected", "disabled", "enabled", "hover", "focus", "focused", "open", "opened",
    "closed", "hidden", "visible", "show", "shown", "collapsed", "expanded", "checked", "current",
    "loading", "loaded",
];

const MAX_ANCESTOR_HOPS: usize = 4;
const MAX_CLASSES: usize = 3;

/// How a selector string is interpreted by drivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectorKind {
    /// CSS, possibly with `:text-is()` and `>>` chaining
    Css,
    /// XPath expression
    XPath,
}

/// Split a selector into its kind and body.
///
/// `xpath=` and `css=` prefixes are honored; bare paths starting with `/` or
/// `(` are treated as XPath.
#[must_use]
pub fn selector_kind(selector: &str) -> (SelectorKind, &str) {
    let trimmed = selector.trim();
    if let Some(rest) = trimmed.strip_prefix("xpath=") {
        (SelectorKind::XPath, rest)
    } else if let Some(rest) = trimmed.strip_prefix("css=") {
        (SelectorKind::Css, rest)
    } else if trimmed.starts_with('/') || trimmed.starts_with('(') {
        (SelectorKind::XPath, trimmed)
    } else {
        (SelectorKind::Css, trimmed)
    }
}

/// Canonical form: XPath always carries an explicit `xpath=` prefix
#[must_use]
pub fn normalize_selector(selector: &str) -> String {
    match selector_kind(selector) {
        (SelectorKind::XPath, body) => format!("xpath={body}"),
        (SelectorKind::Css, body) => body.to_string(),
    }
}

/// Selector for a node, computed once and cached.
///
/// Text nodes resolve to their parent's selector; unknown ids and orphan
/// text nodes give an empty string.
#[must_use]
pub fn synthesize(tree: &DomTree, id: NodeId) -> &str {
    let mut target = id;
    if tree.element(target).is_none() {
        match tree.parent(target) {
            Some(parent) => target = parent,
            None => return "",
        }
    }
    let Some(el) = tree.element(target) else {
        return "";
    };
    el.selector.get_or_init(|| compute(tree, target, el))
}

fn compute(tree: &DomTree, id: NodeId, el: &ElementNode) -> String {
    let tag = el.tag_name.as_str();

    if let Some(id_attr) = usable_id(el) {
        let escaped = format!("#{}", css_escape(id_attr));
        if id_attr.chars().count() < 6 && !GENERIC_CONTAINERS.contains(&tag) {
            return format!("{tag}{escaped}");
        }
        return escaped;
    }

    for attr in TEST_ATTRIBUTES {
        if let Some(value) = el.non_empty_attr(attr) {
            return format!("[{attr}={}]", quote_attr(value));
        }
    }

    if let Some(name) = el.non_empty_attr("name") {
        return format!("{tag}[name={}]", quote_attr(name));
    }

    if let Some(label) = el.non_empty_attr("aria-label") {
        if (3..80).contains(&label.chars().count()) {
            return format!("{tag}[aria-label={}]", quote_attr(label));
        }
    }

    if matches!(tag, "input" | "textarea") {
        if let Some(placeholder) = el.non_empty_attr("placeholder") {
            return format!("{tag}[placeholder={}]", quote_attr(placeholder));
        }
    }

    if TEXT_TAGS.contains(&tag) {
        let text = collapse_whitespace(&tree.direct_text(id));
        if (3..60).contains(&text.chars().count()) && !is_numeric_or_currency(&text) {
            return format!("{tag}:text-is({})", quote_text(&text));
        }
    }

    let classes: Vec<&str> = el.classes().filter(|c| is_stable_class(c)).take(MAX_CLASSES).collect();
    let base = compose_base(tag, &classes);
    let matches = |candidate: &ElementNode| {
        candidate.tag_name == tag && classes.iter().all(|c| candidate.classes().any(|k| k == *c))
    };

    if count_matches(tree, tree.root(), None, &matches) == 1 {
        return base;
    }

    let mut anchor: Option<(NodeId, String)> = None;
    for ancestor in tree.ancestors(id).take(MAX_ANCESTOR_HOPS) {
        if let Some(anchor_sel) = tree.element(ancestor).and_then(anchor_selector) {
            if count_matches(tree, ancestor, None, &matches) == 1 {
                return format!("{anchor_sel} >> {base}");
            }
            anchor = Some((ancestor, anchor_sel));
            break;
        }
    }

    if let Some(position) = nth_of_type(tree, id) {
        let positional = format!("{base}:nth-of-type({position})");
        let scope = anchor.as_ref().map_or(tree.root(), |(a, _)| *a);
        if count_matches(tree, scope, Some(position), &matches) == 1 {
            return match anchor {
                Some((_, anchor_sel)) => format!("{anchor_sel} >> {positional}"),
                None => positional,
            };
        }
    }

    if el.xpath.is_empty() {
        base
    } else {
        format!("xpath={}", el.xpath)
    }
}

fn compose_base(tag: &str, classes: &[&str]) -> String {
    let mut base = tag.to_string();
    for class in classes {
        base.push('.');
        base.push_str(&css_escape(class));
    }
    base
}

/// Matching elements strictly below `scope` (or the whole tree for the root)
fn count_matches(
    tree: &DomTree,
    scope: NodeId,
    position: Option<usize>,
    matches: &dyn Fn(&ElementNode) -> bool,
) -> usize {
    let include_scope = scope == tree.root();
    tree.descendant_elements(scope)
        .filter(|(id, _)| include_scope || *id != scope)
        .filter(|(_, el)| matches(el))
        .filter(|(id, _)| position.map_or(true, |p| nth_of_type(tree, *id) == Some(p)))
        .count()
}

/// 1-based position among same-tag element siblings
fn nth_of_type(tree: &DomTree, id: NodeId) -> Option<usize> {
    let tag = &tree.element(id)?.tag_name;
    let parent = tree.parent(id)?;
    tree.children(parent)
        .iter()
        .filter(|&&sib| tree.element(sib).is_some_and(|s| &s.tag_name == tag))
        .position(|&sib| sib == id)
        .map(|p| p + 1)
}

fn anchor_selector(el: &ElementNode) -> Option<String> {
    if let Some(id_attr) = usable_id(el) {
        return Some(format!("#{}", css_escape(id_attr)));
    }
    el.non_empty_attr("data-testid")
        .map(|v| format!("[data-testid={}]", quote_attr(v)))
}

fn usable_id(el: &ElementNode) -> Option<&str> {
    let id = el.non_empty_attr("id")?;
    let numeric = id.chars().all(|c| c.is_ascii_digit());
    let bad_chars = id.chars().any(|c| c.is_whitespace() || c == ':');
    (!numeric && !bad_chars).then_some(id)
}

fn is_numeric_or_currency(text: &str) -> bool {
    const SYMBOLS: &str = ".,:%+-()$€£¥₹";
    text.chars()
        .all(|c| c.is_whitespace() || c.is_ascii_digit() || SYMBOLS.contains(c))
}

fn is_stable_class(class: &str) -> bool {
    if class.chars().count() <= 2 {
        return false;
    }
    if class.chars().all(|c| c.is_ascii_digit()) || has_digit_run(class, 3) {
        return false;
    }
    let lower = class.to_ascii_lowercase();
    if STATE_CLASSES.contains(&lower.as_str())
        || lower.starts_with("is-")
        || lower.starts_with("has-")
        || lower.contains("--")
    {
        return false;
    }
    !is_hash_like(class)
}

fn has_digit_run(s: &str, len: usize) -> bool {
    let mut run = 0;
    for c in s.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= len {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

/// CSS-in-JS and module hashes: `css-1x2ab`, `sc-bdVaJa`, `Button_root__x7Yq2`
fn is_hash_like(class: &str) -> bool {
    const GENERATED_PREFIXES: [&str; 5] = ["css-", "sc-", "jsx-", "emotion-", "styled-"];
    if GENERATED_PREFIXES.iter().any(|p| class.starts_with(p)) {
        return true;
    }
    class
        .rsplit(|c| c == '-' || c == '_')
        .next()
        .is_some_and(|segment| {
            segment.len() >= 5
                && segment.chars().all(|c| c.is_ascii_alphanumeric())
                && segment.chars().any(|c| c.is_ascii_digit())
                && segment.chars().any(|c| c.is_ascii_alphabetic())
        })
}

/// Escape an identifier the way `CSS.escape` does
#[must_use]
pub fn css_escape(value: &str) -> String {
    let chars: Vec<char> = value.chars().collect();
    let mut out = String::with_capacity(value.len());
    for (i, &c) in chars.iter().enumerate() {
        let code = c as u32;
        if code == 0 {
            out.push('\u{FFFD}');
        } else if (0x01..=0x1F).contains(&code)
            || code == 0x7F
            || (i == 0 && c.is_ascii_digit())
            || (i == 1 && c.is_ascii_digit() && chars[0] == '-')
        {
            out.push_str(&format!("\\{code:x} "));
        } else if i == 0 && c == '-' && chars.len() == 1 {
            out.push_str("\\-");
        } else if code >= 0x80 || c == '-' || c == '_' || c.is_ascii_alphanumeric() {
            out.push(c);
        } else {
            out.push('\\');
            out.push(c);
        }
    }
    out
}

fn quote_attr(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'").replace('\n', " ");
    format!("'{escaped}'")
}

fn quote_text(value: &str) -> String {
    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}
