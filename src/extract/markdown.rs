//! Minimal HTML to Markdown rendering for the read path.
//!
//! ATX headings, fenced code blocks (language sniffed from `language-*`
//! classes), `-` bullets, links, emphasis, blockquotes, and pipe-joined table
//! rows. Non-content elements are skipped entirely; callers strip page chrome
//! before rendering.

use scraper::node::Node;
use scraper::{ElementRef, Html};

/// Elements that never contribute to readable output.
const SKIPPED: &[&str] = &[
    "script", "style", "nav", "header", "footer", "aside", "iframe", "noscript", "img", "svg",
    "video", "audio", "canvas", "head",
];

/// Renders an HTML fragment as Markdown.
pub fn to_markdown(fragment: &str) -> String {
    let doc = Html::parse_fragment(fragment);
    let mut out = String::new();
    for child in doc.root_element().children() {
        render_node(child, &mut out, 0);
    }
    tidy(&out)
}

/// Renders a parsed element subtree as Markdown.
pub fn element_to_markdown(el: ElementRef<'_>) -> String {
    let mut out = String::new();
    render_element(el, &mut out, 0);
    tidy(&out)
}

fn render_node(node: ego_tree::NodeRef<'_, Node>, out: &mut String, list_depth: usize) {
    match node.value() {
        Node::Text(text) => push_inline_text(out, text),
        Node::Element(_) => {
            if let Some(el) = ElementRef::wrap(node) {
                render_element(el, out, list_depth);
            }
        }
        _ => {}
    }
}

fn render_element(el: ElementRef<'_>, out: &mut String, list_depth: usize) {
    let tag = el.value().name();
    if SKIPPED.contains(&tag) {
        return;
    }

    match tag {
        "h1" | "h2" | "h3" | "h4" | "h5" | "h6" => {
            let level = tag[1..].parse::<usize>().unwrap_or(1);
            let text = crate::extract::element_text(el);
            if !text.is_empty() {
                out.push_str("\n\n");
                out.push_str(&"#".repeat(level));
                out.push(' ');
                out.push_str(&text);
                out.push_str("\n\n");
            }
        }
        "p" => {
            out.push_str("\n\n");
            render_children(el, out, list_depth);
            out.push_str("\n\n");
        }
        "br" => out.push('\n'),
        "hr" => out.push_str("\n\n---\n\n"),
        "ul" | "ol" => {
            out.push('\n');
            for item in el.children().filter_map(ElementRef::wrap) {
                if item.value().name() == "li" {
                    out.push('\n');
                    out.push_str(&"  ".repeat(list_depth));
                    out.push_str("- ");
                    render_children(item, out, list_depth + 1);
                }
            }
            out.push('\n');
        }
        "pre" => {
            let code = el.text().collect::<String>();
            let lang = code_language(el).unwrap_or_default();
            out.push_str(&format!("\n\n```{lang}\n{}\n```\n\n", code.trim_end()));
        }
        "code" => {
            let text = crate::extract::element_text(el);
            if !text.is_empty() {
                out.push('`');
                out.push_str(&text);
                out.push('`');
            }
        }
        "a" => {
            let text = crate::extract::element_text(el);
            match el.value().attr("href") {
                Some(href) if !text.is_empty() => {
                    out.push_str(&format!("[{text}]({href})"));
                }
                _ => out.push_str(&text),
            }
        }
        "strong" | "b" => {
            let text = crate::extract::element_text(el);
            if !text.is_empty() {
                out.push_str(&format!("**{text}**"));
            }
        }
        "em" | "i" => {
            let text = crate::extract::element_text(el);
            if !text.is_empty() {
                out.push_str(&format!("*{text}*"));
            }
        }
        "blockquote" => {
            let mut inner = String::new();
            render_children(el, &mut inner, list_depth);
            out.push_str("\n\n");
            for line in tidy(&inner).lines() {
                out.push_str("> ");
                out.push_str(line);
                out.push('\n');
            }
            out.push('\n');
        }
        "tr" => {
            let cells: Vec<String> = el
                .children()
                .filter_map(ElementRef::wrap)
                .filter(|cell| matches!(cell.value().name(), "td" | "th"))
                .map(crate::extract::element_text)
                .collect();
            if !cells.is_empty() {
                out.push_str(&format!("\n| {} |", cells.join(" | ")));
            }
        }
        "table" | "thead" | "tbody" => {
            render_children(el, out, list_depth);
            out.push('\n');
        }
        _ => render_children(el, out, list_depth),
    }
}

fn render_children(el: ElementRef<'_>, out: &mut String, list_depth: usize) {
    for child in el.children() {
        render_node(child, out, list_depth);
    }
}

fn code_language(pre: ElementRef<'_>) -> Option<String> {
    pre.descendants()
        .filter_map(ElementRef::wrap)
        .filter(|el| el.value().name() == "code")
        .filter_map(|el| el.value().attr("class"))
        .flat_map(str::split_whitespace)
        .find_map(|class| class.strip_prefix("language-").map(str::to_string))
}

fn push_inline_text(out: &mut String, text: &str) {
    let normalized = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if normalized.is_empty() {
        return;
    }
    if !out.is_empty() && !out.ends_with([' ', '\n', '(', '[']) {
        out.push(' ');
    }
    out.push_str(&normalized);
}

/// Collapses runs of blank lines and trims the result.
fn tidy(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut blank_run = 0usize;
    for line in raw.lines() {
        let trimmed = line.trim_end();
        if trimmed.is_empty() {
            blank_run += 1;
            if blank_run > 1 {
                continue;
            }
        } else {
            blank_run = 0;
        }
        out.push_str(trimmed);
        out.push('\n');
    }
    out.trim().to_string()
}
