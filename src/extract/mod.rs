//! Structure-aware section extraction.
//!
//! Turns a parsed HTML document into the three representations the indexes
//! consume: an ordered heading list, a sparse lexical-index blob (headings,
//! meta description, bold runs; precision over recall), and a sequence of
//! chunk texts bounded for the embedding model. Chunk boundaries follow the
//! document's heading structure rather than a fixed width; this is the main
//! quality lever for semantic recall.

pub mod markdown;

use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

/// Character budget while accumulating a heading's sibling content.
pub const CHUNK_BUDGET: usize = 1500;
/// Hard ceiling per chunk text, matching the embedding model's input limit.
pub const CHUNK_CEILING: usize = 2000;
/// Cap on the first-paragraph excerpt in the title chunk.
const FIRST_PARAGRAPH_CAP: usize = 500;
/// Bold/strong runs longer than this are boilerplate, not keywords.
const SPARSE_BOLD_CAP: usize = 100;
/// A lone accumulated fragment at or under this length is a noise heading.
const NOISE_FRAGMENT_LEN: usize = 20;

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("title").unwrap());
static H1: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static HEADINGS_LEXICAL: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3").unwrap());
static HEADINGS_CHUNK: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("h1, h2, h3, h4").unwrap());
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse(r#"meta[name="description"]"#).unwrap());
static BOLD: LazyLock<Selector> = LazyLock::new(|| Selector::parse("b, strong").unwrap());
static PARAGRAPH: LazyLock<Selector> = LazyLock::new(|| Selector::parse("p").unwrap());
static LIST_ITEM: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li").unwrap());
static TABLE_HEADER: LazyLock<Selector> = LazyLock::new(|| Selector::parse("th").unwrap());

/// Extractor output for one page or anchor section.
#[derive(Clone, Debug, Default)]
pub struct PageExtract {
    /// Ordered h1-h3 text.
    pub headings: Vec<String>,
    /// Headings + meta description + bold runs, `" . "`-joined.
    pub sparse_content: String,
    /// Chunk texts ready for embedding, each at most [`CHUNK_CEILING`] chars.
    pub chunks: Vec<String>,
}

/// Page title: `<title>`, falling back to the first `<h1>`, then `"Untitled"`.
pub fn page_title(doc: &Html) -> String {
    doc.select(&TITLE)
        .next()
        .map(|el| element_text(el))
        .filter(|t| !t.is_empty())
        .or_else(|| {
            doc.select(&H1)
                .next()
                .map(|el| element_text(el))
                .filter(|t| !t.is_empty())
        })
        .unwrap_or_else(|| "Untitled".to_string())
}

/// Runs the full extraction over a parsed document.
pub fn extract(doc: &Html, title: &str) -> PageExtract {
    let headings = extract_headings(doc);
    PageExtract {
        sparse_content: sparse_content(doc, &headings),
        chunks: chunk_page(doc, title),
        headings,
    }
}

fn extract_headings(doc: &Html) -> Vec<String> {
    doc.select(&HEADINGS_LEXICAL)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

fn sparse_content(doc: &Html, headings: &[String]) -> String {
    let mut parts: Vec<String> = headings.to_vec();

    if let Some(meta) = doc.select(&META_DESCRIPTION).next()
        && let Some(description) = meta.value().attr("content")
        && !description.trim().is_empty()
    {
        parts.push(description.trim().to_string());
    }

    for bold in doc.select(&BOLD) {
        let text = element_text(bold);
        if !text.is_empty() && text.len() < SPARSE_BOLD_CAP {
            parts.push(text);
        }
    }

    parts.join(" . ")
}

/// Builds embedding chunks: one for the title plus first paragraph, then one
/// per h1-h4 heading accumulating sibling block content until the next
/// heading or the character budget.
fn chunk_page(doc: &Html, title: &str) -> Vec<String> {
    let mut chunks = Vec::new();

    let first_paragraph = doc
        .select(&PARAGRAPH)
        .next()
        .map(element_text)
        .unwrap_or_default();
    let excerpt: String = first_paragraph.chars().take(FIRST_PARAGRAPH_CAP).collect();
    if !title.is_empty() || !excerpt.is_empty() {
        chunks.push(format!("{title}. {excerpt}").trim().to_string());
    }

    for heading in doc.select(&HEADINGS_CHUNK) {
        let heading_text = element_text(heading);
        if heading_text.is_empty() {
            continue;
        }
        let parts = accumulate_section(heading, &heading_text);
        // A heading whose only content is a short lone fragment is decoration.
        if parts.len() > 1 || parts[0].len() > NOISE_FRAGMENT_LEN {
            let text = format!("[{title}] {}", parts.join(". "));
            chunks.push(text.chars().take(CHUNK_CEILING).collect());
        }
    }

    chunks
}

fn accumulate_section(heading: ElementRef<'_>, heading_text: &str) -> Vec<String> {
    let mut parts = vec![heading_text.to_string()];
    let mut budget = heading_text.len();

    for node in heading.next_siblings() {
        let Some(el) = ElementRef::wrap(node) else {
            continue;
        };
        let tag = el.value().name();
        if matches!(tag, "h1" | "h2" | "h3" | "h4") || budget >= CHUNK_BUDGET {
            break;
        }
        match tag {
            "p" | "li" | "div" => {
                let text = element_text(el);
                if text.len() > 10 {
                    budget += text.len();
                    parts.push(text);
                }
            }
            "ul" | "ol" => {
                for item in el.select(&LIST_ITEM) {
                    let text = element_text(item);
                    if text.len() > 5 {
                        budget += text.len();
                        parts.push(format!("\u{2022} {text}"));
                    }
                }
            }
            "table" => {
                for header in el.select(&TABLE_HEADER) {
                    let text = element_text(header);
                    if !text.is_empty() {
                        budget += text.len();
                        parts.push(text);
                    }
                }
            }
            _ => {}
        }
    }

    parts
}

/// Whitespace-normalized text content of an element.
pub(crate) fn element_text(el: ElementRef<'_>) -> String {
    let raw: String = el.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
