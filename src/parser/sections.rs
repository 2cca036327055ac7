use std::sync::LazyLock;

use scraper::{ElementRef, Html, Selector};

static HEADINGS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h2, h3").unwrap());

/// Heading levels that open and close a labeled section.
const SECTION_HEADINGS: &[&str] = &["h2", "h3"];

/// Text of the siblings following the h2/h3 whose text is exactly `label`,
/// up to the next h2/h3. Each sibling's whitespace is collapsed; siblings are
/// joined with newlines. `None` when the heading is missing or the section is empty.
pub fn extract_section(doc: &Html, label: &str) -> Option<String> {
    let heading = doc.select(&HEADINGS).find(|h| stripped_text(h) == label)?;

    let texts: Vec<String> = heading
        .next_siblings()
        .filter_map(ElementRef::wrap)
        .take_while(|el| !is_section_heading(el))
        .map(|el| collapsed_text(&el))
        .filter(|t| !t.is_empty())
        .collect();

    let joined = texts.join("\n");
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn is_section_heading(el: &ElementRef) -> bool {
    SECTION_HEADINGS.contains(&el.value().name())
}

/// Every text node trimmed and glued together, e.g. `<h2> Livello </h2>` → "Livello".
pub(crate) fn stripped_text(el: &ElementRef) -> String {
    el.text().map(str::trim).collect()
}

/// Text nodes joined by spaces with runs of whitespace collapsed.
pub(crate) fn collapsed_text(el: &ElementRef) -> String {
    el.text()
        .collect::<Vec<_>>()
        .join(" ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Tests ──
