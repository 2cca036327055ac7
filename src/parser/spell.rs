use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};

use super::sections::{extract_section, stripped_text};
use crate::fetch::{FetchError, PageSource};

/// Provenance stamped on every record.
pub const SOURCE: &str = "dungeonedraghi.it";

static TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("h1").unwrap());
static DIGITS_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());

/// Fields pulled from one detail page, before normalization.
/// Flags are still free text ("Sì", "No", ...).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawSpell {
    pub url: String,
    pub name: String,
    pub level: i64,
    pub school: Option<String>,
    pub ritual: Option<String>,
    pub casting_time: Option<String>,
    pub range: Option<String>,
    pub components: Option<String>,
    pub duration: Option<String>,
    pub classes: Option<String>,
    pub description: Option<String>,
    pub higher_level: Option<String>,
    pub concentration: Option<String>,
    pub source: String,
}

/// Fetch and parse one detail page. Fetch errors propagate untouched.
pub fn fetch_spell(source: &impl PageSource, url: &str) -> Result<RawSpell, FetchError> {
    let html = source.fetch(url)?;
    Ok(parse_spell(&html, url))
}

pub fn parse_spell(html: &str, url: &str) -> RawSpell {
    let doc = Html::parse_document(html);
    let section = |label: &str| extract_section(&doc, label);

    let name = doc
        .select(&TITLE)
        .next()
        .map(|h1| stripped_text(&h1))
        .unwrap_or_default();

    RawSpell {
        url: url.to_string(),
        name,
        level: parse_level(section("Livello").as_deref()),
        school: section("Scuola di Magia"),
        ritual: section("Rituale"),
        casting_time: section("Tempo di Lancio"),
        range: section("Gittata"),
        components: section("Componenti"),
        duration: section("Durata"),
        classes: section("Classe").or_else(|| section("Classi")),
        description: section("Effetto"),
        higher_level: section("Ai Livelli Superiori"),
        concentration: section("Concentrazione"),
        source: SOURCE.to_string(),
    }
}

/// First run of digits in the level text; 0 when there is none.
pub fn parse_level(text: Option<&str>) -> i64 {
    text.and_then(|t| DIGITS_RE.find(t))
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

// ── Tests ──
