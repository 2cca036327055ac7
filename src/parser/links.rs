use std::sync::LazyLock;

use anyhow::{bail, Result};
use regex::Regex;
use scraper::{Html, Selector};

static ANCHORS: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a[href]").unwrap());
static ROOT_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(https?://[^/?#]+)(/[^?#]*)?$").unwrap());

/// URL shapes of a paginated listing rooted at e.g.
/// `https://dungeonedraghi.it/compendio/incantesimi/`:
/// detail pages are `<root>/<slug>/`, continuation pages `<root>/page/<n>/`.
#[derive(Debug, Clone)]
pub struct ListingLayout {
    root: String,
    page_marker: String,
    detail_re: Regex,
    page_re: Regex,
}

impl ListingLayout {
    pub fn new(root_url: &str) -> Result<Self> {
        let Some(caps) = ROOT_RE.captures(root_url.trim()) else {
            bail!("Listing root must be an absolute http(s) URL without query: {}", root_url);
        };
        let mut path = caps.get(2).map_or("/", |m| m.as_str()).to_string();
        if !path.ends_with('/') {
            path.push('/');
        }
        let page_marker = format!("{}page/", path);

        Ok(Self {
            root: format!("{}{}", &caps[1], path),
            detail_re: Regex::new(&format!(r"^https?://[^/]+{}[^/?#]+/?$", regex::escape(&path)))?,
            page_re: Regex::new(&format!(r"{}(\d+)/?", regex::escape(&page_marker)))?,
            page_marker,
        })
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    /// URL of listing page `n` (n >= 2).
    pub fn page_url(&self, n: u32) -> String {
        format!("{}/page/{}/", self.root.trim_end_matches('/'), n)
    }

    pub fn is_detail_link(&self, href: &str) -> bool {
        if href.contains('?') || href.contains('#') {
            return false;
        }
        if href.contains(&self.page_marker) {
            return false;
        }
        if href.trim_end_matches('/') == self.root.trim_end_matches('/') {
            return false;
        }
        self.detail_re.is_match(href)
    }

    pub fn page_number(&self, href: &str) -> Option<u32> {
        self.page_re.captures(href)?.get(1)?.as_str().parse().ok()
    }

    /// Detail links on one listing page, in document order (may repeat).
    pub fn detail_links(&self, doc: &Html) -> Vec<String> {
        hrefs(doc)
            .filter(|href| self.is_detail_link(href))
            .map(str::to_string)
            .collect()
    }

    /// Highest page number any pagination anchor points to; 1 when there are none.
    pub fn max_page(&self, doc: &Html) -> u32 {
        hrefs(doc)
            .filter_map(|href| self.page_number(href))
            .fold(1, u32::max)
    }
}

fn hrefs(doc: &Html) -> impl Iterator<Item = &str> {
    doc.select(&ANCHORS).filter_map(|a| a.value().attr("href"))
}

// ── Tests ──
