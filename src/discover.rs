use std::collections::BTreeSet;

use scraper::Html;
use tracing::{debug, info};

use crate::fetch::{FetchError, PageSource};
use crate::parser::links::ListingLayout;

/// Walk the listing root and its `/page/<n>/` continuations and return every
/// detail URL found, sorted and de-duplicated.
///
/// The page count comes from the pagination anchors on the root page alone.
/// Any failed fetch aborts discovery; nothing partial is returned.
pub fn discover_links(
    source: &impl PageSource,
    layout: &ListingLayout,
) -> Result<Vec<String>, FetchError> {
    info!("Fetching listing root: {}", layout.root());
    let html = source.fetch(layout.root())?;

    let (first, max_page) = {
        let doc = Html::parse_document(&html);
        (layout.detail_links(&doc), layout.max_page(&doc))
    };
    debug!("Page 1: {} detail links, max page {}", first.len(), max_page);

    let mut links: BTreeSet<String> = first.into_iter().collect();

    for page in 2..=max_page {
        let url = layout.page_url(page);
        let html = source.fetch(&url)?;
        let found = layout.detail_links(&Html::parse_document(&html));
        debug!("Page {}: {} detail links", page, found.len());
        links.extend(found);
    }

    info!("Discovered {} spell pages across {} listing pages", links.len(), max_page);
    Ok(links.into_iter().collect())
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StaticPages;

    const ROOT: &str = "https://dungeonedraghi.it/compendio/incantesimi/";

    fn listing(slugs: &[&str], pages: &[u32]) -> String {
        let mut html = String::from("<html><body><ul>");
        for slug in slugs {
            html.push_str(&format!(r#"<li><a href="{}{}/">{}</a></li>"#, ROOT, slug, slug));
        }
        html.push_str("</ul><nav>");
        for p in pages {
            html.push_str(&format!(r#"<a href="{}page/{}/">{}</a>"#, ROOT, p, p));
        }
        html.push_str("</nav></body></html>");
        html
    }

    fn url(slug: &str) -> String {
        format!("{}{}/", ROOT, slug)
    }

    #[test]
    fn single_page_without_pagination() {
        let site = StaticPages::default().with(ROOT, listing(&["luce", "allarme"], &[]));
        let links = discover_links(&site, &ListingLayout::new(ROOT).unwrap()).unwrap();
        assert_eq!(links, vec![url("allarme"), url("luce")]);
        assert_eq!(site.requests.borrow().len(), 1);
    }

    #[test]
    fn follows_pagination_up_to_max_page() {
        // Root only links pages 2 and 4; page 3 must still be visited.
        let site = StaticPages::default()
            .with(ROOT, listing(&["luce", "dardo-incantato"], &[2, 4]))
            .with(&format!("{}page/2/", ROOT), listing(&["allarme", "luce"], &[1, 3]))
            .with(&format!("{}page/3/", ROOT), listing(&["palla-di-fuoco"], &[]))
            .with(&format!("{}page/4/", ROOT), listing(&["zona-di-verita", "allarme"], &[]));

        let links = discover_links(&site, &ListingLayout::new(ROOT).unwrap()).unwrap();
        assert_eq!(
            links,
            vec![
                url("allarme"),
                url("dardo-incantato"),
                url("luce"),
                url("palla-di-fuoco"),
                url("zona-di-verita"),
            ]
        );
        assert_eq!(site.requests.borrow().len(), 4);
    }

    #[test]
    fn failed_continuation_page_aborts() {
        let site = StaticPages::default()
            .with(ROOT, listing(&["luce"], &[3]))
            .with(&format!("{}page/2/", ROOT), listing(&["allarme"], &[]));

        let err = discover_links(&site, &ListingLayout::new(ROOT).unwrap()).unwrap_err();
        match err {
            FetchError::Status { url, status } => {
                assert_eq!(status, 404);
                assert!(url.ends_with("/page/3/"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failed_root_aborts() {
        let site = StaticPages::default();
        assert!(discover_links(&site, &ListingLayout::new(ROOT).unwrap()).is_err());
    }
}
