use indicatif::{ProgressBar, ProgressStyle};
use rusqlite::Connection;
use thiserror::Error;
use tracing::{debug, info};

use crate::db;
use crate::discover::discover_links;
use crate::fetch::{FetchError, PageSource};
use crate::normalize::normalize;
use crate::parser::links::ListingLayout;
use crate::parser::spell::fetch_spell;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("link discovery failed")]
    Discover(#[source] FetchError),
    #[error("failed to fetch {url} ({committed} records committed before failure)")]
    Parse {
        url: String,
        committed: usize,
        #[source]
        source: FetchError,
    },
    #[error("storage error ({committed} records committed before failure)")]
    Storage {
        committed: usize,
        #[source]
        source: rusqlite::Error,
    },
}

impl IngestError {
    /// Records persisted by batches that committed before the failure.
    pub fn committed(&self) -> usize {
        match self {
            IngestError::Discover(_) => 0,
            IngestError::Parse { committed, .. } | IngestError::Storage { committed, .. } => {
                *committed
            }
        }
    }
}

#[derive(Debug)]
pub struct IngestReport {
    pub discovered: usize,
    pub written: usize,
    pub batches: usize,
}

/// Discover every spell page, then parse, normalize and upsert them in
/// discovery order, committing every `batch_size` records.
///
/// Fails fast: the first fetch error stops the run. Batches committed before
/// it stay in the database, the open batch is rolled back.
pub fn run(
    conn: &Connection,
    source: &impl PageSource,
    layout: &ListingLayout,
    batch_size: usize,
) -> Result<IngestReport, IngestError> {
    let links = discover_links(source, layout).map_err(IngestError::Discover)?;

    let pb = ProgressBar::new(links.len() as u64);
    if let Ok(style) = ProgressStyle::with_template(
        "[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})",
    ) {
        pb.set_style(style.progress_chars("=> "));
    }

    let result = write_batches(conn, source, &links, batch_size.max(1), &pb);
    pb.finish_and_clear();

    let (written, batches) = result?;
    info!("Ingested {} spells in {} batches", written, batches);
    Ok(IngestReport {
        discovered: links.len(),
        written,
        batches,
    })
}

fn write_batches(
    conn: &Connection,
    source: &impl PageSource,
    links: &[String],
    batch_size: usize,
    pb: &ProgressBar,
) -> Result<(usize, usize), IngestError> {
    let mut committed = 0;
    let mut batches = 0;

    for chunk in links.chunks(batch_size) {
        let storage = |source| IngestError::Storage { committed, source };

        let tx = conn.unchecked_transaction().map_err(storage)?;
        for url in chunk {
            let raw = fetch_spell(source, url).map_err(|source| IngestError::Parse {
                url: url.clone(),
                committed,
                source,
            })?;
            db::upsert_spell(&tx, &normalize(raw)).map_err(storage)?;
            pb.inc(1);
        }
        tx.commit().map_err(storage)?;

        committed += chunk.len();
        batches += 1;
        debug!("Committed batch {} ({}/{})", batches, committed, links.len());
    }

    Ok((committed, batches))
}

// ── Tests ──
