mod api;
mod db;
mod discover;
mod fetch;
mod ingest;
mod normalize;
mod parser;
mod server;
mod settings;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::error;

use crate::fetch::HttpFetcher;
use crate::parser::links::ListingLayout;
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "spell_catalog", about = "Local spell catalog scraped from dungeonedraghi.it")]
struct Cli {
    /// SQLite database path (overrides SPELLS_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,
    /// Listing root URL (overrides SPELLS_BASE_URL)
    #[arg(long, global = true)]
    base_url: Option<String>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or migrate the database
    Init,
    /// Discover, parse and upsert every spell page
    Ingest,
    /// List the spell pages reachable from the listing root
    Discover,
    /// Fetch one spell page and print the normalized record as JSON
    Parse { url: String },
    /// Serve the JSON API
    Serve {
        /// Address to bind (overrides SPELLS_BIND)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Stored spells as a table
    List(ListArgs),
    /// Catalog counters
    Stats,
}

#[derive(Args)]
struct ListArgs {
    /// Substring of the spell name
    #[arg(short = 'q', long)]
    name: Option<String>,
    #[arg(short, long)]
    level: Option<i64>,
    /// Substring of the class list (case-insensitive)
    #[arg(short, long)]
    class: Option<String>,
    /// Substring of the school (case-insensitive)
    #[arg(short, long)]
    school: Option<String>,
    #[arg(long)]
    ritual: Option<bool>,
    #[arg(long)]
    concentration: Option<bool>,
    /// Component letter: V, S or M
    #[arg(long)]
    component: Option<String>,
    /// Max rows to display
    #[arg(short = 'n', long, default_value = "50")]
    limit: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();

    let mut settings = Settings::load()?;
    if let Some(db) = cli.db {
        settings.db_path = db;
    }
    if let Some(url) = cli.base_url {
        settings.base_url = url;
    }

    let result = match cli.command {
        Commands::Init => {
            db::connect(&settings.db_path)?;
            println!("Database ready: {:?}", settings.db_path);
            Ok(())
        }
        Commands::Ingest => {
            let conn = db::connect(&settings.db_path)?;
            let layout = ListingLayout::new(&settings.base_url)?;
            let fetcher = HttpFetcher::new(&settings)?;
            println!("Ingesting spells from {}", layout.root());
            match ingest::run(&conn, &fetcher, &layout, settings.batch_size) {
                Ok(report) => {
                    println!(
                        "Discovered {} spell pages, wrote {} records in {} batches.",
                        report.discovered, report.written, report.batches
                    );
                    Ok(())
                }
                Err(e) => {
                    error!("Ingestion failed: {}", e);
                    println!("Ingestion failed; {} records committed before the error.", e.committed());
                    Err(e.into())
                }
            }
        }
        Commands::Discover => {
            let layout = ListingLayout::new(&settings.base_url)?;
            let fetcher = HttpFetcher::new(&settings)?;
            let links = discover::discover_links(&fetcher, &layout)?;
            for link in &links {
                println!("{}", link);
            }
            println!("\n{} spell pages", links.len());
            Ok(())
        }
        Commands::Parse { url } => {
            let fetcher = HttpFetcher::new(&settings)?;
            let raw = parser::spell::fetch_spell(&fetcher, &url)?;
            let record = normalize::normalize(raw);
            println!("{}", serde_json::to_string_pretty(&record)?);
            Ok(())
        }
        Commands::Serve { bind } => {
            db::connect(&settings.db_path)?;
            let bind = bind.unwrap_or(settings.bind);
            let db_path = settings.db_path;
            tokio::runtime::Runtime::new()?.block_on(async move {
                let listener = tokio::net::TcpListener::bind(&bind)
                    .await
                    .with_context(|| format!("Failed to bind {}", bind))?;
                server::serve(listener, db_path).await
            })
        }
        Commands::List(args) => list(&settings, args),
        Commands::Stats => {
            let conn = db::connect(&settings.db_path)?;
            let s = db::get_stats(&conn)?;
            println!("Spells:        {}", s.spells);
            println!("Rituals:       {}", s.rituals);
            println!("Concentration: {}", s.concentration);
            println!("Known:         {}", s.known);
            println!("Prepared:      {}", s.prepared);
            println!("Favorite:      {}", s.favorite);
            Ok(())
        }
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

fn list(settings: &Settings, args: ListArgs) -> anyhow::Result<()> {
    let conn = db::connect(&settings.db_path)?;
    let component = match args.component.as_deref() {
        Some(raw) => Some(
            db::SpellFilter::component_letter(raw)
                .with_context(|| format!("Unknown component {:?}, expected V, S or M", raw))?,
        ),
        None => None,
    };
    let filter = db::SpellFilter {
        name: args.name,
        level: args.level,
        class: args.class,
        school: args.school,
        ritual: args.ritual,
        concentration: args.concentration,
        component,
    };
    let rows = db::query_spells(&conn, &filter)?;
    if rows.is_empty() {
        println!("No spells found. Run 'ingest' first or relax the filters.");
        return Ok(());
    }

    println!(
        "{:>4} | {:<28} | {:>3} | {:<14} | {:<3} | {:<10} | {:<24} | {}",
        "id", "Spell", "Lvl", "School", "R/C", "Comp", "Classes", "K P F"
    );
    println!("{}", "-".repeat(110));

    for r in rows.iter().take(args.limit) {
        let rc = format!(
            "{}{}",
            if r.ritual { "R" } else { "-" },
            if r.concentration { "C" } else { "-" }
        );
        let comp = r
            .components
            .as_deref()
            .map(|c| c.split('(').next().unwrap_or(c).trim().to_string())
            .unwrap_or_default();
        let flags = [r.known, r.prepared, r.favorite]
            .iter()
            .map(|f| if *f { "x" } else { "." })
            .collect::<Vec<_>>()
            .join(" ");

        println!(
            "{:>4} | {:<28} | {:>3} | {:<14} | {:<3} | {:<10} | {:<24} | {}",
            r.id,
            truncate(&r.name, 28),
            r.level,
            truncate(r.school.as_deref().unwrap_or("-"), 14),
            rc,
            truncate(&comp, 10),
            truncate(r.classes.as_deref().unwrap_or("-"), 24),
            flags,
        );
    }

    if rows.len() > args.limit {
        println!("\n{} of {} spells shown (use -n to see more)", args.limit, rows.len());
    } else {
        println!("\n{} spells", rows.len());
    }
    Ok(())
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncates_on_char_boundaries() {
        assert_eq!(truncate("Sì", 5), "Sì");
        assert_eq!(truncate("Ai Livelli Superiori", 6), "Ai Liv...");
    }

    #[test]
    fn durations() {
        assert_eq!(format_duration(std::time::Duration::from_secs(75)), "1m 15s");
        assert_eq!(format_duration(std::time::Duration::from_secs(3725)), "1h 2m 5s");
    }
}
