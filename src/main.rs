use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

mod catalog;
mod config;
mod error;
mod feed;
mod ingest;
mod metrics;
mod models;
mod search;
mod store;

use catalog::SiteCatalog;
use config::Config;
use feed::HttpFeedFetcher;
use ingest::Coordinator;
use metrics::{LogMetrics, MetricSink};
use search::{OrderBy, SearchIndex, SearchParams};
use store::SqliteNewsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = Config::load()?;

    let catalog = Arc::new(SiteCatalog::load()?);
    let store = Arc::new(SqliteNewsStore::open(&config.db_path).await?);
    let (search, index_created) = SearchIndex::open_or_create(Path::new(&config.index_path))?;
    let metrics: Arc<dyn MetricSink> = Arc::new(LogMetrics);
    let fetcher = Arc::new(HttpFeedFetcher::new(
        config.user_agents.clone(),
        metrics.clone(),
    ));
    let coordinator = Coordinator::new(catalog, store, fetcher, search.clone(), metrics);

    coordinator.initialise(index_created).await?;

    // Ctrl-C aborts in-flight fetches; committed inserts stay.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested, cancelling in-flight work");
                cancel.cancel();
            }
        });
    }

    match args.get(1).map(String::as_str) {
        Some("--ingest") | None => {
            let reconcile = coordinator.ingest_once(&cancel).await?;
            reconcile.await?;
        }
        Some("--reconcile") => {
            let max_look_back = args
                .get(2)
                .and_then(|days| days.parse::<i64>().ok())
                .map(|days| Utc::now() - chrono::Duration::days(days));
            coordinator.reconcile(max_look_back).await?;
        }
        Some("--search") => {
            let query = args.get(2).cloned().unwrap_or_default();
            let search_content = args.iter().any(|a| a == "--content");
            let order_by = args
                .iter()
                .position(|a| a == "--order")
                .and_then(|i| args.get(i + 1))
                .map(|s| s.parse::<OrderBy>())
                .transpose()?
                .unwrap_or_default();
            let results = coordinator
                .search_items(SearchParams {
                    query: query.clone(),
                    limit: 20,
                    order_by,
                    search_content,
                    ..SearchParams::default()
                })
                .await?;
            for item in &results {
                println!(
                    "{}  {}  {}",
                    item.published.format("%Y-%m-%d %H:%M"),
                    item.site_name,
                    item.title
                );
            }
            for (site_name, count) in coordinator.site_count_for_query(&query, search_content).await? {
                println!("{site_name}: {count}");
            }
        }
        Some("--sites") => {
            let counts: std::collections::HashMap<i64, i64> = coordinator
                .article_counts()
                .await?
                .into_iter()
                .map(|c| (c.site_id, c.article_count))
                .collect();
            for site in coordinator.site_infos() {
                println!(
                    "{:>3}  {:<20} {:>8}  {}",
                    site.id,
                    site.name,
                    counts.get(&site.id).copied().unwrap_or(0),
                    site.description
                );
            }
        }
        Some("--titles") => {
            let site = args
                .get(2)
                .ok_or_else(|| anyhow::anyhow!("--titles requires a site id or name"))?;
            let site = site
                .parse::<i64>()
                .ok()
                .and_then(|id| coordinator.site_by_id(id))
                .or_else(|| coordinator.site_by_name(site))
                .ok_or_else(|| anyhow::anyhow!("no site matching {site:?}"))?;
            let shuffle = args.iter().any(|a| a == "--shuffle");
            for title in coordinator.recent_titles(site.id, 20, shuffle).await? {
                println!("{title}");
            }
        }
        Some("--recent") => {
            let site_id: i64 = args
                .get(2)
                .and_then(|id| id.parse().ok())
                .ok_or_else(|| anyhow::anyhow!("--recent requires a numeric site id"))?;
            for item in coordinator.recent_items(site_id, 20, None).await? {
                println!(
                    "{}  {}  {}",
                    item.inserted_at.format("%Y-%m-%d %H:%M"),
                    item.title,
                    item.link
                );
            }
        }
        Some(other) => {
            eprintln!("unknown argument: {other}");
            eprintln!(
                "usage: nyhedsstrom [--ingest | --reconcile [days] | --search <query> [--content] [--order <±published|±_score>] | --sites | --titles <site> [--shuffle] | --recent <site-id>]"
            );
            std::process::exit(2);
        }
    }

    search.close().await?;
    Ok(())
}
