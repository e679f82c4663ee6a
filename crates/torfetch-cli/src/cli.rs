use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use torfetch_core::config;
use torfetch_core::driver::QueueDriver;
use torfetch_core::fetch::TorFetcher;
use torfetch_core::work_db::{ClaimFilter, WorkDb};

/// One torfetch worker: bound to a single egress route, it claims pending
/// rows from the shared work table, fetches them through that route, and
/// records outcomes. Runs until externally stopped.
#[derive(Debug, Parser)]
#[command(name = "torfetch")]
#[command(about = "crash-resumable bulk fetch worker over anonymized egress routes", long_about = None)]
pub struct Cli {
    /// Egress route for this worker: the SOCKS port it fetches through.
    /// Not needed for `--status`.
    #[arg(required_unless_present = "status")]
    pub route: Option<u16>,

    /// Re-attempt rows that previously failed with exactly this HTTP status
    /// (0 = claim only never-attempted rows).
    #[arg(long, default_value_t = 0)]
    pub retry_code: u16,

    /// Comma-separated file extensions to skip (e.g. "iso,zip").
    #[arg(long, value_delimiter = ',')]
    pub exclude_ext: Vec<String>,

    /// Claim across all routes instead of only this worker's route
    /// (administrative/backfill mode; duplicate work with other workers is
    /// possible but harmless).
    #[arg(long)]
    pub all_routes: bool,

    /// Print row counts grouped by response code and exit.
    #[arg(long)]
    pub status: bool,

    /// Config file path (default: XDG config dir, created on first run).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Cli {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();

        let cfg = match &cli.config {
            Some(path) => config::load_from(path)?,
            None => config::load_or_init()?,
        };
        tracing::debug!("loaded config: {:?}", cfg);

        let db = match &cfg.db_path {
            Some(path) => WorkDb::open_at(path).await?,
            None => WorkDb::open_default().await?,
        };

        if cli.status {
            for (code, count) in db.status_summary().await? {
                match code {
                    Some(code) => println!("{:>6}  {}", code, count),
                    None => println!(" never  {}", count),
                }
            }
            return Ok(());
        }

        let route = cli
            .route
            .ok_or_else(|| anyhow::anyhow!("route is required unless --status is given"))?;

        let filter = ClaimFilter {
            route,
            all_routes: cli.all_routes,
            retry_code: match cli.retry_code {
                0 => None,
                code => Some(code),
            },
            exclude_ext: cli
                .exclude_ext
                .iter()
                .map(|e| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
            exclude_ids: Vec::new(),
        };

        let fetcher = TorFetcher::new(route, cfg.egress.clone());
        let driver = QueueDriver::new(
            db,
            fetcher,
            cfg.data_dir.clone(),
            cfg.base_url.clone(),
            filter,
            cfg.fetch_timeout(),
            cfg.idle_delay(),
        );

        tracing::info!(
            route,
            all_routes = cli.all_routes,
            retry_code = cli.retry_code,
            "worker starting"
        );
        driver.run(None).await
    }
}
