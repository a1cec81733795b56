use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rand::Rng;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xpcache::{LeaderboardRow, LeaderboardVariant, TenantId, XpConfig, XpService};

#[derive(Parser)]
#[command(name = "xpcache")]
#[command(about = "Write-behind XP aggregation with live leaderboards")]
struct Cli {
    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed synthetic increments through a running sync worker and print the live board
    Simulate {
        #[arg(long, default_value = "demo")]
        tenant: String,
        #[arg(long, default_value_t = 50)]
        entities: usize,
        #[arg(long, default_value_t = 5_000)]
        increments: usize,
        #[arg(long, default_value_t = 200)]
        sync_interval_ms: u64,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value = "lifetime")]
        variant: LeaderboardVariant,
        #[arg(long)]
        seed: Option<u64>,
        /// Persist the durable store here
        #[arg(long)]
        data_dir: Option<PathBuf>,
    },
    /// Print the durable leaderboard stored in a data directory
    Top {
        #[arg(long)]
        data_dir: PathBuf,
        #[arg(long)]
        tenant: String,
        #[arg(long, default_value = "lifetime")]
        variant: LeaderboardVariant,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long, default_value_t = 0)]
        skip: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let rows = match cli.command {
        Command::Simulate {
            tenant,
            entities,
            increments,
            sync_interval_ms,
            limit,
            variant,
            seed,
            data_dir,
        } => {
            let mut config = XpConfig::from_env()
                .context("failed to load configuration")?
                .sync_interval(Duration::from_millis(sync_interval_ms));
            if let Some(dir) = data_dir {
                config = config.data_dir(dir);
            }
            simulate(
                config,
                TenantId::from(tenant),
                entities,
                increments,
                limit,
                variant,
                seed,
            )
            .await?
        }
        Command::Top {
            data_dir,
            tenant,
            variant,
            limit,
            skip,
        } => {
            let config = XpConfig::from_env()
                .context("failed to load configuration")?
                .data_dir(&data_dir);
            let service = XpService::open(config)
                .await
                .with_context(|| format!("failed to open {}", data_dir.display()))?;
            service
                .get_live_top(&TenantId::from(tenant), variant, limit, Some(skip))
                .await
                .context("failed to read leaderboard")?
        }
    };

    print_rows(&rows, cli.json)
}

async fn simulate(
    config: XpConfig,
    tenant: TenantId,
    entities: usize,
    increments: usize,
    limit: usize,
    variant: LeaderboardVariant,
    seed: Option<u64>,
) -> Result<Vec<LeaderboardRow>> {
    let service = XpService::open(config).await.context("failed to open service")?;
    let worker = service.spawn_sync_worker();
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let entities = entities.max(1);
    let mut total: i64 = 0;
    for i in 0..increments {
        let entity = format!("user-{}", rng.gen_range(0..entities));
        let delta = rng.gen_range(1..=25);
        service.increment_score(&tenant, &entity.into(), delta).await;
        total += delta;
        if i % 500 == 0 {
            tokio::task::yield_now().await;
        }
    }

    let report = worker.stop().await.context("final sync failed")?;
    info!(
        increments,
        total,
        flushed = report.snapshots_flushed,
        retained = report.snapshots_retained,
        "simulation finished"
    );

    service
        .get_live_top(&tenant, variant, limit, None)
        .await
        .context("failed to read leaderboard")
}

fn print_rows(rows: &[LeaderboardRow], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }

    if rows.is_empty() {
        println!("no data yet");
        return Ok(());
    }

    println!("{:>5}  {:<20} {:>10} {:>10} {:>12}", "rank", "entity", "daily", "weekly", "lifetime");
    for row in rows {
        println!(
            "{:>5}  {:<20} {:>10} {:>10} {:>12}",
            row.rank,
            row.entity_id.as_str(),
            row.daily_score,
            row.weekly_score,
            row.lifetime_score
        );
    }
    Ok(())
}
