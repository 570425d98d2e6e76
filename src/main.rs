use anyhow::{Context, Result};
use clap::Parser;
use mercadopublico_scraper::config::parse_codes;
use mercadopublico_scraper::utils::logging;
use mercadopublico_scraper::{App, Config};

/// Scrapes purchase-order PDFs from mercadopublico.cl into R2 and tracks them in D1
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Comma separated codes to scrape instead of the pending batch
    #[arg(long, alias = "test-ids", value_name = "CODES")]
    codes: Option<String>,

    /// Fetch and classify, but upload and record nothing
    #[arg(long)]
    dry_run: bool,

    /// Maximum number of pending codes to claim
    #[arg(long, value_name = "N")]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    logging::init();

    // `--dry-run` has to be visible while the environment is read, R2
    // credentials are only optional in dry-run mode.
    let _ = dotenvy::dotenv();
    let config = Config::from_lookup(|name| {
        if name == "DRY_RUN" && args.dry_run {
            return Some("true".to_string());
        }
        std::env::var(name).ok()
    })
    .and_then(|config| {
        config.with_overrides(
            args.codes.as_deref().and_then(parse_codes),
            args.dry_run,
            args.batch_size,
        )
    })
    .context("invalid configuration")?;

    let app = App::initialize(config).await?;
    app.run().await?;

    Ok(())
}
