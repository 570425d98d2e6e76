/// Logging helpers
///
/// Subscriber setup plus the banner-style lines printed around a run.
use crate::config::Config;
use crate::orchestrator::RunSummary;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Installs the fmt subscriber. `RUST_LOG` overrides the default `info`.
///
/// Safe to call more than once; later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Startup banner
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 mercadopublico scraper starting");
    info!("📊 max concurrent: {}", config.max_concurrent);
    info!("⏱️ delay between requests: {:.1}-{:.1}s", config.delay_min, config.delay_max);
    match &config.codes {
        Some(codes) => info!("📋 explicit codes: {}", codes.len()),
        None => info!("📋 batch size: {}", config.batch_size),
    }
    if config.dry_run {
        info!("🧪 DRY RUN - nothing will be uploaded or recorded");
    }
    info!("{}", "=".repeat(60));
}

pub fn log_claimed(claimed: usize, max_concurrent: usize) {
    info!("✓ claimed {} code(s)", claimed);
    info!("📦 processing with up to {} in parallel\n", max_concurrent);
}

pub fn log_progress(done: usize, total: usize, summary: &RunSummary) {
    info!("\n{}", "─".repeat(60));
    info!(
        "📈 progress {}/{} - success {}, partial {}, failed {}",
        done, total, summary.success, summary.partial, summary.failed
    );
    info!("{}", "─".repeat(60));
}

/// Final summary of a run
pub fn print_final_stats(summary: &RunSummary, dry_run: bool) {
    info!("\n{}", "=".repeat(60));
    info!("📊 run finished{}", if dry_run { " (dry run)" } else { "" });
    info!(
        "finished at: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ success: {}/{}", summary.success, summary.claimed);
    info!("⚠️ partial: {}", summary.partial);
    info!("❌ failed: {}", summary.failed);
    if summary.parse_errors > 0 {
        info!("🧩 portal layout mismatches: {}", summary.parse_errors);
    }
    info!(
        "📁 files: {} ({})",
        summary.files_uploaded,
        human_bytes(summary.total_bytes)
    );
    if summary.bookkeeping_failures > 0 {
        info!("🗂️ status writes that failed: {}", summary.bookkeeping_failures);
    }
    info!("{}", "=".repeat(60));
}

/// Shortens long text for log lines.
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

pub fn human_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}
