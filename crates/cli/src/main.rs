use clap::Parser;
use edged::{cli::Cli, daemon};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let filter = EnvFilter::builder()
        .with_default_directive(cli.verbosity.tracing_level_filter().into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_level(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    debug!(config = ?cli);

    let config = daemon::load_config(&cli)?;
    if cli.dump_config {
        daemon::dump_config(&config, std::io::stdout().lock())?;
        return Ok(());
    }

    daemon::serve(&cli, config).await?;
    Ok(())
}
