mod configuration;
mod distribution;
mod run;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use configuration::BenchArgs;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = BenchArgs::parse();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&args.log_level))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let bench_desc = args.into_description()?;
    run::run(bench_desc).await
}
