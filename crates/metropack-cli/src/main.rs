use std::thread::available_parallelism;

use anyhow::Result;
use clap::Parser;
use metropack_cli::arguments::Arguments;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Arguments::parse();

    let mut rt = tokio::runtime::Builder::new_multi_thread();
    rt.enable_all()
        .worker_threads(available_parallelism().map(|n| n.get()).unwrap_or(1));
    rt.build()?.block_on(main_inner(args))
}

async fn main_inner(args: Arguments) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("METROPACK_LOG")
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    match args {
        Arguments::Build(args) => metropack_cli::build::build(&args).await,
        Arguments::Dev(args) => metropack_cli::dev::start_server(&args).await,
    }
}
