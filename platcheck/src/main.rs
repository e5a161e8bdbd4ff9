use anyhow::Result;
use clap::Parser;
use platcheck::{Cli, Commands};
use tracing_log::AsTrace;
use tracing_subscriber::FmtSubscriber;

#[cfg(not(tarpaulin_include))]
#[tokio::main]
async fn main() -> Result<()> {
  let cli = Cli::parse();
  let subscriber = FmtSubscriber::builder()
    .with_max_level(cli.verbose.log_level_filter().as_trace())
    .without_time()
    .with_ansi(!cli.no_color)
    .with_writer(std::io::stderr)
    .finish();
  tracing::subscriber::set_global_default(subscriber).expect("Setting default subscriber failed");

  match &cli.command {
    Commands::Run(run) => run.run().await,
    Commands::List(list) => list.list().await,
    Commands::NodeInfo(nodes) => nodes.node_info().await,
    Commands::DefaultConfig(config) => config.print().await,
  }
}
