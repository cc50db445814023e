use clap::Parser;
use stream_recorder_lib::config::Cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    stream_recorder_lib::run(Cli::parse()).await
}
