use clap::Parser;
use fixtures::{run_server, upstream, FixtureArgs, UpstreamState};

/// Nintendo Account, attestation and Coral fixture server
#[derive(Parser, Debug)]
#[clap(name = "upstream-fixture")]
struct Cli {
    #[clap(flatten)]
    common: FixtureArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let app = upstream::router(UpstreamState::default());

    run_server(args.common, app).await
}
