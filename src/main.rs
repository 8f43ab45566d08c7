use clap::Parser;
use chess_analysis_core::config::Policy;
use chess_analysis_core::engine::Pools;
use chess_analysis_core::Investigator;

/// Runs a dual-depth investigation over a single position and prints the
/// resulting claims as JSON. A thin demo of the library, not a server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// FEN of the position to investigate.
    #[arg(long)]
    fen: String,

    /// Path to a policy JSON document. Falls back to built-in defaults.
    #[arg(long)]
    policy: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let policy = match &args.policy {
        Some(path) => Policy::load(std::path::Path::new(path))?,
        None => Policy::default(),
    };

    let pools = Pools::initialize(policy.engine.clone()).await?;
    let investigator = Investigator::new(&pools, &policy);
    let result = investigator.investigate(&args.fen).await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}
