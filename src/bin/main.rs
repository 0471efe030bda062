use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cinetrend")]
#[command(about = "Movie discovery with trending searches", long_about = None)]
struct Args {
    #[arg(short, long, default_value = "cinetrend.yaml")]
    config: String,

    #[arg(short, long)]
    debug: bool,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Type queries line by line (default)
    Interactive,
    /// Run a single search and print the results
    Search { query: String },
    /// Show the most searched terms
    Trending {
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Remove search terms not seen for a number of days
    Purge {
        #[arg(long, default_value_t = 30)]
        days: u32,
    },
}

fn init_logging(debug: bool, json: bool) {
    let default_filter = if debug {
        "cinetrend_rs=debug,cinetrend=debug"
    } else {
        "cinetrend_rs=info,cinetrend=info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.debug, args.json_logs);

    let config = match cinetrend_rs::config::Config::load(&args.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    let mut stdout = std::io::stdout();
    let result = match args.command.unwrap_or(Command::Interactive) {
        Command::Interactive => cinetrend_rs::run_interactive(config).await,
        Command::Search { query } => cinetrend_rs::run_search(config, &query, &mut stdout).await,
        Command::Trending { limit } => cinetrend_rs::run_trending(config, limit, &mut stdout).await,
        Command::Purge { days } => cinetrend_rs::run_purge(config, days).await.map(|removed| {
            println!("Removed {} search terms", removed);
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
