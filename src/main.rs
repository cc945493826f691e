use clap::Parser;
use flowquery::config::EngineConfig;
use flowquery::http::UnconfiguredFetcher;
use flowquery::value::Value;
use flowquery::Engine;

/// FlowQuery - a declarative, Cypher-inspired query language for streaming
/// record pipelines.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Query text. Mutually exclusive with --file.
    query: Option<String>,

    /// Read the query from a file instead of the command line.
    #[arg(long)]
    file: Option<std::path::PathBuf>,

    /// Pretty-print the JSON result array.
    #[arg(long)]
    pretty: bool,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let query = match (cli.query, cli.file) {
        (Some(q), None) => q,
        (None, Some(path)) => match std::fs::read_to_string(&path) {
            Ok(q) => q,
            Err(e) => {
                eprintln!("Failed to read {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        (None, None) => {
            eprintln!("Usage: flowquery <QUERY> | flowquery --file <PATH>");
            std::process::exit(1);
        }
        (Some(_), Some(_)) => {
            eprintln!("Pass either a query argument or --file, not both");
            std::process::exit(1);
        }
    };

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    let engine = Engine::new(config);

    match engine.run(&query, &UnconfiguredFetcher).await {
        Ok(rows) => {
            let json: Vec<serde_json::Value> = rows
                .into_iter()
                .map(|row| serde_json::Value::from(Value::Map(row.into_iter().collect())))
                .collect();
            let text = if cli.pretty {
                serde_json::to_string_pretty(&json)
            } else {
                serde_json::to_string(&json)
            };
            println!("{}", text.expect("Value -> JSON conversion cannot fail"));
        }
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    }
}
