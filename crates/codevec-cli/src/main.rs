//! codevec CLI - Load, list and search code chunks
//!
//! Usage:
//!   codevec load [PATH]
//!   codevec dump
//!   codevec query [--type semantic|metadata|document|all]

use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use codevec_cli::render::write_error;
use codevec_cli::{dump_collection, load_file, run_queries, Loader, QueryMode};
use codevec_core::{AppConfig, CodevecError, LoggingConfig};
use codevec_vector::{create_embedding_client, ChromaStore};

#[derive(Parser)]
#[command(name = "codevec")]
#[command(about = "Load, list and search code chunks in a vector database")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Embed and upload chunk records, replacing the collection
    Load {
        /// JSON file of chunk records (defaults to loader.input_path)
        path: Option<PathBuf>,
    },
    /// Print every chunk stored in the collection
    Dump,
    /// Run semantic and filtered searches
    Query {
        /// Which searches to run
        #[arg(long = "type", value_enum, default_value_t = QueryMode::All)]
        query_type: QueryMode,
    },
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "warn,codevec={0},codevec_cli={0},codevec_vector={0},codevec_core={0}",
            logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(command: Commands, config: &AppConfig) -> anyhow::Result<()> {
    let store = ChromaStore::new(&config.database)?;
    let mut out = std::io::stdout().lock();

    match command {
        Commands::Load { path } => {
            let path = path.unwrap_or_else(|| config.loader.input_path.clone());
            let embedder = create_embedding_client(&config.embedding)?;
            let loader = Loader::new(&store, embedder.as_ref(), &config.loader)
                .with_distance(config.database.distance);
            load_file(&path, &loader, &mut out)
                .await
                .with_context(|| format!("Loading {} failed", path.display()))?;
        }
        Commands::Dump => {
            dump_collection(&store, config.dump.page_size, &mut out).await?;
        }
        Commands::Query { query_type } => {
            let embedder = create_embedding_client(&config.embedding)?;
            run_queries(
                &store,
                embedder.as_ref(),
                &config.query,
                config.database.distance,
                query_type,
                &mut out,
            )
            .await?;
        }
    }

    out.flush()?;
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match AppConfig::load(cli.config) {
        Ok(config) => config,
        Err(e) => {
            let err = anyhow::Error::new(CodevecError::from(e));
            let _ = write_error(&mut std::io::stderr(), &err, "");
            return ExitCode::FAILURE;
        }
    };

    init_tracing(&config.logging);

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let _ = write_error(&mut std::io::stderr(), &e, &config.database.base_url());
            ExitCode::FAILURE
        }
    }
}
