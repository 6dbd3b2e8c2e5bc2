use analyst_store::{
    AppConfig, MetadataFilter, MetadataValue, ResultRecord, ResultStore, ResultValue, VectorRecord,
    VectorStore,
};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::warn;

// ============================================================================
// CLI Argument Parsing
// ============================================================================

#[derive(Parser)]
#[command(name = "analyst-store", version, about = "Inspect and manage the stock analyst result and vector stores")]
struct Cli {
    /// Output JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    /// Config file (defaults to the platform config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Result store operations
    Results {
        #[command(subcommand)]
        action: ResultsAction,
    },
    /// Vector store operations
    Vectors {
        #[command(subcommand)]
        action: VectorsAction,
    },
    /// Print the effective configuration (secrets redacted)
    Config,
}

#[derive(Subcommand)]
enum ResultsAction {
    /// Store a result. VALUE is parsed as JSON, falling back to plain text
    Put { key: String, value: String },
    /// Show the result stored under KEY
    Get { key: String },
    /// Remove the result stored under KEY
    Delete { key: String },
    /// List stored results
    List {
        /// Only keys starting with this prefix (e.g. "AAPL:")
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Find results whose payload has FIELD equal to VALUE
    Find { field: String, value: String },
    /// Remove every stored result
    Clear,
}

#[derive(Subcommand)]
enum VectorsAction {
    /// Show backend state and counters
    Status,
    /// Insert or overwrite a vector
    Upsert {
        id: String,
        /// Comma-separated embedding values
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        values: Vec<f32>,
        /// Metadata as key=value (repeatable)
        #[arg(long = "meta", value_parser = parse_key_value)]
        metadata: Vec<(String, MetadataValue)>,
    },
    /// Nearest neighbours of an embedding
    Query {
        #[arg(long, value_delimiter = ',', required = true, allow_hyphen_values = true)]
        values: Vec<f32>,
        #[arg(long, default_value = "5")]
        top_k: usize,
        /// Metadata equality filter as key=value (repeatable)
        #[arg(long = "filter", value_parser = parse_key_value)]
        filters: Vec<(String, MetadataValue)>,
    },
    /// Fetch a vector by id
    Fetch { id: String },
    /// Delete a vector by id
    Delete { id: String },
}

fn parse_key_value(raw: &str) -> std::result::Result<(String, MetadataValue), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;

    let value = if let Ok(b) = value.parse::<bool>() {
        MetadataValue::Bool(b)
    } else if let Ok(n) = value.parse::<f64>() {
        MetadataValue::Number(n)
    } else {
        MetadataValue::Text(value.to_string())
    };
    Ok((key.to_string(), value))
}

fn parse_value(raw: &str) -> ResultValue {
    serde_json::from_str::<serde_json::Value>(raw)
        .map(ResultValue::from)
        .unwrap_or_else(|_| ResultValue::Text(raw.to_string()))
}

/// JSON envelope for non-interactive output
fn json_output(success: bool, data: serde_json::Value, error: Option<&str>) -> String {
    serde_json::json!({
        "success": success,
        "data": data,
        "error": error,
    }).to_string()
}

fn record_json(record: &ResultRecord) -> serde_json::Value {
    serde_json::json!({
        "key": record.key,
        "value": serde_json::Value::from(record.value.clone()),
        "created_at": record.created_at.to_rfc3339(),
        "updated_at": record.updated_at.to_rfc3339(),
    })
}

fn print_record(record: &ResultRecord) {
    println!("{}", record.key);
    println!("  Created: {}", record.created_at.to_rfc3339());
    println!("  Updated: {}", record.updated_at.to_rfc3339());
    let value = serde_json::Value::from(record.value.clone());
    println!("  Value: {}", serde_json::to_string_pretty(&value).unwrap_or_default());
}

#[tokio::main]
async fn main() -> Result<()> {
    // Check for --json flag before initializing logging
    let json_mode = std::env::args().any(|arg| arg == "--json");

    // Initialize structured logging
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("analyst_store=info"));

    if json_mode {
        // In JSON mode: send logs to stderr with no ANSI colors
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_ansi(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    } else if std::env::var("ANALYST_LOG_JSON").is_ok() {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load_from(Some(path)),
        None => AppConfig::load(),
    }
    .context("Failed to load configuration")?;

    match cli.command {
        Commands::Results { action } => run_results(action, &config, cli.json),
        Commands::Vectors { action } => run_vectors(action, &config, cli.json).await,
        Commands::Config => {
            let shown = serde_json::to_value(config.redacted())?;
            if cli.json {
                println!("{}", json_output(true, shown, None));
            } else {
                println!("{}", serde_json::to_string_pretty(&shown)?);
            }
            Ok(())
        }
    }
}

// ============================================================================
// Result Store Commands
// ============================================================================

fn run_results(action: ResultsAction, config: &AppConfig, json_mode: bool) -> Result<()> {
    if !config.results.persist {
        warn!("Result persistence is disabled; changes will not outlive this command");
    }

    let store = ResultStore::open(&config.results).with_context(|| {
        format!(
            "Could not open result store at {}",
            config.results.persist_path.display()
        )
    })?;

    match action {
        ResultsAction::Put { key, value } => {
            let record = store.put(key, parse_value(&value))?;
            if json_mode {
                println!("{}", json_output(true, record_json(&record), None));
            } else {
                println!("Stored:");
                print_record(&record);
            }
        }
        ResultsAction::Get { key } => match store.get(&key) {
            Ok(record) => {
                if json_mode {
                    println!("{}", json_output(true, record_json(&record), None));
                } else {
                    print_record(&record);
                }
            }
            Err(e) if e.is_not_found() => {
                if json_mode {
                    println!("{}", json_output(false, serde_json::Value::Null, Some(&e.to_string())));
                } else {
                    println!("No prior result for '{}'", key);
                }
            }
            Err(e) => return Err(e.into()),
        },
        ResultsAction::Delete { key } => {
            let removed = store.delete(&key)?;
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({ "removed": removed.is_some() }), None));
            } else if removed.is_some() {
                println!("Deleted '{}'", key);
            } else {
                println!("Nothing stored under '{}'", key);
            }
        }
        ResultsAction::List { prefix } => {
            let listing = store.list(prefix.as_deref());
            if json_mode {
                let records: Vec<_> = listing.iter().map(record_json).collect();
                println!("{}", json_output(true, serde_json::json!(records), None));
            } else if listing.is_empty() {
                println!("No results stored");
            } else {
                for record in &listing {
                    println!("{}  (updated {})", record.key, record.updated_at.to_rfc3339());
                }
            }
        }
        ResultsAction::Find { field, value } => {
            let matches = store.find_by_field(&field, &parse_value(&value));
            if json_mode {
                let records: Vec<_> = matches.iter().map(record_json).collect();
                println!("{}", json_output(true, serde_json::json!(records), None));
            } else {
                println!("{} match(es)", matches.len());
                for record in &matches {
                    print_record(record);
                }
            }
        }
        ResultsAction::Clear => {
            let count = store.len();
            store.clear()?;
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({ "cleared": count }), None));
            } else {
                println!("Cleared {} result(s)", count);
            }
        }
    }

    Ok(())
}

// ============================================================================
// Vector Store Commands
// ============================================================================

async fn run_vectors(action: VectorsAction, config: &AppConfig, json_mode: bool) -> Result<()> {
    let store = VectorStore::connect(&config.vectors)
        .await
        .context("Could not build vector store")?;

    match action {
        VectorsAction::Status => {
            let stats = store.stats();
            if json_mode {
                println!("{}", json_output(true, serde_json::to_value(&stats)?, None));
            } else {
                println!("Vector store status:");
                println!("  State: {:?}", stats.state);
                println!("  Backend: {}", stats.backend.as_deref().unwrap_or("none"));
                println!("  Fallback engagements: {}", stats.fallback_count);
            }
        }
        VectorsAction::Upsert { id, values, metadata } => {
            let record = VectorRecord {
                id,
                embedding: values,
                metadata: metadata.into_iter().collect(),
            };
            let id = record.id.clone();
            store.upsert(record).await?;
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({ "id": id, "state": store.state() }), None));
            } else {
                println!("Upserted '{}' ({:?})", id, store.state());
            }
        }
        VectorsAction::Query { values, top_k, filters } => {
            let filter = filters
                .into_iter()
                .fold(MetadataFilter::new(), |filter, (k, v)| filter.eq(k, v));
            let filter = (!filter.is_empty()).then_some(filter);
            let hits = store.query(&values, top_k, filter.as_ref()).await?;

            if json_mode {
                println!("{}", json_output(true, serde_json::to_value(&hits)?, None));
            } else if hits.is_empty() {
                println!("No matches");
            } else {
                for hit in &hits {
                    println!("{:.4}  {}", hit.score, hit.record.id);
                }
            }
        }
        VectorsAction::Fetch { id } => {
            let record = store.fetch(&id).await?;
            if json_mode {
                println!("{}", json_output(record.is_some(), serde_json::to_value(&record)?, None));
            } else {
                match record {
                    Some(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                    None => println!("No vector with id '{}'", id),
                }
            }
        }
        VectorsAction::Delete { id } => {
            store.delete(&id).await?;
            if json_mode {
                println!("{}", json_output(true, serde_json::json!({ "id": id }), None));
            } else {
                println!("Deleted '{}'", id);
            }
        }
    }

    store.close();
    Ok(())
}
