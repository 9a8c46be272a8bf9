use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use dashquery::catalog::Catalog;
use dashquery::config::Settings;
use dashquery::db::{self, cancel_pair, ConnectionConfig};
use dashquery::export;
use dashquery::query::{compile, validate, WidgetQueryConfig};
use dashquery::{Engine, EngineError, RunOptions};

/// Compile and run dashboard widget queries against PostgreSQL
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Settings file (defaults to <config_dir>/dashquery/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a widget config, execute it and print the result
    Run {
        /// Path to the widget's data_config JSON
        widget: PathBuf,
        #[arg(long, value_enum, default_value_t = Format::Json)]
        format: Format,
        /// Bypass the result cache
        #[arg(long)]
        no_cache: bool,
        /// Per-query timeout, overriding the engine default
        #[arg(long)]
        timeout_ms: Option<u64>,
    },
    /// Validate and compile a widget config; print the SQL and its parameters
    Compile {
        widget: PathBuf,
    },
    /// List the catalog's sources with their dimensions and measures
    Sources,
    /// Write a settings file with the default values
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Csv,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Results go to stdout, logs to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings_path = cli.config.unwrap_or_else(Settings::default_path);
    if let Command::Init { force } = cli.command {
        if Settings::init(&settings_path, force)? {
            println!("Wrote {}", settings_path.display());
        } else {
            println!(
                "{} already exists; pass --force to overwrite",
                settings_path.display()
            );
        }
        return Ok(());
    }
    let settings = Settings::load(&settings_path)?;
    let catalog = Catalog::builtin();

    match cli.command {
        Command::Init { .. } => Ok(()),
        Command::Sources => print_sources(&catalog),
        Command::Compile { widget } => {
            let config = read_widget(&widget)?;
            let plan = validate(&catalog, &config, settings.engine.max_limit)
                .map_err(EngineError::from)
                .and_then(|validated| compile(&validated).map_err(EngineError::from))
                .unwrap_or_else(|e| exit_with(e));
            println!("{}", plan.sql);
            for (i, param) in plan.params.iter().enumerate() {
                println!(
                    "  ${} {} = {}",
                    i + 1,
                    param.pg_type(),
                    serde_json::to_string(param)?
                );
            }
            Ok(())
        }
        Command::Run {
            widget,
            format,
            no_cache,
            timeout_ms,
        } => {
            let config = read_widget(&widget)?;
            let mut connection = settings.connection.clone();
            resolve_password(&mut connection)?;
            let store = Arc::new(db::connect(&connection, &settings.pool)?);
            let engine = Engine::new(Arc::new(catalog), store, settings.engine);

            let (canceller, signal) = cancel_pair();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    canceller.cancel();
                }
            });

            let options = RunOptions {
                cache: !no_cache,
                timeout: timeout_ms.map(Duration::from_millis),
                cancel: Some(signal),
            };
            match engine.compile_and_run(&config, options).await {
                Ok(table) => {
                    match format {
                        Format::Json => println!("{}", export::to_json(&table)),
                        Format::Csv => print!("{}", export::to_csv(&table)),
                    }
                    Ok(())
                }
                Err(e) => exit_with(e),
            }
        }
    }
}

fn read_widget(path: &Path) -> Result<WidgetQueryConfig> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read widget config {}", path.display()))?;
    match WidgetQueryConfig::from_json(&json) {
        Ok(config) => Ok(config),
        Err(e) => exit_with(e.into()),
    }
}

/// Resolve password: PGPASSWORD env var, then interactive prompt
fn resolve_password(config: &mut ConnectionConfig) -> Result<()> {
    if !config.password.is_empty() {
        return Ok(());
    }
    if let Ok(pw) = std::env::var("PGPASSWORD") {
        config.password = pw;
    } else {
        let prompt = format!("Password for {}: ", config.display_string());
        config.password = rpassword::read_password_from_tty(Some(&prompt))?;
    }
    Ok(())
}

fn print_sources(catalog: &Catalog) -> Result<()> {
    for source in catalog.sources() {
        println!("{} (base table {})", source.name, source.base_table);
        let dimensions: Vec<&str> = source.dimensions.iter().map(|d| d.name).collect();
        println!("  dimensions: {}", dimensions.join(", "));
        for measure in &source.measures {
            let aggregations: Vec<&str> = measure
                .allowed_aggregations()
                .iter()
                .map(|a| a.as_str())
                .collect();
            println!("  measure {}: {}", measure.name, aggregations.join(", "));
        }
    }
    Ok(())
}

/// Print an engine error and exit: 2 for rejected configs, 1 otherwise.
fn exit_with<T>(err: EngineError) -> T {
    match &err {
        EngineError::Validation(v) => {
            eprintln!("Error: invalid widget config");
            for issue in &v.issues {
                eprintln!("  {}", issue);
            }
            std::process::exit(2);
        }
        EngineError::Execution(dashquery::ExecutionError::StoreFault(fault)) => {
            eprintln!("Error: {}", fault.display_full());
        }
        other => {
            eprintln!("Error: {}", other);
            if other.is_retryable() {
                eprintln!("  (transient; retrying may succeed)");
            }
        }
    }
    std::process::exit(1);
}
