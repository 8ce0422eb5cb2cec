//! strataseal: administrative tool for stored envelopes
//!
//! Usage:
//!   strataseal [--config strataseal.toml] migrate --input rows.json --output migrated.json [--layered] [--json]
//!   strataseal classify '<stored value>'
//!
//! `rows.json` is an array of `{"id": ..., "ciphertext": ...}` objects. The
//! output has the same shape, with legacy values replaced by envelopes and
//! every other row unchanged; rows that failed keep their old value.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use strataseal::{
    classify, FileLegacyKeyStore, MigrationTarget, Migrator, Row, StrataConfig, Vault,
};

#[derive(Parser, Debug)]
#[command(name = "strataseal", version, about = "Layered envelope encryption admin tool")]
struct Cli {
    /// Path to strataseal.toml configuration file
    #[arg(long, short = 'c', env = "STRATASEAL_CONFIG", default_value = "strataseal.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "STRATASEAL_LOG", default_value = "info")]
    log: String,

    /// Log format (json, text)
    #[arg(long, env = "STRATASEAL_LOG_FORMAT", default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-encrypt legacy rows of a JSON export with the current codecs
    Migrate {
        /// JSON array of {"id", "ciphertext"} rows
        #[arg(long)]
        input: PathBuf,

        /// Where to write the migrated rows
        #[arg(long)]
        output: PathBuf,

        /// Re-encrypt as layered envelopes instead of single-layer ones
        #[arg(long)]
        layered: bool,

        /// Environment variable holding a password for a third layer
        #[arg(long, requires = "layered")]
        password_env: Option<String>,

        /// Worker threads (overrides migration.concurrency)
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the migration report as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Print the detected format of a stored value
    Classify { value: String },
}

#[derive(Clone, Debug, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log, &cli.log_format);

    match cli.command {
        Command::Classify { value } => {
            println!("{}", classify(&value));
            Ok(())
        }
        Command::Migrate {
            input,
            output,
            layered,
            password_env,
            concurrency,
            json,
        } => {
            let config = StrataConfig::load(&cli.config)
                .with_context(|| format!("loading config {}", cli.config.display()))?;
            let options = MigrateOptions {
                layered,
                password_env,
                concurrency,
                json,
            };
            migrate(&config, &input, &output, options)
        }
    }
}

struct MigrateOptions {
    layered: bool,
    password_env: Option<String>,
    concurrency: Option<usize>,
    json: bool,
}

fn migrate(
    config: &StrataConfig,
    input: &Path,
    output: &Path,
    options: MigrateOptions,
) -> Result<()> {
    let MigrateOptions {
        layered,
        password_env,
        concurrency,
        json,
    } = options;

    let legacy_file = config
        .keys
        .legacy_key_file
        .as_ref()
        .context("keys.legacy_key_file must be set to migrate legacy rows")?;

    let content = std::fs::read_to_string(input)
        .with_context(|| format!("reading rows {}", input.display()))?;
    let rows: Vec<Row> = serde_json::from_str(&content)
        .with_context(|| format!("parsing rows {}", input.display()))?;

    info!(
        rows = rows.len(),
        input = %input.display(),
        layered,
        "starting migration"
    );

    let vault = Vault::from_config(config).context("opening key store")?;
    let target = if layered {
        MigrationTarget::Layered
    } else {
        MigrationTarget::SingleLayer
    };

    let mut migrator = Migrator::new(&vault, Arc::new(FileLegacyKeyStore::new(legacy_file)), target)
        .with_concurrency(concurrency.unwrap_or(config.migration.concurrency));
    if let Some(var) = password_env {
        let password =
            std::env::var(&var).with_context(|| format!("reading password from ${var}"))?;
        migrator = migrator.with_password(password);
    }

    let report = migrator.migrate_all(&rows)?;

    let updates: HashMap<&str, &str> = report
        .updates
        .iter()
        .map(|row| (row.id.as_str(), row.ciphertext.as_str()))
        .collect();
    let migrated: Vec<Row> = rows
        .iter()
        .map(|row| match updates.get(row.id.as_str()) {
            Some(value) => Row::new(row.id.clone(), *value),
            None => row.clone(),
        })
        .collect();

    std::fs::write(output, serde_json::to_string_pretty(&migrated)?)
        .with_context(|| format!("writing {}", output.display()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!(
            "migrated: {}  unchanged: {}  failed: {}",
            report.migrated,
            report.unchanged,
            report.failed.len()
        );
        for failure in &report.failed {
            println!("  {}: {}", failure.id, failure.error);
        }
    }

    if !report.is_clean() {
        anyhow::bail!("{} row(s) could not be migrated", report.failed.len());
    }
    Ok(())
}

fn init_logging(level: &str, format: &LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}
