use anyhow::{Context, Result};
use clap::Parser;
use std::{env, fmt::Display, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "KG_SERVICE_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub output_dir: String,
    pub staging_dir: String,
    pub database_url: String,
    pub db_max_connections: u32,
    pub db_acquire_timeout: Duration,
    pub max_input_bytes: usize,
    pub max_content_bytes: usize,
    pub generator_program: String,
    pub generator_args: Vec<String>,
    pub generation_timeout: Duration,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Knowledge graph generation service")]
pub struct Args {
    /// Host to bind to (overrides KG_SERVICE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides KG_SERVICE_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory generated artifacts are written to (overrides KG_SERVICE_OUTPUT_DIR)
    #[arg(long)]
    pub output_dir: Option<String>,

    /// Directory for transient generator input/output (overrides KG_SERVICE_STAGING_DIR)
    #[arg(long)]
    pub staging_dir: Option<String>,

    /// Database URL (overrides KG_SERVICE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Maximum pooled database connections (overrides KG_SERVICE_DB_MAX_CONNECTIONS)
    #[arg(long)]
    pub db_max_connections: Option<u32>,

    /// Seconds to wait for a pooled connection (overrides KG_SERVICE_DB_ACQUIRE_TIMEOUT_SECS)
    #[arg(long)]
    pub db_acquire_timeout_secs: Option<u64>,

    /// Maximum upload size in bytes (overrides KG_SERVICE_MAX_INPUT_SIZE)
    #[arg(long)]
    pub max_input_size: Option<usize>,

    /// Maximum stored content size in bytes (overrides KG_SERVICE_MAX_CONTENT_SIZE)
    #[arg(long)]
    pub max_content_size: Option<usize>,

    /// Generator executable (overrides KG_SERVICE_GENERATOR_PROGRAM)
    #[arg(long)]
    pub generator_program: Option<String>,

    /// Generator argument placed before the input and output paths; repeatable
    /// (overrides KG_SERVICE_GENERATOR_ARGS)
    #[arg(long = "generator-arg", allow_hyphen_values = true)]
    pub generator_args: Vec<String>,

    /// Generation timeout in seconds (overrides KG_SERVICE_GENERATION_TIMEOUT_SECS)
    #[arg(long)]
    pub generation_timeout_secs: Option<u64>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        // Parse CLI once
        let args = Args::parse();
        let migrate = args.migrate;
        let cfg = Self::resolve(args, |name| env::var(name).ok())?;
        Ok((cfg, migrate))
    }

    /// Merge CLI args over environment values over defaults.
    ///
    /// `lookup` receives full variable names (`KG_SERVICE_*`).
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(&format!("{ENV_PREFIX}{key}"));

        // --- Environment fallback ---
        let env_host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "PORT", 8000)?;
        let env_output = var("OUTPUT_DIR").unwrap_or_else(|| "./output".into());
        let env_staging = var("STAGING_DIR").unwrap_or_else(|| "./data/staging".into());
        let env_db =
            var("DATABASE_URL").unwrap_or_else(|| "sqlite://./data/meta/kg_service.db".into());
        let env_max_conn = parse_var(&var, "DB_MAX_CONNECTIONS", 20)?;
        let env_acquire = parse_var(&var, "DB_ACQUIRE_TIMEOUT_SECS", 30)?;
        let env_max_input = parse_var(&var, "MAX_INPUT_SIZE", 10_485_760)?;
        let env_max_content = parse_var(&var, "MAX_CONTENT_SIZE", 10_000_000)?;
        let env_program = var("GENERATOR_PROGRAM").unwrap_or_else(|| "uv".into());
        let env_gen_args = var("GENERATOR_ARGS")
            .map(|raw| raw.split_whitespace().map(str::to_string).collect())
            .unwrap_or_else(|| vec!["run".to_string(), "generate-graph.py".to_string()]);
        let env_timeout = parse_var(&var, "GENERATION_TIMEOUT_SECS", 30)?;

        // --- Merge ---
        let cfg = Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            output_dir: args.output_dir.unwrap_or(env_output),
            staging_dir: args.staging_dir.unwrap_or(env_staging),
            database_url: args.database_url.unwrap_or(env_db),
            db_max_connections: args.db_max_connections.unwrap_or(env_max_conn),
            db_acquire_timeout: Duration::from_secs(
                args.db_acquire_timeout_secs.unwrap_or(env_acquire),
            ),
            max_input_bytes: args.max_input_size.unwrap_or(env_max_input),
            max_content_bytes: args.max_content_size.unwrap_or(env_max_content),
            generator_program: args.generator_program.unwrap_or(env_program),
            generator_args: if args.generator_args.is_empty() {
                env_gen_args
            } else {
                args.generator_args
            },
            generation_timeout: Duration::from_secs(
                args.generation_timeout_secs.unwrap_or(env_timeout),
            ),
        };

        if cfg.db_max_connections == 0 {
            anyhow::bail!("{ENV_PREFIX}DB_MAX_CONNECTIONS must be at least 1");
        }
        if cfg.generation_timeout.is_zero() {
            anyhow::bail!("{ENV_PREFIX}GENERATION_TIMEOUT_SECS must be at least 1");
        }

        Ok(cfg)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_var<T>(var: impl Fn(&str) -> Option<String>, key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match var(key) {
        Some(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{e}"))
            .with_context(|| format!("parsing {ENV_PREFIX}{key} value `{value}`")),
        None => Ok(default),
    }
}
