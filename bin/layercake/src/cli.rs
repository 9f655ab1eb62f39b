use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use layercake_deploy::{DeployOrder, EnvironmentBuilder};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Targets;

/// Target prefixes of the AWS SDK crates and the HTTP stack underneath them.
const SDK_TARGETS: &[&str] = &["aws", "hyper", "hyper_util", "h2", "rustls", "tower"];

/// Log levels accepted on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum LogLevel {
    Critical,
    Error,
    Warning,
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Critical | LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
        }
    }
}

#[derive(Parser)]
#[command(name = "layercake")]
#[command(
    author,
    version,
    about = "Deploy layered cloud environments described in YAML"
)]
pub struct Cli {
    /// The log level.
    #[arg(long, global = true, env = "LAYERCAKE_LOG", default_value_t = LogLevel::Info)]
    pub log: LogLevel,

    /// The log level of the AWS SDK.
    #[arg(
        long,
        global = true,
        visible_alias = "botolog",
        env = "LAYERCAKE_SDK_LOG",
        default_value_t = LogLevel::Critical
    )]
    pub sdk_log: LogLevel,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Per-target filter: `--sdk-log` for the AWS SDK and its transport, `--log` for
    /// everything else.
    pub fn log_filter(&self) -> Targets {
        let sdk_level = self.sdk_log.to_level_filter();
        Targets::new()
            .with_default(self.log.to_level_filter())
            .with_targets(SDK_TARGETS.iter().map(|target| (*target, sdk_level)))
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Create every layer of an environment, parents first.
    Create(CreateArgs),
    /// Delete every layer of an environment, children first.
    Delete(DeleteArgs),
    /// Encrypt a value with the vault key and store it.
    SetSecret(SetSecretArgs),
    /// Read and decrypt a stored secret.
    GetSecret(GetSecretArgs),
    /// Show the outputs of a deployed environment.
    Outputs(OutputsArgs),
}

/// Arguments identifying an environment.
#[derive(Debug, Clone, Args)]
pub struct EnvironmentArgs {
    /// Path of the environment specification.
    pub env_file: PathBuf,

    /// The deployment stage (e.g. dev, prod). Uppercased.
    #[arg(long, env = "LAYERCAKE_STAGE")]
    pub stage: Option<String>,
}

impl EnvironmentArgs {
    pub fn builder(&self) -> EnvironmentBuilder {
        let builder = EnvironmentBuilder::new(&self.env_file);
        match &self.stage {
            Some(stage) => builder.stage(stage),
            None => builder,
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct CreateArgs {
    #[command(flatten)]
    pub env: EnvironmentArgs,

    /// Name of the layer holding the encryption key.
    #[arg(long)]
    pub vault_layer: Option<String>,

    /// Update the layers that are already deployed.
    #[arg(long, default_value_t = false)]
    pub update: bool,

    /// Print the stacks that would be created, in order, and exit.
    #[arg(long, default_value_t = false)]
    pub pretend: bool,

    /// Write the environment outputs to this file (YAML, or JSON for `.json`).
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// How layers are sequenced.
    #[arg(long, default_value_t = DeployOrder::Dependency)]
    pub order: DeployOrder,
}

#[derive(Debug, Clone, Args)]
pub struct DeleteArgs {
    #[command(flatten)]
    pub env: EnvironmentArgs,

    /// Print the stacks that would be deleted, in order, and exit.
    #[arg(long, default_value_t = false)]
    pub pretend: bool,

    /// How layers are sequenced.
    #[arg(long, default_value_t = DeployOrder::Dependency)]
    pub order: DeployOrder,
}

#[derive(Debug, Clone, Args)]
pub struct SetSecretArgs {
    #[command(flatten)]
    pub env: EnvironmentArgs,

    /// The secret name.
    pub key: String,

    /// The secret value.
    pub value: String,

    /// Name of the layer holding the encryption key.
    #[arg(long)]
    pub vault_layer: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct GetSecretArgs {
    #[command(flatten)]
    pub env: EnvironmentArgs,

    /// The secret name.
    pub key: String,

    /// Name of the layer holding the encryption key.
    #[arg(long)]
    pub vault_layer: Option<String>,
}

#[derive(Debug, Clone, Args)]
pub struct OutputsArgs {
    #[command(flatten)]
    pub env: EnvironmentArgs,

    /// Write the outputs to this file instead of printing them.
    #[arg(long)]
    pub output: Option<PathBuf>,
}
