//! layercake deploys layered cloud environments described in a YAML specification.

mod cli;
mod config;

use std::path::Path;

use anyhow::Result;
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use tracing_subscriber::prelude::*;

use cli::{Cli, Command, CreateArgs, DeleteArgs, GetSecretArgs, OutputsArgs, SetSecretArgs};
use layercake_deploy::{AwsBackend, Environment, EnvironmentBuilder};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger. Logs go to stderr, command results to stdout.
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(cli.log_filter())
        .init();

    match cli.command {
        Command::Create(args) => create(args).await,
        Command::Delete(args) => delete(args).await,
        Command::SetSecret(args) => set_secret(args).await,
        Command::GetSecret(args) => get_secret(args).await,
        Command::Outputs(args) => outputs(args).await,
    }
}

async fn backend() -> Result<AwsBackend> {
    let config = config::load_cloud_config(Path::new(config::CONFIG_FILE))?;
    Ok(AwsBackend::from_config(&config).await)
}

fn with_vault_layer(builder: EnvironmentBuilder, vault_layer: Option<&str>) -> EnvironmentBuilder {
    match vault_layer {
        Some(layer) => builder.vault_layer(layer),
        None => builder,
    }
}

async fn create(args: CreateArgs) -> Result<()> {
    let mut environment =
        with_vault_layer(args.env.builder(), args.vault_layer.as_deref())
            .order(args.order)
            .build()?;

    if args.pretend {
        for stack in environment.plan()? {
            println!("{stack}");
        }
        return Ok(());
    }

    let backend = backend().await?;
    environment
        .create(&backend, args.update, args.output.as_deref())
        .await?;

    tracing::info!(%environment, "Environment created");
    Ok(())
}

async fn delete(args: DeleteArgs) -> Result<()> {
    let mut environment = args.env.builder().order(args.order).build()?;

    if args.pretend {
        for stack in environment.plan()?.into_iter().rev() {
            println!("{stack}");
        }
        return Ok(());
    }

    let backend = backend().await?;
    environment.delete(&backend).await?;

    tracing::info!(%environment, "Environment deleted");
    Ok(())
}

async fn set_secret(args: SetSecretArgs) -> Result<()> {
    let environment =
        with_vault_layer(args.env.builder(), args.vault_layer.as_deref()).build()?;

    let backend = backend().await?;
    environment
        .set_secret(&backend, &args.key, &args.value)
        .await
}

async fn get_secret(args: GetSecretArgs) -> Result<()> {
    let environment =
        with_vault_layer(args.env.builder(), args.vault_layer.as_deref()).build()?;

    let backend = backend().await?;
    let value = environment.get_secret(&backend, &args.key).await?;
    println!("{value}");
    Ok(())
}

async fn outputs(args: OutputsArgs) -> Result<()> {
    let mut environment = args.env.builder().build()?;

    let backend = backend().await?;
    environment.refresh_outputs(&backend).await?;

    if let Some(path) = args.output.as_deref() {
        let path = environment.write_outputs(Some(path))?;
        println!("{}", path.display());
        return Ok(());
    }

    println!("{}", outputs_table(&environment));
    Ok(())
}

fn outputs_table(environment: &Environment) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_header(vec!["Layer", "Output", "Value"]);

    for (layer, outputs) in environment.outputs() {
        for (key, value) in outputs.iter() {
            table.add_row(vec![layer.as_str(), key.as_str(), value.as_str()]);
        }
    }

    table
}
