use anyhow::bail;
use anyhow::Context;

use clap::Parser;

use indicatif::MultiProgress;
use registry_replicator::config::{Credential, ImageLocation, MigrationConfig};
use registry_replicator::migrate::Migration;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "replicator app")]
struct Opt {
    /// JSON migration config: source, destination, transport settings.
    #[arg(long)]
    config: PathBuf,

    #[arg(long)]
    source_tag: Option<String>,

    #[arg(long)]
    destination_tag: Option<String>,

    #[arg(long)]
    max_concurrent: Option<usize>,

    /// Skip TLS certificate verification on both registries.
    #[arg(long)]
    insecure: bool,

    #[arg(long, env = "REPLICATOR_SOURCE_USERNAME", hide_env_values = true)]
    source_username: Option<String>,

    #[arg(long, env = "REPLICATOR_SOURCE_PASSWORD", hide_env_values = true)]
    source_password: Option<String>,

    #[arg(long, env = "REPLICATOR_DESTINATION_USERNAME", hide_env_values = true)]
    destination_username: Option<String>,

    #[arg(long, env = "REPLICATOR_DESTINATION_PASSWORD", hide_env_values = true)]
    destination_password: Option<String>,

    #[arg(long)]
    verbose: bool,

    #[arg(long)]
    json_logs: bool,
}

fn apply_credential(
    location: &mut ImageLocation,
    username: Option<String>,
    password: Option<String>,
    which: &str,
) -> Result<(), anyhow::Error> {
    match (username, password) {
        (None, None) => {}
        (Some(username), Some(password)) => {
            location.credential = Some(Credential { username, password })
        }
        _ => bail!("Both a username and a password are needed for the {} registry", which),
    }
    Ok(())
}

fn load_config(opt: Opt) -> Result<MigrationConfig, anyhow::Error> {
    if !opt.config.exists() {
        bail!("Path for config passed in does not exist: {:#?}", opt.config);
    }

    let mut config = MigrationConfig::parse_file(&opt.config).with_context(|| {
        format!(
            "Attempting to load migration config from file: {}",
            opt.config.to_string_lossy()
        )
    })?;

    if let Some(tag) = opt.source_tag {
        config.source.tag = tag;
    }
    if let Some(tag) = opt.destination_tag {
        config.destination.tag = tag;
    }
    if let Some(max_concurrent) = opt.max_concurrent {
        config.max_concurrent_transfers = max_concurrent;
    }
    if opt.insecure {
        config.transport.verify_tls = false;
    }
    apply_credential(
        &mut config.source,
        opt.source_username,
        opt.source_password,
        "source",
    )?;
    apply_credential(
        &mut config.destination,
        opt.destination_username,
        opt.destination_password,
        "destination",
    )?;

    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    let opt = Opt::parse();
    registry_replicator::logging::init_logging(opt.verbose, opt.json_logs)?;

    let config = load_config(opt)?;

    let mp = Arc::new(MultiProgress::new());
    mp.set_alignment(indicatif::MultiProgressAlignment::Bottom);

    let mut migration = Migration::from_config(&config)?.with_progress(mp);
    let report = migration.run().await.with_context(|| {
        format!(
            "Migrating {}/{}:{} to {}/{}:{}",
            config.source.registry,
            config.source.repository,
            config.source.tag,
            config.destination.registry,
            config.destination.repository,
            config.destination.tag
        )
    })?;

    if report.skipped {
        println!(
            "Destination already has the image, nothing copied: {}",
            report.destination.uri
        );
    } else {
        println!(
            "All referred to blobs have been ensured present, actions taken:\n{}",
            report.actions
        );
        println!("New image address: {}", report.destination.uri);
    }

    Ok(())
}
