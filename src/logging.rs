use std::io;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs the process wide subscriber. Only binaries call this, the
/// library itself just emits events.
pub fn init_logging(verbose: bool, json_output: bool) -> Result<(), anyhow::Error> {
    let default_directive = if verbose {
        "registry_replicator=debug,replicator_app=debug"
    } else {
        "registry_replicator=info,replicator_app=info"
    };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    let registry = Registry::default().with(env_filter);

    if json_output {
        registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .try_init()?;
    } else {
        registry
            .with(fmt::layer().with_writer(io::stderr).with_target(false))
            .try_init()?;
    }
    Ok(())
}
