//! `labgate serve`

use anyhow::{Context, Result};

use labgate::config::{Config, RuntimeType};

/// Apply command-line overrides and run the gateway until shutdown.
pub(crate) async fn cmd_serve(
    mut config: Config,
    port: Option<u16>,
    runtime: Option<RuntimeType>,
) -> Result<()> {
    if let Some(port) = port {
        config.server.port = port;
    }
    if let Some(runtime) = runtime {
        config.runtime.runtime_type = runtime;
    }
    config.validate()?;

    labgate::gateway::serve(config)
        .await
        .with_context(|| "Gateway stopped with an error")
}
