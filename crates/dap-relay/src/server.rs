use std::io;
use std::sync::Arc;

use miette::IntoDiagnostic;
use tracing::info;

use crate::config::Config;
use crate::inject::CommandSocket;
use crate::log;
use crate::relay::Relay;
use crate::templates::TEMPLATE_VERSION;

/// Runs one debug session over stdin/stdout.
pub fn start() -> miette::Result<()> {
    let config = Config::from_env();
    log::init(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        template_version = TEMPLATE_VERSION,
        command_addr = %config.command_addr,
        "Starting dap-relay"
    );

    let injector = Arc::new(CommandSocket::new(
        config.command_addr.clone(),
        config.script_path(),
    ));
    let relay = Relay::new(config, injector);
    relay.serve(io::stdin(), io::stdout()).into_diagnostic()?;

    info!("dap-relay finished");
    Ok(())
}
