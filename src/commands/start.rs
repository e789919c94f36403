use anyhow::{Context, Result};
use colored::Colorize;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::{debug, warn};

use crate::addresses::{self, HostnameResolver};
use crate::config::settings::MergedSettings;
use crate::ports::{self, PortChecker};
use crate::proxy::{CommandEngine, ProxyLifecycleController};
use crate::shutdown::{self, ShutdownReason};

pub fn execute(settings: MergedSettings, watch_stdin: bool) -> Result<()> {
    let engine = CommandEngine::new(&settings.engine.program, settings.engine.args.clone())
        .with_settle_time(Duration::from_millis(settings.engine.settle_ms));
    let checker = PortChecker::new(ports::system_table());
    let mut controller = ProxyLifecycleController::new(engine, checker);

    let config = controller.configure(
        settings.external_port,
        settings.internal_port,
        settings.rewrite_host_headers,
    )?;

    let address = lan_address();

    if config.rewrite_host_headers() && settings.engine.program == "socat" {
        warn!("socat forwards raw TCP and will not rewrite Host headers");
    }

    // Listen before starting so an early Ctrl-C still stops the engine
    let shutdown_rx = shutdown::listen(watch_stdin)?;

    let handle = controller
        .start(config)
        .with_context(|| format!("Could not start {}", settings.engine.program))?;
    let running = handle.config();

    println!(
        "{}\nhttp://{}:{} => http://127.0.0.1:{}",
        "Started:".green().bold(),
        address,
        running.external_port(),
        running.internal_port()
    );

    match shutdown_rx.recv() {
        Ok(ShutdownReason::Signal(signal)) => debug!("Shutting down on signal {}", signal),
        Ok(ShutdownReason::Input) => debug!("Shutting down on operator input"),
        Err(_) => debug!("No shutdown source left, shutting down"),
    }

    println!("{}", "Proxy-connection closed!".yellow());
    controller.close()?;
    debug!("Proxy controller {:?}", controller.state());

    Ok(())
}

/// Address to announce; loopback when no LAN address can be found
fn lan_address() -> Ipv4Addr {
    let selected = addresses::select_addresses(&HostnameResolver)
        .map(|candidates| addresses::display_address(&candidates));

    match selected {
        Ok(Some(address)) => address,
        Ok(None) => Ipv4Addr::LOCALHOST,
        Err(e) => {
            warn!("{}, showing loopback address", e);
            Ipv4Addr::LOCALHOST
        }
    }
}
