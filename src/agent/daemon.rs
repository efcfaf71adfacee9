use std::sync::Arc;

use anyhow::Result;
use tokio::signal;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::agent::channels::ChannelStore;
use crate::agent::config::Config;
use crate::agent::identity::{HostIdentity, MachineIdentity};
use crate::commands::{BatchDispatcher, CommandExecutor, Ledger, ShellRunner};
use crate::transport::network::{self, DnsProbe};
use crate::transport::websocket::WsConnector;
use crate::transport::{ConnectionManager, ConnectionOptions};

pub async fn run(cfg: Config) -> Result<()> {
    info!(server = %cfg.server_url, version = crate::VERSION, "agent starting");

    let channels = Arc::new(ChannelStore::new(cfg.channel_path()));
    if let Err(e) = channels.ensure_exists() {
        warn!(error = %e, "could not create channel file");
    }
    let subscribed = channels.current();
    if subscribed.is_empty() {
        warn!("no channels configured, subscribing to none");
    }

    let identity = Arc::new(HostIdentity::new(cfg.mac_cache_path()));
    info!(mac = %identity.mac_address(), "machine identity");

    let ledger = Ledger::load(cfg.ledger_path());
    info!(entries = ledger.entries().len(), "ledger loaded");

    let runner = Arc::new(ShellRunner::new(Duration::from_secs(
        cfg.executor.command_timeout_secs,
    )));
    let executor = CommandExecutor::new(runner, &cfg.executor);
    let dispatcher = BatchDispatcher::new(executor, ledger);

    let probe = Arc::new(DnsProbe::new(
        cfg.connection.probe_host.clone(),
        Duration::from_secs(cfg.connection.probe_timeout_secs),
    ));
    let (online, monitor_handle) = network::spawn_monitor(
        probe,
        Duration::from_secs(cfg.connection.network_check_interval_secs),
    );

    let manager = ConnectionManager::new(
        ConnectionOptions::from_config(&cfg),
        Arc::new(WsConnector::default()),
        channels,
        identity,
        dispatcher,
        online,
    );

    let result = tokio::select! {
        res = manager.run() => {
            if let Err(e) = &res {
                error!(error = %e, "connection manager stopped");
            }
            res
        }
        sig = signal::ctrl_c() => {
            info!("shutdown signal received, stopping agent");
            sig.map_err(Into::into)
        }
    };

    monitor_handle.abort();
    let _ = monitor_handle.await;

    result
}
