use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Answers "can this machine reach the internet right now?".
#[async_trait]
pub trait NetworkProbe: Send + Sync {
    async fn is_online(&self) -> bool;
}

/// Online iff the probe host resolves within the timeout.
#[derive(Debug, Clone)]
pub struct DnsProbe {
    host: String,
    timeout: Duration,
}

impl DnsProbe {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            timeout,
        }
    }
}

#[async_trait]
impl NetworkProbe for DnsProbe {
    async fn is_online(&self) -> bool {
        match timeout(self.timeout, tokio::net::lookup_host((self.host.as_str(), 80))).await {
            Ok(Ok(mut addrs)) => addrs.next().is_some(),
            Ok(Err(e)) => {
                debug!(host = %self.host, error = %e, "dns lookup failed");
                false
            }
            Err(_) => {
                debug!(host = %self.host, "dns lookup timed out");
                false
            }
        }
    }
}

/// Check reachability on a fixed interval and publish every result on a watch
/// channel, so receivers wake once per poll. Only transitions are logged. The
/// task ends when every receiver is gone.
pub fn spawn_monitor(
    probe: Arc<dyn NetworkProbe>,
    interval: Duration,
) -> (watch::Receiver<bool>, JoinHandle<()>) {
    let (tx, rx) = watch::channel(true);
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            if tx.is_closed() {
                break;
            }
            let online = probe.is_online().await;
            let was_online = tx.send_replace(online);
            match (was_online, online) {
                (false, true) => info!("network connectivity restored"),
                (true, false) => warn!("network connectivity lost"),
                _ => {}
            }
        }
    });
    (rx, handle)
}
