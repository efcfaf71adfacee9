//! Persistent server session: connect, subscribe, keep alive, reconnect.
//!
//! The manager is a single task that owns the socket. Inbound text is handed
//! to the dispatch worker and never awaited on the receive path; replies come
//! back tagged with the connection epoch they were produced for and are sent
//! only while that same connection is still open.

use anyhow::{bail, Result};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{sleep, sleep_until, Duration, Instant, MissedTickBehavior};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::backoff::BackoffPolicy;
use super::worker::DispatchHandle;
use super::{Connector, SubscribeMessage, Transport, TransportError, TransportEvent};
use crate::agent::channels::ChannelSource;
use crate::agent::config::Config;
use crate::agent::identity::MachineIdentity;
use crate::commands::BatchDispatcher;
use crate::utils::audit_log::AuditLogger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

/// Snapshot published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub state: ConnectionState,
    pub reconnect_attempts: u32,
    pub channels: Vec<String>,
    pub epoch: u64,
}

#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub url: String,
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub backoff: BackoffPolicy,
}

impl ConnectionOptions {
    pub fn from_config(config: &Config) -> Self {
        let c = &config.connection;
        Self {
            url: config.server_url.clone(),
            ping_interval: Duration::from_secs(c.ping_interval_secs),
            pong_timeout: Duration::from_secs(c.pong_timeout_secs),
            backoff: c.reconnect.clone(),
        }
    }
}

/// Why an open session ended.
#[derive(Debug)]
enum SessionEnd {
    ClosedByPeer,
    PongTimeout,
    NetworkLost,
    Failed(TransportError),
    DispatcherStopped,
}

/// Ping/pong bookkeeping for one open connection.
#[derive(Debug)]
pub struct HealthProbe {
    pong_timeout: Duration,
    deadline: Option<Instant>,
}

impl HealthProbe {
    pub fn new(pong_timeout: Duration) -> Self {
        Self {
            pong_timeout,
            deadline: None,
        }
    }

    /// Arms the pong deadline unless one is already pending.
    pub fn ping_sent(&mut self, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.pong_timeout);
        }
    }

    pub fn pong_received(&mut self) {
        self.deadline = None;
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

pub struct ConnectionManager {
    options: ConnectionOptions,
    connector: Arc<dyn Connector>,
    channels: Arc<dyn ChannelSource>,
    identity: Arc<dyn MachineIdentity>,
    dispatch: DispatchHandle,
    network: watch::Receiver<bool>,
    network_alive: bool,
    status: watch::Sender<ConnectionStatus>,
    audit: AuditLogger,
    state: ConnectionState,
    reconnect_attempts: u32,
    subscribed: Vec<String>,
    epoch: u64,
}

impl ConnectionManager {
    /// Must be called from within a tokio runtime; spawns the dispatch worker.
    pub fn new(
        options: ConnectionOptions,
        connector: Arc<dyn Connector>,
        channels: Arc<dyn ChannelSource>,
        identity: Arc<dyn MachineIdentity>,
        dispatcher: BatchDispatcher,
        network: watch::Receiver<bool>,
    ) -> Self {
        let (status, _) = watch::channel(ConnectionStatus {
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            channels: Vec::new(),
            epoch: 0,
        });
        Self {
            options,
            connector,
            channels,
            identity,
            dispatch: DispatchHandle::spawn(dispatcher),
            network,
            network_alive: true,
            status,
            audit: AuditLogger::new(),
            state: ConnectionState::Disconnected,
            reconnect_attempts: 0,
            subscribed: Vec::new(),
            epoch: 0,
        }
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.status.subscribe()
    }

    fn transition(&mut self, next: ConnectionState) {
        if self.state != next {
            debug!(from = ?self.state, to = ?next, "connection state");
        }
        self.state = next;
        self.publish();
    }

    fn publish(&self) {
        self.status.send_replace(ConnectionStatus {
            state: self.state,
            reconnect_attempts: self.reconnect_attempts,
            channels: self.subscribed.clone(),
            epoch: self.epoch,
        });
    }

    /// Connect and keep reconnecting for the lifetime of the process. Only a
    /// dead dispatch worker ends the loop.
    pub async fn run(mut self) -> Result<()> {
        loop {
            self.transition(ConnectionState::Connecting);
            info!(url = %self.options.url, attempt = self.reconnect_attempts, "connecting");

            match self.connector.connect(&self.options.url).await {
                Ok(transport) => {
                    self.reconnect_attempts = 0;
                    self.epoch += 1;
                    self.transition(ConnectionState::Open);
                    info!(epoch = self.epoch, "connected to server");

                    let span = info_span!("session", epoch = self.epoch, id = %Uuid::new_v4());
                    let end = self.run_session(transport).instrument(span).await;
                    match end {
                        SessionEnd::DispatcherStopped => {
                            self.transition(ConnectionState::Disconnected);
                            bail!("dispatch worker stopped unexpectedly");
                        }
                        SessionEnd::Failed(e) => warn!(error = %e, "connection error"),
                        other => info!(reason = ?other, "connection closed"),
                    }
                }
                Err(e) => warn!(error = %e, "connection attempt failed"),
            }

            self.transition(ConnectionState::Disconnected);
            self.wait_before_retry().await;
        }
    }

    /// Sleep for the backoff delay, cut short by any reachability poll that
    /// reports the network online.
    async fn wait_before_retry(&mut self) {
        if self.reconnect_attempts == self.options.backoff.max_attempts {
            error!(
                attempts = self.reconnect_attempts,
                "max reconnection attempts reached, retrying at the maximum delay"
            );
        }
        let delay = self.options.backoff.retry_delay(self.reconnect_attempts);
        self.reconnect_attempts = self.reconnect_attempts.saturating_add(1);
        self.publish();
        info!(
            delay_ms = delay.as_millis() as u64,
            attempt = self.reconnect_attempts,
            "scheduling reconnect"
        );

        let wake = sleep(delay);
        tokio::pin!(wake);
        loop {
            tokio::select! {
                _ = &mut wake => return,
                changed = self.network.changed(), if self.network_alive => {
                    if changed.is_err() {
                        self.network_alive = false;
                    } else if *self.network.borrow_and_update() {
                        info!("network is online, reconnecting now");
                        return;
                    }
                }
                frame = self.dispatch.next_frame() => match frame {
                    Some(frame) => self.audit.results_discarded(frame.epoch, self.epoch),
                    // the next session reports the dead worker
                    None => return,
                },
            }
        }
    }

    async fn run_session(&mut self, mut transport: Box<dyn Transport>) -> SessionEnd {
        let channels = self.channels.current_channels();
        let subscribe = match SubscribeMessage::new(&channels).to_frame() {
            Ok(frame) => frame,
            Err(e) => return self.shutdown(transport, SessionEnd::Failed(e)).await,
        };
        if let Err(e) = transport.send_text(subscribe).await {
            return self.shutdown(transport, SessionEnd::Failed(e)).await;
        }
        info!(channels = ?channels, "subscribed");
        self.subscribed = channels;
        self.publish();

        let mac = self.identity.mac_address();
        let mut health = HealthProbe::new(self.options.pong_timeout);
        let mut ping = tokio::time::interval_at(
            Instant::now() + self.options.ping_interval,
            self.options.ping_interval,
        );
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let end = loop {
            let awaiting_pong = health.deadline().is_some();
            let pong_deadline = health
                .deadline()
                .unwrap_or_else(|| Instant::now() + self.options.pong_timeout);

            tokio::select! {
                event = transport.next_event() => match event {
                    Some(Ok(TransportEvent::Text(text))) => {
                        debug!(bytes = text.len(), "received message");
                        if !self.dispatch.submit(self.epoch, text, mac.clone()) {
                            break SessionEnd::DispatcherStopped;
                        }
                    }
                    Some(Ok(TransportEvent::Pong)) => {
                        debug!("pong received");
                        health.pong_received();
                    }
                    Some(Ok(TransportEvent::Closed { code, reason })) => {
                        info!(?code, %reason, "server closed the connection");
                        break SessionEnd::ClosedByPeer;
                    }
                    Some(Err(e)) => break SessionEnd::Failed(e),
                    None => break SessionEnd::ClosedByPeer,
                },
                _ = ping.tick() => {
                    if let Err(e) = transport.ping().await {
                        break SessionEnd::Failed(e);
                    }
                    health.ping_sent(Instant::now());
                }
                _ = sleep_until(pong_deadline), if awaiting_pong => {
                    warn!("pong timeout, connection appears dead");
                    break SessionEnd::PongTimeout;
                }
                frame = self.dispatch.next_frame() => match frame {
                    Some(frame) if frame.epoch == self.epoch => {
                        if let Err(e) = transport.send_text(frame.text).await {
                            break SessionEnd::Failed(e);
                        }
                    }
                    Some(frame) => self.audit.results_discarded(frame.epoch, self.epoch),
                    None => break SessionEnd::DispatcherStopped,
                },
                changed = self.network.changed(), if self.network_alive => {
                    if changed.is_err() {
                        self.network_alive = false;
                    } else if !*self.network.borrow_and_update() {
                        warn!("network lost, dropping connection");
                        break SessionEnd::NetworkLost;
                    }
                }
            }
        };

        self.shutdown(transport, end).await
    }

    async fn shutdown(&mut self, mut transport: Box<dyn Transport>, end: SessionEnd) -> SessionEnd {
        self.transition(ConnectionState::Closing);
        transport.close().await;
        end
    }
}
