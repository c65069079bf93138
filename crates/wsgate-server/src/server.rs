//! Core gateway: owns the registry, dispatcher, sweeper and accept loop.
//!
//! `Gateway::new` wires the shared state, `bind` claims the listen
//! socket (the one fatal startup step), and `BoundGateway::run` drives
//! the accept loop, spawning one lifecycle task per connection. The
//! shutdown broadcast reaches every connection task and the sweeper, so
//! teardown is deterministic in tests and on SIGTERM.

use crate::config::GatewayConfig;
use crate::connection;
use crate::dispatch::{Dispatcher, HandlerRegistry};
use crate::registry::{ClientRegistry, ConnCommand};
use crate::sweeper::Sweeper;
use crate::transport::{self, WebSocketConnection};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{info, warn};
use wsgate_core::{codec, GateError, GateResult, ResponseEnvelope};

/// The wsgate gateway instance.
pub struct Gateway {
    pub(crate) config: GatewayConfig,
    pub(crate) registry: Arc<ClientRegistry>,
    pub(crate) dispatcher: Arc<Dispatcher>,
    pub(crate) shutdown_tx: broadcast::Sender<()>,
}

impl Gateway {
    /// Create a gateway with a frozen handler set.
    pub fn new(config: GatewayConfig, handlers: HandlerRegistry) -> Arc<Self> {
        let registry = Arc::new(ClientRegistry::new());
        let dispatcher = Arc::new(Dispatcher::new(handlers, registry.clone()));
        let (shutdown_tx, _) = broadcast::channel(1);
        Arc::new(Self {
            config,
            registry,
            dispatcher,
            shutdown_tx,
        })
    }

    /// Access the client registry.
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Bind the listen socket. Returns the running half; the bound
    /// address is available even when the configured port was 0.
    pub async fn bind(self: Arc<Self>) -> GateResult<BoundGateway> {
        let addr: SocketAddr = format!("{}:{}", self.config.listen_addr, self.config.port)
            .parse()
            .map_err(|e| GateError::Other(format!("invalid listen address: {e}")))?;
        let (local_addr, conn_rx) = transport::start_listener(addr).await?;
        Ok(BoundGateway {
            gateway: self,
            local_addr,
            conn_rx,
        })
    }

    /// Send one envelope to every currently-open connection.
    ///
    /// The frame is encoded once. Connections that are no longer
    /// writable (mid-teardown) are silently skipped. Returns the number
    /// of deliveries issued.
    pub async fn broadcast(&self, envelope: &ResponseEnvelope) -> GateResult<usize> {
        let frame = codec::encode(envelope)?;
        let mut delivered = 0;
        for record in self.registry.all().await {
            if record.sender.send(ConnCommand::Frame(frame.clone())).is_ok() {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Send one envelope to one connection. Fire-and-forget: `true`
    /// means the write was issued, not that the peer received it.
    pub async fn send_to(&self, client_id: &str, envelope: &ResponseEnvelope) -> GateResult<bool> {
        let frame = codec::encode(envelope)?;
        Ok(match self.registry.get(client_id).await {
            Some(record) => record.sender.send(ConnCommand::Frame(frame)).is_ok(),
            None => false,
        })
    }

    /// Signal every connection task and the sweeper to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// A gateway with its listen socket bound, ready to serve.
pub struct BoundGateway {
    gateway: Arc<Gateway>,
    local_addr: SocketAddr,
    conn_rx: mpsc::Receiver<WebSocketConnection>,
}

impl BoundGateway {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept loop. Runs until shutdown is signalled or the listener
    /// task dies.
    pub async fn run(self) -> GateResult<()> {
        let BoundGateway {
            gateway,
            local_addr,
            mut conn_rx,
        } = self;

        let sweeper = Sweeper::new(
            gateway.registry.clone(),
            gateway.config.sweep_period(),
            gateway.config.stale_threshold(),
        );
        let sweeper_handle = sweeper.spawn(gateway.shutdown_tx.subscribe());

        info!(
            addr = %local_addr,
            sweep_period_secs = gateway.config.sweep_period_secs,
            stale_threshold_secs = gateway.config.stale_threshold_secs,
            "wsgate ready"
        );

        let mut shutdown_rx = gateway.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                maybe_conn = conn_rx.recv() => match maybe_conn {
                    Some(conn) => {
                        if gateway.registry.count().await >= gateway.config.max_connections {
                            warn!(
                                remote = %conn.remote_addr,
                                limit = gateway.config.max_connections,
                                "connection limit reached, refusing"
                            );
                            tokio::spawn(async move {
                                let mut ws = conn.ws_stream;
                                let _ = ws.close(None).await;
                            });
                            continue;
                        }
                        tokio::spawn(connection::run_connection(gateway.clone(), conn));
                    }
                    None => {
                        info!("listener closed, shutting down");
                        break;
                    }
                },
                _ = shutdown_rx.recv() => break,
            }
        }

        // Make sure connection tasks and the sweeper see the stop signal
        // even when the loop ended for another reason.
        let _ = gateway.shutdown_tx.send(());
        let _ = sweeper_handle.await;

        Ok(())
    }
}
