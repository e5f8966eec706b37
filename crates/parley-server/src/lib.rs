//! Parley relay server.
//!
//! Relays end-to-end encrypted messages between pairs of users over QUIC. The
//! server never holds a private key and never sees plaintext: it stores
//! opaque ciphertext, hands out public keys, and tracks who is online.
//!
//! # Architecture
//!
//! ```text
//! QUIC connection ──frames──▶ ServerDriver ──▶ RelayService ──▶ Storage
//!        ▲                         │                │
//!        │                         ▼                ▼
//!   writer task ◀── ConnectionHub ◀── PresenceRegistry (push events)
//! ```
//!
//! # Components
//!
//! - [`ServerDriver`]: request dispatch, no sockets
//! - [`PresenceRegistry`]: user → connection map with status broadcasts
//! - [`RelayService`]: persist, then best-effort live delivery
//! - [`DirectoryService`]: user registration and public key lookup
//! - [`Storage`] / [`Directory`]: persistence collaborators (memory, redb)
//! - [`Server`]: production runtime over [`QuinnTransport`]
//! - [`SystemEnv`]: production environment (real time, crypto RNG)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod directory;
mod driver;
mod env;
mod error;
mod registry;
mod relay;
pub mod storage;
mod system_env;
pub mod transport;

use std::{net::SocketAddr, path::PathBuf, sync::Arc, time::Duration};

pub use directory::{DirectoryError, DirectoryService};
pub use driver::{ConnectionSession, ServerDriver};
pub use env::Environment;
pub use error::ServerError;
use parley_proto::{Frame, FrameHeader};
pub use registry::PresenceRegistry;
pub use relay::{RelayConfig, RelayError, RelayService};
pub use storage::{
    ChaoticStorage, Directory, MemoryStorage, RedbStorage, Storage, StorageError, UserRecord,
};
pub use system_env::SystemEnv;
use tokio::sync::Semaphore;
pub use transport::{
    ConnectionHandle, ConnectionHub, LiveTransport, PushError, PushEvent, QuinnConnection,
    QuinnTransport, RecordingTransport,
};

/// Server configuration for the production runtime.
#[derive(Debug, Clone)]
pub struct ServerRuntimeConfig {
    /// Address to bind to (e.g., "0.0.0.0:4433")
    pub bind_address: String,
    /// Path to TLS certificate (PEM format)
    pub cert_path: Option<PathBuf>,
    /// Path to TLS private key (PEM format)
    pub key_path: Option<PathBuf>,
    /// Redb database file; in-memory storage when absent
    pub database_path: Option<PathBuf>,
    /// Relay configuration (storage deadline)
    pub relay: RelayConfig,
    /// Maximum concurrent connections
    pub max_connections: usize,
    /// How long a request stream may sit idle mid-frame
    pub read_timeout: Duration,
}

impl Default for ServerRuntimeConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4433".to_string(),
            cert_path: None,
            key_path: None,
            database_path: None,
            relay: RelayConfig::default(),
            max_connections: 10_000,
            read_timeout: Duration::from_secs(30),
        }
    }
}

/// Production Parley server.
///
/// Wraps [`ServerDriver`] with Quinn QUIC transport and the system
/// environment.
pub struct Server<S> {
    driver: ServerDriver<S, ConnectionHub, SystemEnv>,
    hub: Arc<ConnectionHub>,
    transport: QuinnTransport,
    env: SystemEnv,
    connections: Arc<Semaphore>,
    read_timeout: Duration,
}

impl<S: Storage + Directory> Server<S> {
    /// Bind the QUIC endpoint and set up the driver over `storage`.
    ///
    /// Must be called inside a Tokio runtime.
    pub fn bind(config: ServerRuntimeConfig, storage: S) -> Result<Self, ServerError> {
        let env = SystemEnv::new();
        let hub = Arc::new(ConnectionHub::new());
        let driver = ServerDriver::new(storage, Arc::clone(&hub), env, config.relay);

        let transport = QuinnTransport::bind(
            &config.bind_address,
            config.cert_path.as_deref(),
            config.key_path.as_deref(),
        )?;

        Ok(Self {
            driver,
            hub,
            transport,
            env,
            connections: Arc::new(Semaphore::new(
                config.max_connections.clamp(1, Semaphore::MAX_PERMITS),
            )),
            read_timeout: config.read_timeout,
        })
    }

    /// Local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.transport.local_addr()
    }

    /// Driver, for inspecting presence in tests and tooling.
    pub fn driver(&self) -> &ServerDriver<S, ConnectionHub, SystemEnv> {
        &self.driver
    }

    /// Accept connections until the endpoint closes.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.transport.local_addr()?, "server starting");

        loop {
            let conn = match self.transport.accept().await {
                Ok(Some(conn)) => conn,
                Ok(None) => {
                    tracing::info!("endpoint closed, server stopping");
                    return Ok(());
                },
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    continue;
                },
            };

            let Ok(permit) = Arc::clone(&self.connections).try_acquire_owned() else {
                tracing::warn!(peer = %conn.remote_addr(), "connection limit reached");
                conn.close(1u32.into(), b"server full");
                continue;
            };

            let handle = ConnectionHandle(self.env.random_u64());
            let driver = self.driver.clone();
            let hub = Arc::clone(&self.hub);
            let read_timeout = self.read_timeout;

            tokio::spawn(async move {
                if let Err(e) = handle_connection(conn, handle, driver, hub, read_timeout).await {
                    tracing::debug!(%handle, error = %e, "connection ended with error");
                }
                drop(permit);
            });
        }
    }
}

/// Serve one QUIC connection until it closes.
async fn handle_connection<S: Storage + Directory>(
    conn: QuinnConnection,
    handle: ConnectionHandle,
    driver: ServerDriver<S, ConnectionHub, SystemEnv>,
    hub: Arc<ConnectionHub>,
    read_timeout: Duration,
) -> Result<(), ServerError> {
    tracing::debug!(%handle, peer = %conn.remote_addr(), "connection accepted");

    let outbound = conn.open_uni().await?;
    let queue = hub.attach(handle);
    let writer = tokio::spawn(write_frames(handle, outbound, queue));

    let mut session = ConnectionSession::new(handle);

    let result = loop {
        let mut recv = match conn.accept_bi().await {
            Ok((_send, recv)) => recv,
            Err(e) => {
                tracing::debug!(%handle, error = %e, "connection closed");
                break Ok(());
            },
        };

        if let Err(e) = serve_stream(&mut recv, &mut session, &driver, &hub, read_timeout).await {
            match e {
                ServerError::Protocol(_) => {
                    tracing::warn!(%handle, error = %e, "closing connection after bad frame");
                    conn.close(2u32.into(), b"protocol error");
                    break Err(e);
                },
                _ => tracing::debug!(%handle, error = %e, "stream ended"),
            }
        }
    };

    driver.close_session(&session);
    hub.detach(handle);
    writer.abort();

    result
}

/// Read frames from one request stream until the client finishes it.
async fn serve_stream<S: Storage + Directory>(
    recv: &mut quinn::RecvStream,
    session: &mut ConnectionSession,
    driver: &ServerDriver<S, ConnectionHub, SystemEnv>,
    hub: &ConnectionHub,
    read_timeout: Duration,
) -> Result<(), ServerError> {
    while let Some(frame) = read_frame(recv, read_timeout).await? {
        let reply = driver.handle_frame(session, &frame).await;
        if hub.reply(session.handle, reply).await.is_err() {
            return Err(ServerError::Transport("outbound queue closed".to_string()));
        }
    }
    Ok(())
}

/// Next frame from `recv`, or `None` on a clean end of stream.
async fn read_frame(
    recv: &mut quinn::RecvStream,
    read_timeout: Duration,
) -> Result<Option<Frame>, ServerError> {
    let mut header = [0u8; FrameHeader::SIZE];

    match tokio::time::timeout(read_timeout, recv.read_exact(&mut header)).await {
        Ok(Ok(())) => {},
        Ok(Err(quinn::ReadExactError::FinishedEarly(0))) => return Ok(None),
        Ok(Err(e)) => return Err(ServerError::Transport(format!("header read failed: {e}"))),
        Err(_) => return Err(ServerError::Transport("read timed out".to_string())),
    }

    let payload_size = FrameHeader::from_bytes(&header)?.payload_size() as usize;

    let mut buf = vec![0u8; FrameHeader::SIZE + payload_size];
    buf[..FrameHeader::SIZE].copy_from_slice(&header);

    if payload_size > 0 {
        match tokio::time::timeout(read_timeout, recv.read_exact(&mut buf[FrameHeader::SIZE..]))
            .await
        {
            Ok(Ok(())) => {},
            Ok(Err(e)) => return Err(ServerError::Transport(format!("payload read failed: {e}"))),
            Err(_) => return Err(ServerError::Transport("read timed out".to_string())),
        }
    }

    Ok(Some(Frame::decode(&buf)?))
}

/// Drain a connection's outbound queue onto its unidirectional stream.
async fn write_frames(
    handle: ConnectionHandle,
    mut outbound: quinn::SendStream,
    mut queue: tokio::sync::mpsc::Receiver<Frame>,
) {
    while let Some(frame) = queue.recv().await {
        let bytes = match frame.to_vec() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(%handle, error = %e, "dropping unencodable frame");
                continue;
            },
        };

        if let Err(e) = outbound.write_all(&bytes).await {
            tracing::debug!(%handle, error = %e, "outbound write failed");
            return;
        }
    }

    let _ = outbound.finish();
}
