//! QUIC transport for the client.
//!
//! Every request goes out on its own bidirectional stream, finished after one
//! frame. The server answers on a single unidirectional stream per
//! connection, shared with live pushes; replies are matched to requests by
//! the frame's request id and pushes carry request id 0.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use parley_proto::{
    ALPN_PROTOCOL, ErrorPayload, Frame, FrameHeader, Payload, StoredMessage, UserId, UserSummary,
    replies::{History, PublicKeyReply, Sent, UserList, UserRegistered},
    requests::{FetchHistory, LookupPublicKey, Register, RegisterUser, SendMessage},
};
use quinn::{ClientConfig, Endpoint, RecvStream};
use tokio::sync::{mpsc, oneshot};

use crate::{ClientError, KeyDirectory};

/// Capacity of the push queue. Pushes beyond it are dropped.
pub const PUSH_QUEUE_CAPACITY: usize = 256;

type Pending = Arc<Mutex<HashMap<u32, oneshot::Sender<Payload>>>>;

/// Connection settings.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Name presented for TLS
    pub server_name: String,
    /// Limit on the QUIC handshake
    pub connect_timeout: Duration,
    /// Limit on waiting for one reply
    pub request_timeout: Duration,
    /// Idle timeout negotiated with the server
    pub idle_timeout: Duration,
}

impl TransportConfig {
    /// Settings for a local development server with a self-signed certificate.
    pub fn development() -> Self {
        Self {
            server_name: "localhost".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::development()
    }
}

/// Handle to a connected relay.
pub struct ConnectedClient {
    endpoint: Endpoint,
    connection: quinn::Connection,
    pending: Pending,
    next_request_id: AtomicU32,
    pushes: Mutex<Option<mpsc::Receiver<Payload>>>,
    request_timeout: Duration,
    reader: tokio::task::AbortHandle,
}

/// Connect to a relay with [`TransportConfig::development`].
pub async fn connect(server_addr: &str) -> Result<ConnectedClient, ClientError> {
    ConnectedClient::connect_with_config(server_addr, TransportConfig::development()).await
}

impl ConnectedClient {
    /// Connect to a relay at `server_addr`.
    pub async fn connect_with_config(
        server_addr: &str,
        config: TransportConfig,
    ) -> Result<Self, ClientError> {
        let addr: SocketAddr = server_addr
            .parse()
            .map_err(|e| ClientError::Transport(format!("invalid address: {e}")))?;

        let bind: SocketAddr = if addr.is_ipv6() {
            SocketAddr::from(([0u16; 8], 0))
        } else {
            SocketAddr::from(([0u8; 4], 0))
        };
        let mut endpoint = Endpoint::client(bind)
            .map_err(|e| ClientError::Transport(format!("endpoint creation failed: {e}")))?;
        endpoint.set_default_client_config(insecure_client_config(config.idle_timeout)?);

        let connecting = endpoint
            .connect(addr, &config.server_name)
            .map_err(|e| ClientError::Transport(format!("connect failed: {e}")))?;
        let connection = match tokio::time::timeout(config.connect_timeout, connecting).await {
            Ok(Ok(connection)) => connection,
            Ok(Err(e)) => return Err(ClientError::Transport(format!("connection failed: {e}"))),
            Err(_) => return Err(ClientError::Transport("connect timed out".to_string())),
        };

        let pending: Pending = Arc::new(Mutex::new(HashMap::new()));
        let (push_tx, push_rx) = mpsc::channel(PUSH_QUEUE_CAPACITY);
        let reader = tokio::spawn(read_frames(connection.clone(), Arc::clone(&pending), push_tx));

        tracing::debug!(%addr, "connected");

        Ok(Self {
            endpoint,
            connection,
            pending,
            next_request_id: AtomicU32::new(1),
            pushes: Mutex::new(Some(push_rx)),
            request_timeout: config.request_timeout,
            reader: reader.abort_handle(),
        })
    }

    /// Server pushes: presence changes and live deliveries.
    ///
    /// The receiver can be taken once; later calls return `None`. Pushes are
    /// dropped while nobody drains it and the queue is full.
    pub fn take_pushes(&self) -> Option<mpsc::Receiver<Payload>> {
        self.pushes.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    /// Send `payload` and wait for the matching reply.
    ///
    /// An `Error` reply becomes [`ClientError::Server`].
    pub async fn request(&self, payload: Payload) -> Result<Payload, ClientError> {
        let request_id = self.allocate_request_id();
        let bytes = payload.into_frame(request_id)?.to_vec()?;

        let (tx, rx) = oneshot::channel();
        self.lock_pending().insert(request_id, tx);
        let result = self.exchange(&bytes, rx).await;
        self.lock_pending().remove(&request_id);

        match result? {
            Payload::Error(error) => Err(ClientError::Server(error)),
            reply => Ok(reply),
        }
    }

    /// Bind this connection to `user_id` so it receives live pushes.
    pub async fn register(&self, user_id: UserId) -> Result<(), ClientError> {
        match self.request(Payload::Register(Register { user_id })).await? {
            Payload::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    /// Submit an already sealed message.
    pub async fn send(&self, message: SendMessage) -> Result<StoredMessage, ClientError> {
        match self.request(Payload::Send(message)).await? {
            Payload::Sent(Sent { message }) => Ok(message),
            other => Err(unexpected(&other)),
        }
    }

    /// Every registered user with current presence.
    pub async fn list_users(&self) -> Result<Vec<UserSummary>, ClientError> {
        match self.request(Payload::ListUsers).await? {
            Payload::UserList(UserList { users }) => Ok(users),
            other => Err(unexpected(&other)),
        }
    }

    /// One page of history starting at `cursor`, with the cursor of the
    /// next page if there is one.
    pub async fn fetch_history_page(
        &self,
        user_id: UserId,
        peer_id: UserId,
        cursor: Option<u64>,
    ) -> Result<(Vec<StoredMessage>, Option<u64>), ClientError> {
        let request = Payload::FetchHistory(FetchHistory { user_id, peer_id, cursor });
        match self.request(request).await? {
            Payload::History(History { messages, next }) => Ok((messages, next)),
            other => Err(unexpected(&other)),
        }
    }

    /// Every message between `user_id` and `peer_id`, oldest first.
    ///
    /// Follows the relay's page cursors until the last page.
    pub async fn fetch_history(
        &self,
        user_id: UserId,
        peer_id: UserId,
    ) -> Result<Vec<StoredMessage>, ClientError> {
        let mut messages = Vec::new();
        let mut cursor = None;
        loop {
            let (page, next) = self.fetch_history_page(user_id, peer_id, cursor).await?;
            messages.extend(page);
            match next {
                Some(n) if cursor.is_none_or(|c| n > c) => cursor = Some(n),
                Some(n) => {
                    return Err(ClientError::Transport(format!(
                        "history cursor did not advance past {n}"
                    )));
                },
                None => return Ok(messages),
            }
        }
    }

    /// Address of the relay
    pub fn remote_addr(&self) -> SocketAddr {
        self.connection.remote_address()
    }

    /// Close the connection. Outstanding requests fail with a transport
    /// error.
    pub fn close(&self) {
        self.connection.close(0u32.into(), b"client closed");
        self.reader.abort();
        self.lock_pending().clear();
        self.endpoint.close(0u32.into(), b"client closed");
    }

    async fn exchange(
        &self,
        bytes: &[u8],
        reply: oneshot::Receiver<Payload>,
    ) -> Result<Payload, ClientError> {
        let (mut send, _recv) = self
            .connection
            .open_bi()
            .await
            .map_err(|e| ClientError::Transport(format!("open stream failed: {e}")))?;
        send.write_all(bytes)
            .await
            .map_err(|e| ClientError::Transport(format!("write failed: {e}")))?;
        send.finish().map_err(|e| ClientError::Transport(format!("finish failed: {e}")))?;

        match tokio::time::timeout(self.request_timeout, reply).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(ClientError::Transport("connection closed".to_string())),
            Err(_) => Err(ClientError::Transport("request timed out".to_string())),
        }
    }

    fn allocate_request_id(&self) -> u32 {
        loop {
            let id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
            // 0 is reserved for pushes
            if id != 0 {
                return id;
            }
        }
    }

    fn lock_pending(&self) -> MutexGuard<'_, HashMap<u32, oneshot::Sender<Payload>>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Drop for ConnectedClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

#[async_trait]
impl KeyDirectory for ConnectedClient {
    async fn register_user(
        &self,
        username: &str,
        public_key: &str,
    ) -> Result<UserSummary, ClientError> {
        let request = RegisterUser {
            username: username.to_string(),
            public_key: public_key.to_string(),
        };
        match self.request(Payload::RegisterUser(request)).await? {
            Payload::UserRegistered(UserRegistered { user }) => Ok(user),
            other => Err(unexpected(&other)),
        }
    }

    async fn lookup_public_key(&self, user_id: UserId) -> Result<Option<String>, ClientError> {
        match self.request(Payload::LookupPublicKey(LookupPublicKey { user_id })).await {
            Ok(Payload::PublicKey(PublicKeyReply { public_key, .. })) => Ok(Some(public_key)),
            Ok(other) => Err(unexpected(&other)),
            Err(ClientError::Server(error)) if error.code == ErrorPayload::NOT_FOUND => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn unexpected(payload: &Payload) -> ClientError {
    ClientError::Transport(format!("unexpected reply: {:?}", payload.opcode()))
}

/// Route frames from the server's outbound stream until it ends.
async fn read_frames(
    connection: quinn::Connection,
    pending: Pending,
    pushes: mpsc::Sender<Payload>,
) {
    // The server's stream becomes visible once it writes the first frame.
    let mut recv = match connection.accept_uni().await {
        Ok(recv) => recv,
        Err(e) => {
            tracing::debug!(error = %e, "connection closed before any reply");
            pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
            return;
        },
    };

    loop {
        let frame = match read_frame(&mut recv).await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "server stream failed");
                break;
            },
        };

        let payload = match Payload::from_frame(&frame) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(request_id = frame.request_id(), error = %e, "undecodable frame");
                continue;
            },
        };

        if frame.request_id() == 0 {
            if let Err(e) = pushes.try_send(payload) {
                tracing::warn!(error = %e, "push dropped");
            }
            continue;
        }

        let waiter =
            pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&frame.request_id());
        match waiter {
            // The requester may have timed out already.
            Some(waiter) => {
                let _ = waiter.send(payload);
            },
            None => tracing::debug!(request_id = frame.request_id(), "reply without waiter"),
        }
    }

    // Dropping the senders fails every outstanding request.
    pending.lock().unwrap_or_else(PoisonError::into_inner).clear();
}

/// Next frame from `recv`, or `None` on a clean end of stream.
async fn read_frame(recv: &mut RecvStream) -> Result<Option<Frame>, ClientError> {
    let mut header = [0u8; FrameHeader::SIZE];
    match recv.read_exact(&mut header).await {
        Ok(()) => {},
        Err(quinn::ReadExactError::FinishedEarly(0)) => return Ok(None),
        Err(e) => return Err(ClientError::Transport(format!("header read failed: {e}"))),
    }

    let payload_size = FrameHeader::from_bytes(&header)?.payload_size() as usize;
    let mut buf = vec![0u8; FrameHeader::SIZE + payload_size];
    buf[..FrameHeader::SIZE].copy_from_slice(&header);

    if payload_size > 0 {
        recv.read_exact(&mut buf[FrameHeader::SIZE..])
            .await
            .map_err(|e| ClientError::Transport(format!("payload read failed: {e}")))?;
    }

    Ok(Some(Frame::decode(&buf)?))
}

/// Create an insecure client config that accepts any certificate.
///
/// WARNING: Development only. Production should verify certificates.
fn insecure_client_config(idle_timeout: Duration) -> Result<ClientConfig, ClientError> {
    let mut crypto = rustls::ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(InsecureCertVerifier))
        .with_no_client_auth();

    // Must match server's ALPN protocol
    crypto.alpn_protocols = vec![ALPN_PROTOCOL.to_vec()];

    let quic = quinn::crypto::rustls::QuicClientConfig::try_from(crypto)
        .map_err(|e| ClientError::Transport(format!("QUIC TLS config failed: {e}")))?;
    let mut config = ClientConfig::new(Arc::new(quic));

    let idle = idle_timeout
        .try_into()
        .map_err(|e| ClientError::Transport(format!("invalid idle timeout: {e}")))?;
    let mut transport = quinn::TransportConfig::default();
    transport.max_idle_timeout(Some(idle));
    config.transport_config(Arc::new(transport));

    Ok(config)
}

/// Certificate verifier that accepts any certificate (insecure, for
/// development).
#[derive(Debug)]
struct InsecureCertVerifier;

impl rustls::client::danger::ServerCertVerifier for InsecureCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &rustls::pki_types::CertificateDer<'_>,
        _intermediates: &[rustls::pki_types::CertificateDer<'_>],
        _server_name: &rustls::pki_types::ServerName<'_>,
        _ocsp_response: &[u8],
        _now: rustls::pki_types::UnixTime,
    ) -> Result<rustls::client::danger::ServerCertVerified, rustls::Error> {
        Ok(rustls::client::danger::ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &rustls::pki_types::CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        Ok(rustls::client::danger::HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        vec![
            rustls::SignatureScheme::RSA_PKCS1_SHA256,
            rustls::SignatureScheme::RSA_PKCS1_SHA384,
            rustls::SignatureScheme::RSA_PKCS1_SHA512,
            rustls::SignatureScheme::ECDSA_NISTP256_SHA256,
            rustls::SignatureScheme::ECDSA_NISTP384_SHA384,
            rustls::SignatureScheme::ECDSA_NISTP521_SHA512,
            rustls::SignatureScheme::RSA_PSS_SHA256,
            rustls::SignatureScheme::RSA_PSS_SHA384,
            rustls::SignatureScheme::RSA_PSS_SHA512,
            rustls::SignatureScheme::ED25519,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn development_config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.server_name, "localhost");
        assert!(config.request_timeout > Duration::ZERO);
    }

    #[test]
    fn insecure_config_builds() {
        assert!(insecure_client_config(Duration::from_secs(30)).is_ok());
    }

    #[tokio::test]
    async fn invalid_address_is_transport_error() {
        let result = connect("not an address").await;
        assert!(matches!(result, Err(ClientError::Transport(_))));
    }
}
