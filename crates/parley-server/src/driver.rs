//! Server driver.
//!
//! Ties together the presence registry, relay and directory. Turns one
//! decoded request into one reply payload; the runtime owns sockets and
//! framing and calls in here once per frame. Pushes (presence, live delivery)
//! leave through the transport, never through the reply.

use std::sync::Arc;

use parley_proto::{
    ErrorPayload, Frame, FrameHeader, Payload, ProtocolError, UserId,
    replies::{History, PublicKeyReply, Sent, UserList, UserRegistered},
};

use crate::{
    directory::{DirectoryError, DirectoryService},
    env::Environment,
    registry::PresenceRegistry,
    relay::{RelayConfig, RelayError, RelayService},
    storage::{Directory, Storage},
    transport::{ConnectionHandle, LiveTransport},
};

/// Per-connection state owned by the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSession {
    /// Connection this session belongs to
    pub handle: ConnectionHandle,
    /// Identity bound with `Register`, if any
    pub user: Option<UserId>,
}

impl ConnectionSession {
    /// Fresh, unregistered session.
    pub fn new(handle: ConnectionHandle) -> Self {
        Self { handle, user: None }
    }
}

/// Request dispatcher shared by every connection.
///
/// Clone is cheap; clones share the registry and services.
pub struct ServerDriver<S, T, E> {
    registry: Arc<PresenceRegistry<T>>,
    relay: Arc<RelayService<S, T, E>>,
    directory: Arc<DirectoryService<S, T, E>>,
}

impl<S, T, E> Clone for ServerDriver<S, T, E> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
            relay: Arc::clone(&self.relay),
            directory: Arc::clone(&self.directory),
        }
    }
}

impl<S, T, E> ServerDriver<S, T, E>
where
    S: Storage + Directory,
    T: LiveTransport,
    E: Environment,
{
    /// Driver over `storage`, pushing through `transport`.
    pub fn new(storage: S, transport: Arc<T>, env: E, config: RelayConfig) -> Self {
        let registry = Arc::new(PresenceRegistry::new(transport));
        let relay = RelayService::new(storage.clone(), Arc::clone(&registry), env.clone(), config);
        let directory = DirectoryService::new(storage, Arc::clone(&registry), env, config);

        Self { registry, relay: Arc::new(relay), directory: Arc::new(directory) }
    }

    /// Presence registry.
    pub fn registry(&self) -> &PresenceRegistry<T> {
        &self.registry
    }

    /// Relay service.
    pub fn relay(&self) -> &RelayService<S, T, E> {
        &self.relay
    }

    /// Directory service.
    pub fn directory(&self) -> &DirectoryService<S, T, E> {
        &self.directory
    }

    /// Handle one raw frame and build the reply frame.
    ///
    /// The reply echoes the request id. Frames that fail to decode get an
    /// `INVALID_PAYLOAD` error reply rather than closing the connection.
    pub async fn handle_frame(&self, session: &mut ConnectionSession, frame: &Frame) -> Frame {
        let reply = match Payload::from_frame(frame) {
            Ok(payload) => self.handle_payload(session, payload).await,
            Err(e) => {
                tracing::warn!(handle = %session.handle, error = %e, "undecodable request");
                Payload::Error(protocol_error(&e))
            },
        };

        reply_frame(reply, frame.request_id())
    }

    /// Handle one decoded request and return the reply payload.
    pub async fn handle_payload(
        &self,
        session: &mut ConnectionSession,
        payload: Payload,
    ) -> Payload {
        match payload {
            Payload::Register(request) => {
                match self.directory.exists(request.user_id).await {
                    Ok(true) => {},
                    Ok(false) => {
                        return Payload::Error(ErrorPayload::not_found(format!(
                            "unknown user: {}",
                            request.user_id
                        )));
                    },
                    Err(e) => return Payload::Error(directory_error(&e)),
                }

                if session.user.is_some_and(|previous| previous != request.user_id) {
                    tracing::debug!(handle = %session.handle, user = %request.user_id, "session rebound");
                }

                self.registry.register(request.user_id, session.handle);
                session.user = Some(request.user_id);
                Payload::Ack
            },

            Payload::Send(request) => {
                let Some(sender) = session.user else {
                    return Payload::Error(ErrorPayload::not_registered());
                };

                match self.relay.submit(sender, request).await {
                    Ok(message) => Payload::Sent(Sent { message }),
                    Err(e) => Payload::Error(relay_error(&e)),
                }
            },

            Payload::RegisterUser(request) => {
                match self.directory.register_user(&request.username, &request.public_key).await {
                    Ok(user) => Payload::UserRegistered(UserRegistered { user }),
                    Err(e) => Payload::Error(directory_error(&e)),
                }
            },

            Payload::LookupPublicKey(request) => {
                match self.directory.public_key(request.user_id).await {
                    Ok(public_key) => {
                        Payload::PublicKey(PublicKeyReply { user_id: request.user_id, public_key })
                    },
                    Err(e) => Payload::Error(directory_error(&e)),
                }
            },

            Payload::ListUsers => match self.directory.list_users().await {
                Ok(users) => Payload::UserList(UserList { users }),
                Err(e) => Payload::Error(directory_error(&e)),
            },

            Payload::FetchHistory(request) => {
                let cursor = request.cursor.unwrap_or(0);
                match self.relay.fetch_history_page(request.user_id, request.peer_id, cursor).await
                {
                    Ok((messages, next)) => Payload::History(History { messages, next }),
                    Err(e) => Payload::Error(relay_error(&e)),
                }
            },

            other => Payload::Error(ErrorPayload::invalid_payload(format!(
                "{:?} is not a request",
                other.opcode()
            ))),
        }
    }

    /// Forget the session's presence, if it still owns any.
    pub fn close_session(&self, session: &ConnectionSession) {
        if let Some(user) = self.registry.unregister(session.handle) {
            tracing::debug!(handle = %session.handle, %user, "session closed");
        }
    }
}

/// Frame `reply` under `request_id`, replacing it with an error if it cannot
/// be sent.
fn reply_frame(reply: Payload, request_id: u32) -> Frame {
    let fallback = match reply.into_frame(request_id) {
        Ok(frame) if frame.payload.len() <= FrameHeader::MAX_PAYLOAD_SIZE as usize => {
            return frame;
        },
        Ok(frame) => ErrorPayload::invalid_payload(format!(
            "reply of {} bytes exceeds frame limit",
            frame.payload.len()
        )),
        Err(e) => ErrorPayload::invalid_payload(format!("reply encoding failed: {e}")),
    };

    let Ok(frame) = Payload::Error(fallback).into_frame(request_id) else {
        unreachable!("error payloads always encode");
    };
    frame
}

fn protocol_error(err: &ProtocolError) -> ErrorPayload {
    ErrorPayload::invalid_payload(err.to_string())
}

fn relay_error(err: &RelayError) -> ErrorPayload {
    match err {
        RelayError::Decode { .. } => ErrorPayload::decode(err.to_string()),
        RelayError::NotFound { .. } => ErrorPayload::not_found(err.to_string()),
        RelayError::Persistence(_) => ErrorPayload::persistence(err.to_string()),
    }
}

fn directory_error(err: &DirectoryError) -> ErrorPayload {
    match err {
        DirectoryError::Invalid { .. } => ErrorPayload::invalid_payload(err.to_string()),
        DirectoryError::Decode { .. } => ErrorPayload::decode(err.to_string()),
        DirectoryError::Conflict { .. } => ErrorPayload::conflict(err.to_string()),
        DirectoryError::NotFound { .. } => ErrorPayload::not_found(err.to_string()),
        DirectoryError::Persistence(_) => ErrorPayload::persistence(err.to_string()),
    }
}
