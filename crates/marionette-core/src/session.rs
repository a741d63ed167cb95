//! Per-connection session coordinator.
//!
//! [`SessionCoordinator`] owns one Marionette connection and walks it through
//! a fixed state machine:
//!
//! ```text
//! Disconnected -> Connecting -> AwaitingGreeting -> NegotiatingActor -> Ready -> Closed
//! ```
//!
//! 1. **Connecting**: try every discovered endpoint in order, pausing after
//!    each failure, until one accepts or the overall deadline passes.
//! 2. **AwaitingGreeting**: Marionette sends an unsolicited greeting on
//!    every fresh connection; it is read and discarded before anything is
//!    sent.
//! 3. **NegotiatingActor**: ask `root` for the actor id that every later
//!    message is addressed to.
//! 4. **Ready**: commands are rewritten, sent, and their replies normalized,
//!    one at a time.
//!
//! Skipping the greeting or the actor request leaves unread bytes on the
//! stream and every later frame boundary is then wrong, so any transport or
//! protocol failure closes the session for good.
//!
//! # Example
//!
//! ```no_run
//! use marionette_core::command::{names, Command};
//! use marionette_core::config::BridgeConfig;
//! use marionette_core::session::SessionCoordinator;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = SessionCoordinator::new();
//! session.connect(&BridgeConfig::default()).await?;
//!
//! let created = session.dispatch(Command::new(names::NEW_SESSION)).await?;
//! let response = session
//!     .dispatch(
//!         Command::new(names::GET)
//!             .with_optional_session(created.session_id().cloned())
//!             .with_param("url", "http://example.test/"),
//!     )
//!     .await?;
//! assert!(response.is_success());
//! session.close().await;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, debug_span, info, trace, warn, Instrument};

use crate::command::Command;
use crate::config::BridgeConfig;
use crate::discovery::{discover_endpoints, DiscoveryError};
use crate::launcher::LaunchError;
use crate::protocol::ProtocolError;
use crate::response::{decode_actor_id, normalize, NormalizedResponse};
use crate::rewrite::{ActorId, RewriteTable, WireEnvelope};
use crate::transport::{FramedTransport, PeerStream, TransportError};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where a connection is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    AwaitingGreeting,
    NegotiatingActor,
    Ready,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::AwaitingGreeting => "awaiting greeting",
            SessionState::NegotiatingActor => "negotiating actor",
            SessionState::Ready => "ready",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Fatal session errors. Peer-reported command failures are not errors;
/// they come back as a [`NormalizedResponse`] with a non-success status.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The socket failed or a frame header was malformed.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// No endpoint accepted a connection before the deadline.
    #[error("could not connect to any of {endpoints:?} within {waited:?}")]
    ConnectionTimeout {
        endpoints: Vec<SocketAddr>,
        waited: Duration,
    },

    /// A reply was not valid JSON or lacked a required field.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Candidate endpoints could not be determined.
    #[error("endpoint discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// The operation is not valid in the current state.
    #[error("session is not ready (state: {0})")]
    NotReady(SessionState),

    /// The session was closed, explicitly or by an earlier fatal error.
    #[error("session is closed")]
    Closed,

    /// The automation target could not be started or stopped.
    #[error("launcher error: {0}")]
    Launch(#[from] LaunchError),
}

// ---------------------------------------------------------------------------
// Connection establishment
// ---------------------------------------------------------------------------

/// Try `endpoints` in order until one accepts, pausing `retry_interval`
/// after every failed attempt, for at most `deadline` overall.
pub async fn connect_with_retry(
    endpoints: &[SocketAddr],
    deadline: Duration,
    retry_interval: Duration,
) -> Result<(TcpStream, SocketAddr), SessionError> {
    let started = Instant::now();
    let give_up = started + deadline;

    while !endpoints.is_empty() {
        for &endpoint in endpoints {
            let remaining = give_up.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match timeout(remaining, TcpStream::connect(endpoint)).await {
                Ok(Ok(stream)) => {
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!(error = %e, "could not disable Nagle");
                    }
                    debug!(%endpoint, elapsed = ?started.elapsed(), "connected");
                    return Ok((stream, endpoint));
                }
                Ok(Err(e)) => trace!(%endpoint, error = %e, "connect attempt failed"),
                Err(_) => trace!(%endpoint, "connect attempt timed out"),
            }

            let remaining = give_up.saturating_duration_since(Instant::now());
            sleep(retry_interval.min(remaining)).await;
        }

        if Instant::now() >= give_up {
            break;
        }
    }

    Err(SessionError::ConnectionTimeout {
        endpoints: endpoints.to_vec(),
        waited: started.elapsed(),
    })
}

// ---------------------------------------------------------------------------
// SessionCoordinator
// ---------------------------------------------------------------------------

type Transport = FramedTransport<Box<dyn PeerStream>>;

/// One Marionette connection and its handshake state.
///
/// Dispatch takes `&mut self`, so commands on one coordinator are strictly
/// sequential. Concurrent sessions each need their own coordinator.
pub struct SessionCoordinator {
    state: SessionState,
    transport: Option<Transport>,
    actor: Option<ActorId>,
    rewriter: RewriteTable,
    peer: Option<SocketAddr>,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionCoordinator {
    /// A disconnected coordinator using the standard rewrite table.
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            transport: None,
            actor: None,
            rewriter: RewriteTable::standard(),
            peer: None,
        }
    }

    /// Replace the rewrite table.
    pub fn with_rewrite_table(mut self, rewriter: RewriteTable) -> Self {
        self.rewriter = rewriter;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    /// The negotiated actor id; `None` until the handshake completes.
    pub fn actor_id(&self) -> Option<&ActorId> {
        self.actor.as_ref()
    }

    /// The endpoint the connection was made to, for TCP connections.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn rewrite_table(&self) -> &RewriteTable {
        &self.rewriter
    }

    /// Discover endpoints, connect with retry, and run the handshake.
    pub async fn connect(&mut self, config: &BridgeConfig) -> Result<(), SessionError> {
        self.expect_disconnected()?;
        self.state = SessionState::Connecting;
        info!(host = %config.host, port = config.port, "connecting to marionette");

        let connected = async {
            let endpoints = discover_endpoints(&config.host, config.port).await?;
            connect_with_retry(&endpoints, config.connect_timeout(), config.retry_interval()).await
        }
        .await;

        let (stream, endpoint) = match connected {
            Ok(connected) => connected,
            Err(e) => {
                warn!(error = %e, "connection failed");
                self.state = SessionState::Closed;
                return Err(e);
            }
        };

        self.peer = Some(endpoint);
        let transport = FramedTransport::new(Box::new(stream) as Box<dyn PeerStream>)
            .with_chunk_size(config.chunk_size)
            .with_read_timeout(config.read_timeout());
        self.handshake(transport).await
    }

    /// Run the handshake over an already-connected stream.
    pub async fn attach<S: PeerStream + 'static>(
        &mut self,
        stream: S,
        config: &BridgeConfig,
    ) -> Result<(), SessionError> {
        self.expect_disconnected()?;
        self.state = SessionState::Connecting;
        let transport = FramedTransport::new(Box::new(stream) as Box<dyn PeerStream>)
            .with_chunk_size(config.chunk_size)
            .with_read_timeout(config.read_timeout());
        self.handshake(transport).await
    }

    async fn handshake(&mut self, mut transport: Transport) -> Result<(), SessionError> {
        let span = debug_span!("handshake");
        let result = async {
            self.state = SessionState::AwaitingGreeting;
            let greeting = transport.receive().await?;
            debug!(greeting = %String::from_utf8_lossy(&greeting), "discarded greeting");

            self.state = SessionState::NegotiatingActor;
            let request = WireEnvelope::actor_request().to_bytes().map_err(ProtocolError::from)?;
            transport.send(&request).await?;
            let reply = transport.receive().await?;
            Ok::<ActorId, SessionError>(decode_actor_id(&reply)?)
        }
        .instrument(span)
        .await;

        match result {
            Ok(actor) => {
                info!(%actor, "session ready");
                self.actor = Some(actor);
                self.transport = Some(transport);
                self.state = SessionState::Ready;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, state = %self.state, "handshake failed");
                if let Err(shutdown_err) = transport.shutdown().await {
                    debug!(error = %shutdown_err, "shutdown after failed handshake");
                }
                self.state = SessionState::Closed;
                Err(e)
            }
        }
    }

    /// Send one command and return its normalized reply.
    ///
    /// Peer-reported errors come back as `Ok` with a non-success status.
    /// Transport and protocol failures close the session, and so does
    /// dropping the returned future before it completes: the transport is
    /// only handed back after a full round trip.
    pub async fn dispatch(&mut self, command: Command) -> Result<NormalizedResponse, SessionError> {
        match self.state {
            SessionState::Ready => {}
            SessionState::Closed => return Err(SessionError::Closed),
            other => return Err(SessionError::NotReady(other)),
        }

        let name = command.name.clone();
        let envelope = self.rewriter.rewrite(command, self.actor.as_ref());
        let span = debug_span!("dispatch", command = %name, wire_name = %envelope.kind);

        let mut transport = self.transport.take().ok_or(SessionError::Closed)?;
        self.state = SessionState::Closed;

        match round_trip(&mut transport, &envelope, &name).instrument(span).await {
            Ok(response) => {
                self.transport = Some(transport);
                self.state = SessionState::Ready;
                Ok(response)
            }
            Err(e) => {
                warn!(command = %name, error = %e, "dispatch failed, closing session");
                if let Err(shutdown_err) = transport.shutdown().await {
                    debug!(error = %shutdown_err, "shutdown after failed dispatch");
                }
                self.actor = None;
                Err(e)
            }
        }
    }

    /// Close the socket. Further dispatches fail with [`SessionError::Closed`].
    pub async fn close(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.shutdown().await {
                debug!(error = %e, "shutdown after close");
            }
            info!("session closed");
        }
        self.actor = None;
        self.state = SessionState::Closed;
    }

    fn expect_disconnected(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Disconnected => Ok(()),
            SessionState::Closed => Err(SessionError::Closed),
            other => Err(SessionError::NotReady(other)),
        }
    }
}

async fn round_trip(
    transport: &mut Transport,
    envelope: &WireEnvelope,
    name: &str,
) -> Result<NormalizedResponse, SessionError> {
    let payload = envelope.to_bytes().map_err(ProtocolError::from)?;
    transport.send(&payload).await?;
    let raw = transport.receive().await?;
    let response = normalize(&raw, name)?;
    debug!(status = %response.status(), "command complete");
    Ok(response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
