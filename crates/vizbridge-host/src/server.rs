//! Bridge listener -- TCP accept loop serving exactly one client at a time.
//!
//! The serve loop owns the [`RequestHandler`]. Requests are handled in
//! arrival order on the loop itself, so every touch of the executor,
//! the history, and the host state comes from one control flow.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use vizbridge_protocol::{
    encode_message, error_codes, is_loopback_host, write_message, ErrorBody, FrameBuffer,
    Message, ProtocolError, Response, DEFAULT_HOST, DEFAULT_PORT, MAX_FRAME_BYTES,
};

use crate::capabilities::{HostState, ScriptRuntime};
use crate::handler::{busy_response, protocol_error, HandlerOutcome, RequestHandler};

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("invalid listen configuration: {0}")]
    InvalidConfig(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where and how the bridge listens.
#[derive(Debug, Clone)]
pub struct ListenConfig {
    pub host: String,
    pub port: u16,
    /// Shared secret expected in `hello`. Empty means no token.
    pub auth_token: String,
    pub max_frame_bytes: usize,
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.into(),
            port: DEFAULT_PORT,
            auth_token: String::new(),
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl ListenConfig {
    /// Check the config and resolve the bind address.
    pub fn validate(&self) -> Result<SocketAddr, ServerError> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err(ServerError::InvalidConfig("bridge host cannot be empty".into()));
        }
        if !is_loopback_host(host) && self.auth_token.is_empty() {
            return Err(ServerError::InvalidConfig(format!(
                "an auth token is required when listening on non-loopback host {host}"
            )));
        }

        let ip = if host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::LOCALHOST)
        } else {
            host.parse::<IpAddr>().map_err(|_| {
                ServerError::InvalidConfig(format!(
                    "bridge host must be 'localhost' or a literal IP address, got {host}"
                ))
            })?
        };
        Ok(SocketAddr::new(ip, self.port))
    }
}

struct ActiveClient {
    stream: TcpStream,
    peer: SocketAddr,
    frames: FrameBuffer,
    handshake_complete: bool,
}

pub struct BridgeServer {
    listener: TcpListener,
    max_frame_bytes: usize,
}

impl BridgeServer {
    pub async fn bind(config: &ListenConfig) -> Result<Self, ServerError> {
        let addr = config.validate()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "bridge listening");
        Ok(Self {
            listener,
            max_frame_bytes: config.max_frame_bytes,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until a shutdown signal arrives.
    pub async fn run<R, S>(
        self,
        mut handler: RequestHandler<R, S>,
        mut shutdown: broadcast::Receiver<()>,
    ) where
        R: ScriptRuntime,
        S: HostState,
    {
        let mut active: Option<ActiveClient> = None;

        loop {
            tokio::select! {
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) if active.is_some() => {
                            tracing::warn!(%peer, "rejecting client, bridge is busy");
                            self.reject_busy(stream).await;
                        }
                        Ok((stream, peer)) => {
                            tracing::info!(%peer, "client connected");
                            active = Some(ActiveClient {
                                stream,
                                peer,
                                frames: FrameBuffer::new(self.max_frame_bytes),
                                handshake_complete: false,
                            });
                        }
                        Err(e) => {
                            tracing::warn!("failed to accept connection: {e}");
                        }
                    }
                }
                read = read_chunk(&mut active) => {
                    let Some(mut client) = active.take() else {
                        continue;
                    };
                    match read {
                        Ok(0) => {
                            tracing::info!(peer = %client.peer, "client disconnected");
                            reset(&mut handler);
                        }
                        Ok(_) => {
                            if self.serve_frames(&mut client, &mut handler).await {
                                active = Some(client);
                            } else {
                                tracing::info!(peer = %client.peer, "closing client connection");
                                reset(&mut handler);
                            }
                        }
                        Err(e) => {
                            tracing::warn!(peer = %client.peer, "client read failed: {e}");
                            reset(&mut handler);
                        }
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("shutdown signal, stopping bridge listener");
                    break;
                }
            }
        }
    }

    /// Handle every complete frame buffered for `client`.
    /// Returns false when the connection must be closed.
    async fn serve_frames<R, S>(
        &self,
        client: &mut ActiveClient,
        handler: &mut RequestHandler<R, S>,
    ) -> bool
    where
        R: ScriptRuntime,
        S: HostState,
    {
        let messages = match client.frames.drain() {
            Ok(messages) => messages,
            Err(e) => {
                tracing::warn!(peer = %client.peer, error = %e, "protocol error on client stream");
                let outcome = protocol_error(e.to_string());
                self.apply(client, outcome).await;
                return false;
            }
        };

        for message in messages {
            let outcome = handler.handle(message, client.handshake_complete);
            if !self.apply(client, outcome).await {
                return false;
            }
        }
        true
    }

    /// Send the outcome's response and update connection state.
    /// Returns false when the connection must be closed.
    async fn apply(&self, client: &mut ActiveClient, outcome: HandlerOutcome) -> bool {
        if let Some(response) = outcome.response {
            if let Err(e) = self.send(&mut client.stream, response).await {
                tracing::warn!(peer = %client.peer, "failed to send response: {e}");
                return false;
            }
        }
        if outcome.handshake_completed {
            client.handshake_complete = true;
            tracing::info!(peer = %client.peer, "handshake complete");
        }
        !(outcome.close_connection || outcome.reset_session)
    }

    async fn send(&self, stream: &mut TcpStream, response: Message) -> Result<(), ProtocolError> {
        let frame = match encode_message(&response, self.max_frame_bytes) {
            Ok(frame) => frame,
            // A reply too large for the frame limit becomes an error reply.
            Err(ProtocolError::FrameTooLarge { size, max }) => {
                let request_id = response
                    .get("request_id")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                let error = Response::error(
                    request_id,
                    ErrorBody::new(
                        error_codes::PROTOCOL_ERROR,
                        format!("response of {size} bytes exceeds the frame limit of {max} bytes"),
                    ),
                );
                encode_message(&error.into_message(), self.max_frame_bytes)?
            }
            Err(e) => return Err(e),
        };
        stream.write_all(&frame).await?;
        stream.flush().await?;
        Ok(())
    }

    async fn reject_busy(&self, mut stream: TcpStream) {
        let busy = busy_response();
        if let Err(e) = write_message(&mut stream, &busy, self.max_frame_bytes).await {
            tracing::debug!("failed to notify busy client: {e}");
        }
    }
}

async fn read_chunk(active: &mut Option<ActiveClient>) -> std::io::Result<usize> {
    match active {
        Some(client) => client.stream.read_buf(client.frames.buffer_mut()).await,
        None => std::future::pending().await,
    }
}

fn reset<R: ScriptRuntime, S: HostState>(handler: &mut RequestHandler<R, S>) {
    if let Err(fault) = handler.reset_session() {
        tracing::warn!(error = %fault, "session reset could not build a fresh environment");
    }
}
