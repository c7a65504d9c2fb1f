//! Props store client.
//!
//! Fetches request-scoped props the backend computed, keyed by an opaque
//! per-request handle, over a local socket.
//!
//! # Wire Protocol
//!
//! ```text
//! client → store:  GET /{handle}\n
//! store → client:  <MessagePack payload>\n<space>   then close
//! ```
//!
//! One request per connection. There is no keep-alive, no pipelining and no
//! version negotiation. The client owns no state between calls: every
//! lookup opens a fresh connection and drops it when the reply is read.

pub mod codec;

use std::io;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, UnixStream};

use crate::config::{PropsStoreConfig, PropsTransport};

/// Terminator the store appends after the payload.
pub const REPLY_TERMINATOR: &[u8] = b"\n ";

/// Props lookup failures. Each carries the handle it was fetching.
#[derive(Debug, thiserror::Error)]
pub enum PropsError {
    /// The round trip did not finish in time.
    #[error("props fetch for handle '{handle}' timed out after {elapsed:?}")]
    Timeout {
        /// Handle being fetched.
        handle: String,
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The store refused or reset the connection.
    #[error("props store at {endpoint} unavailable for handle '{handle}': {source}")]
    Unavailable {
        /// Handle being fetched.
        handle: String,
        /// Transport that was tried.
        endpoint: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Reading or writing the connection failed in another way.
    #[error("props store I/O error for handle '{handle}': {source}")]
    Io {
        /// Handle being fetched.
        handle: String,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The handle cannot be sent on a request line.
    #[error("invalid props handle {handle:?}")]
    InvalidHandle {
        /// Rejected handle.
        handle: String,
    },

    /// The store closed the connection without sending a payload.
    #[error("props store returned an empty reply for handle '{handle}'")]
    EmptyReply {
        /// Handle being fetched.
        handle: String,
    },

    /// The payload is not valid MessagePack.
    #[error("cannot decode props for handle '{handle}': {source}")]
    Decode {
        /// Handle being fetched.
        handle: String,
        /// Decoder error.
        #[source]
        source: rmp_serde::decode::Error,
    },
}

impl PropsError {
    /// Handle the failed lookup was for.
    pub fn handle(&self) -> &str {
        match self {
            Self::Timeout { handle, .. }
            | Self::Unavailable { handle, .. }
            | Self::Io { handle, .. }
            | Self::InvalidHandle { handle }
            | Self::EmptyReply { handle }
            | Self::Decode { handle, .. } => handle,
        }
    }
}

/// Stateless client for the props store.
///
/// Cheap to clone; constructing one per call or sharing one is equivalent.
#[derive(Debug, Clone)]
pub struct PropsStoreClient {
    config: PropsStoreConfig,
}

impl PropsStoreClient {
    /// Client for the configured transport.
    pub fn new(config: PropsStoreConfig) -> Self {
        Self { config }
    }

    /// Configured transport.
    pub fn transport(&self) -> &PropsTransport {
        &self.config.transport
    }

    /// Fetches and decodes props using the configured timeout.
    pub async fn fetch(&self, handle: &str) -> Result<Value, PropsError> {
        self.fetch_with_timeout(handle, self.config.timeout).await
    }

    /// Fetches and decodes props, giving up after `timeout`.
    pub async fn fetch_with_timeout(
        &self,
        handle: &str,
        timeout: Duration,
    ) -> Result<Value, PropsError> {
        let payload = self.fetch_raw(handle, timeout).await?;
        codec::decode(&payload).map_err(|source| PropsError::Decode {
            handle: handle.to_string(),
            source,
        })
    }

    /// Fetches the raw payload with the reply terminator removed.
    pub async fn fetch_raw(&self, handle: &str, timeout: Duration) -> Result<Vec<u8>, PropsError> {
        validate_handle(handle)?;

        let started = Instant::now();
        let reply = match tokio::time::timeout(timeout, self.round_trip(handle)).await {
            Ok(reply) => reply?,
            Err(_elapsed) => {
                let elapsed = started.elapsed();
                log::error!("[props] Fetch for handle '{handle}' timed out after {elapsed:?}");
                return Err(PropsError::Timeout {
                    handle: handle.to_string(),
                    elapsed,
                });
            }
        };

        let payload = strip_terminator(reply);
        if payload.is_empty() {
            return Err(PropsError::EmptyReply {
                handle: handle.to_string(),
            });
        }

        log::debug!(
            "[props] Fetched {} byte(s) for handle '{handle}' in {:?}",
            payload.len(),
            started.elapsed()
        );
        Ok(payload)
    }

    /// Opens one connection, sends one request, reads until close.
    async fn round_trip(&self, handle: &str) -> Result<Vec<u8>, PropsError> {
        let endpoint = self.config.transport.to_string();
        let unavailable = |source: io::Error| {
            log::error!("[props] Store at {endpoint} unavailable for handle '{handle}': {source}");
            PropsError::Unavailable {
                handle: handle.to_string(),
                endpoint: endpoint.clone(),
                source,
            }
        };

        let result = match &self.config.transport {
            PropsTransport::Unix(path) => {
                let stream = UnixStream::connect(path).await.map_err(&unavailable)?;
                exchange(stream, handle).await
            }
            PropsTransport::Tcp { host, port } => {
                let stream = TcpStream::connect((host.as_str(), *port))
                    .await
                    .map_err(&unavailable)?;
                exchange(stream, handle).await
            }
        };

        result.map_err(|source| {
            if is_disconnect(&source) {
                unavailable(source)
            } else {
                PropsError::Io {
                    handle: handle.to_string(),
                    source,
                }
            }
        })
    }
}

/// Writes the request line and reads the whole reply.
async fn exchange<S>(mut stream: S, handle: &str) -> io::Result<Vec<u8>>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream
        .write_all(request_line(handle).as_bytes())
        .await?;
    stream.flush().await?;

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await?;

    if let Err(e) = stream.shutdown().await {
        log::debug!("[props] Ignoring shutdown error after reply: {e}");
    }
    Ok(reply)
}

/// Request line for one lookup.
pub fn request_line(handle: &str) -> String {
    format!("GET /{handle}\n")
}

fn validate_handle(handle: &str) -> Result<(), PropsError> {
    let valid = !handle.is_empty()
        && handle
            .chars()
            .all(|c| !c.is_whitespace() && !c.is_control() && c != '/');
    if valid {
        Ok(())
    } else {
        Err(PropsError::InvalidHandle {
            handle: handle.to_string(),
        })
    }
}

fn strip_terminator(mut reply: Vec<u8>) -> Vec<u8> {
    if reply.ends_with(REPLY_TERMINATOR) {
        reply.truncate(reply.len() - REPLY_TERMINATOR.len());
    }
    reply
}

fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::ConnectionRefused
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotFound
    )
}
