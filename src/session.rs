use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info, warn};

use crate::heartbeat::{self, HeartbeatError};
use crate::stomp::{StompOptions, StompTransport};
use crate::transport::{Credentials, Transport, TransportError};

/// Line written after every message in continuous mode.
pub const SEPARATOR: &str = "--------------------------------------------------------------------------------";

/// Destination path for a topic name: `/topic/<name>`.
pub fn topic_destination(topic: &str) -> String {
    format!("/topic/{}", topic)
}

/// Errors returned by [`Session`] operations.
#[derive(Error, Debug)]
pub enum SessionError {
    /// Connecting or logging in failed. Carries everything needed to report
    /// the failure except the password.
    #[error("cannot connect to message broker ({username}@{host}:{port}): {source}")]
    Connection {
        username: String,
        host: String,
        port: u16,
        #[source]
        source: TransportError,
    },
    #[error("cannot send to {destination}: {source}")]
    Send {
        destination: String,
        #[source]
        source: TransportError,
    },
    #[error("receiving from {destination} failed: {source}")]
    Receive {
        destination: String,
        #[source]
        source: TransportError,
    },
    /// A message under heartbeat filtering was not well-formed XML.
    #[error("cannot parse received message: {0}")]
    Parse(#[from] HeartbeatError),
    #[error("cannot write received message: {0}")]
    Output(#[from] std::io::Error),
    #[error("closing the session on {destination} failed: {source}")]
    Teardown {
        destination: String,
        #[source]
        source: TransportError,
    },
}

/// What to connect to. Immutable once built.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub destination: String,
    pub credentials: Credentials,
    /// Receive until shut down instead of returning after one message.
    pub continuous: bool,
}

impl SessionConfig {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        destination: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            destination: destination.into(),
            credentials,
            continuous: false,
        }
    }

    pub fn continuous(mut self, continuous: bool) -> Self {
        self.continuous = continuous;
        self
    }
}

/// Options for [`Session::receive`].
#[derive(Debug, Clone)]
pub struct ReceiveOptions {
    /// Drop heartbeat documents instead of writing them to the sink.
    pub filter_heartbeats: bool,
    /// Delay after each message in continuous mode.
    pub pace: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            filter_heartbeats: false,
            pace: Duration::from_secs(1),
        }
    }
}

impl ReceiveOptions {
    pub fn filter_heartbeats(mut self, filter: bool) -> Self {
        self.filter_heartbeats = filter;
        self
    }

    pub fn pace(mut self, pace: Duration) -> Self {
        self.pace = pace;
        self
    }
}

/// Counters reported when a receive loop ends.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveSummary {
    /// Messages written to the sink.
    pub written: u64,
    /// Heartbeats dropped by the filter.
    pub discarded: u64,
    /// Heartbeats recognized, whether dropped or written.
    pub heartbeats: u64,
}

/// A live, authenticated connection bound to one destination.
///
/// A `Session` only exists once the transport has connected. `receive` and
/// `close` consume it and always leave the transport disconnected.
pub struct Session<T: Transport> {
    config: SessionConfig,
    transport: T,
}

impl Session<StompTransport> {
    /// Connect over TCP with the given transport options.
    pub async fn open(config: SessionConfig, options: StompOptions) -> Result<Self, SessionError> {
        let transport = StompTransport::with_options(config.host.clone(), config.port, options);
        Self::connect(config, transport).await
    }
}

impl<T: Transport> Session<T> {
    /// Connect `transport` using the credentials in `config`.
    pub async fn connect(config: SessionConfig, mut transport: T) -> Result<Self, SessionError> {
        info!(
            user = config.credentials.username(),
            host = %config.host,
            port = config.port,
            "connecting to broker"
        );
        if let Err(source) = transport.connect(&config.credentials).await {
            return Err(SessionError::Connection {
                username: config.credentials.username().to_string(),
                host: config.host.clone(),
                port: config.port,
                source,
            });
        }
        debug!(destination = %config.destination, "session established");
        Ok(Self { config, transport })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn destination(&self) -> &str {
        &self.config.destination
    }

    /// Publish `payload` unmodified to the session's destination.
    pub async fn send(&mut self, payload: &str) -> Result<(), SessionError> {
        self.transport
            .publish(&self.config.destination, payload)
            .await
            .map_err(|source| SessionError::Send {
                destination: self.config.destination.clone(),
                source,
            })?;
        debug!(destination = %self.config.destination, bytes = payload.len(), "message sent");
        Ok(())
    }

    /// Disconnect without receiving.
    pub async fn close(mut self) -> Result<(), SessionError> {
        self.transport
            .disconnect()
            .await
            .map_err(|source| SessionError::Teardown {
                destination: self.config.destination.clone(),
                source,
            })
    }

    /// Subscribe and copy messages to `sink`.
    ///
    /// Without the continuous flag this returns after the first message,
    /// which is written followed by a newline. In continuous mode every
    /// message is followed by a newline and [`SEPARATOR`], and the loop only
    /// ends when `shutdown` resolves or an operation fails. Heartbeats are
    /// dropped when `options.filter_heartbeats` is set.
    ///
    /// Whatever ends the loop, the subscription is removed and the transport
    /// disconnected before this returns. The loop's own error takes
    /// precedence over a teardown error.
    pub async fn receive<W, F>(
        mut self,
        sink: &mut W,
        options: &ReceiveOptions,
        shutdown: F,
    ) -> Result<ReceiveSummary, SessionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
        F: Future<Output = ()>,
    {
        let destination = self.config.destination.clone();
        if let Err(source) = self.transport.subscribe(&destination).await {
            let _ = self.transport.disconnect().await;
            return Err(SessionError::Receive {
                destination,
                source,
            });
        }
        info!(
            destination = %destination,
            continuous = self.config.continuous,
            filter_heartbeats = options.filter_heartbeats,
            "subscribed"
        );

        let outcome = if self.config.continuous {
            self.receive_loop(sink, options, shutdown).await
        } else {
            self.receive_single(sink, shutdown).await
        };
        let teardown = self.teardown().await;

        match (outcome, teardown) {
            (Ok(summary), Ok(())) => {
                info!(
                    written = summary.written,
                    discarded = summary.discarded,
                    heartbeats = summary.heartbeats,
                    "receive finished"
                );
                Ok(summary)
            }
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(teardown_err)) => {
                warn!(error = %teardown_err, "teardown after failed receive");
                Err(e)
            }
        }
    }

    async fn receive_single<W, F>(
        &mut self,
        sink: &mut W,
        shutdown: F,
    ) -> Result<ReceiveSummary, SessionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
        F: Future<Output = ()>,
    {
        let mut summary = ReceiveSummary::default();
        let message = tokio::select! {
            _ = shutdown => {
                info!("shutdown requested before a message arrived");
                return Ok(summary);
            }
            received = self.transport.receive_one() => received.map_err(|source| {
                SessionError::Receive {
                    destination: self.config.destination.clone(),
                    source,
                }
            })?,
        };
        sink.write_all(message.body.as_bytes()).await?;
        sink.write_all(b"\n").await?;
        sink.flush().await?;
        summary.written = 1;
        Ok(summary)
    }

    async fn receive_loop<W, F>(
        &mut self,
        sink: &mut W,
        options: &ReceiveOptions,
        shutdown: F,
    ) -> Result<ReceiveSummary, SessionError>
    where
        W: AsyncWrite + Unpin + ?Sized,
        F: Future<Output = ()>,
    {
        let mut summary = ReceiveSummary::default();
        tokio::pin!(shutdown);

        loop {
            let message = tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    return Ok(summary);
                }
                received = self.transport.receive_one() => received.map_err(|source| {
                    SessionError::Receive {
                        destination: self.config.destination.clone(),
                        source,
                    }
                })?,
            };

            let heartbeat = if options.filter_heartbeats {
                heartbeat::inspect(&message.body)?
            } else {
                // Unfiltered receivers pass malformed markup through.
                heartbeat::inspect(&message.body).unwrap_or_else(|e| {
                    debug!(error = %e, "message is not a well-formed document");
                    None
                })
            };

            if let Some(hb) = &heartbeat {
                let latency_ms = hb
                    .latency(chrono::Utc::now())
                    .map(|d| d.num_milliseconds());
                debug!(
                    originator = hb.originator.as_deref().unwrap_or("-"),
                    sender = hb.sender.as_deref().unwrap_or("-"),
                    latency_ms,
                    "heartbeat received"
                );
                summary.heartbeats += 1;
            }

            if heartbeat.is_some() && options.filter_heartbeats {
                summary.discarded += 1;
            } else {
                sink.write_all(message.body.as_bytes()).await?;
                sink.write_all(b"\n").await?;
                sink.write_all(SEPARATOR.as_bytes()).await?;
                sink.write_all(b"\n").await?;
                sink.flush().await?;
                summary.written += 1;
            }

            if !options.pace.is_zero() {
                tokio::select! {
                    _ = &mut shutdown => {
                        info!("shutdown requested");
                        return Ok(summary);
                    }
                    _ = tokio::time::sleep(options.pace) => {}
                }
            }
        }
    }

    async fn teardown(&mut self) -> Result<(), SessionError> {
        let destination = self.config.destination.clone();
        let unsubscribed = self.transport.unsubscribe(&destination).await;
        let disconnected = self.transport.disconnect().await;
        debug!(destination = %destination, "session closed");
        unsubscribed
            .and(disconnected)
            .map_err(|source| SessionError::Teardown {
                destination,
                source,
            })
    }
}
