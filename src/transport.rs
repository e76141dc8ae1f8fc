use std::fmt;
use thiserror::Error;

/// Errors returned by [`Transport`] operations.
#[derive(Error, Debug)]
pub enum TransportError {
    /// I/O-level error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Protocol-level error
    #[error("protocol error: {0}")]
    Protocol(String),
    /// The broker answered with an ERROR frame.
    #[error("broker error: {0}")]
    Broker(BrokerError),
    /// No answer from the broker within the configured time.
    #[error("timed out waiting for {0}")]
    Timeout(String),
    /// The operation needs a live connection.
    #[error("not connected")]
    NotConnected,
}

/// Content of an ERROR frame sent by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerError {
    /// The `message` header, or a placeholder when the broker omitted it.
    pub message: String,
    /// The frame body, when present.
    pub body: Option<String>,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            Some(body) => write!(f, "{} ({})", self.message, body.trim()),
            None => f.write_str(&self.message),
        }
    }
}

/// Broker login. The password is never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// A message delivered by the broker for a subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination the broker reported, if any.
    pub destination: Option<String>,
    /// Remaining headers as sent by the broker.
    pub headers: Vec<(String, String)>,
    /// Message body as text.
    pub body: String,
}

impl Message {
    /// A message carrying only a body.
    pub fn text(body: impl Into<String>) -> Self {
        Self {
            destination: None,
            headers: Vec::new(),
            body: body.into(),
        }
    }
}

/// Capability interface the session needs from a broker client.
///
/// Every method is awaited to completion before the next one is issued; an
/// implementation is driven by a single task and does not need to be
/// shareable. `receive_one` may wait indefinitely for the next message.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Open the connection and authenticate.
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), TransportError>;

    /// Close the connection. Calling it on a closed transport is a no-op.
    async fn disconnect(&mut self) -> Result<(), TransportError>;

    /// Deliver `payload` to `destination` once.
    async fn publish(&mut self, destination: &str, payload: &str) -> Result<(), TransportError>;

    /// Start receiving messages sent to `destination`.
    async fn subscribe(&mut self, destination: &str) -> Result<(), TransportError>;

    /// Stop receiving messages sent to `destination`.
    async fn unsubscribe(&mut self, destination: &str) -> Result<(), TransportError>;

    /// Wait for the next message on any active subscription.
    async fn receive_one(&mut self) -> Result<Message, TransportError>;
}
