use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::codec::{DEFAULT_MAX_FRAME_SIZE, StompCodec, StompItem};
use crate::frame::Frame;
use crate::transport::{BrokerError, Credentials, Message, Transport, TransportError};

/// Tuning knobs for [`StompTransport`].
#[derive(Debug, Clone)]
pub struct StompOptions {
    /// Upper bound for TCP connect plus the CONNECT/CONNECTED handshake.
    pub connect_timeout: Duration,
    /// How long `disconnect` waits for the broker to confirm DISCONNECT.
    pub receipt_timeout: Duration,
    /// Value of the `heart-beat` header ("cx,cy" in milliseconds). The
    /// transport never emits or polices heart-beats, so the default is "0,0".
    pub heartbeat: String,
    /// Virtual host sent in the `host` header; defaults to the broker host.
    pub virtual_host: Option<String>,
    /// Largest frame accepted from the broker.
    pub max_frame_size: usize,
}

impl Default for StompOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            receipt_timeout: Duration::from_secs(5),
            heartbeat: "0,0".to_string(),
            virtual_host: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl StompOptions {
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_receipt_timeout(mut self, timeout: Duration) -> Self {
        self.receipt_timeout = timeout;
        self
    }

    pub fn with_virtual_host(mut self, host: impl Into<String>) -> Self {
        self.virtual_host = Some(host.into());
        self
    }

    pub fn with_max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }
}

type StompStream = Framed<TcpStream, StompCodec>;

/// [`Transport`] over a plain TCP connection speaking STOMP 1.2.
///
/// The transport is driven sequentially: each call writes or reads frames on
/// the socket directly, with no background task. Subscriptions use
/// `ack:auto`, so nothing is ever acknowledged by this client.
pub struct StompTransport {
    host: String,
    port: u16,
    options: StompOptions,
    stream: Option<StompStream>,
    /// destination -> local subscription id
    subscriptions: HashMap<String, String>,
    next_sub_id: u64,
    next_receipt_id: u64,
}

impl StompTransport {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_options(host, port, StompOptions::default())
    }

    pub fn with_options(host: impl Into<String>, port: u16, options: StompOptions) -> Self {
        Self {
            host: host.into(),
            port,
            options,
            stream: None,
            subscriptions: HashMap::new(),
            next_sub_id: 1,
            next_receipt_id: 1,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn stream(&mut self) -> Result<&mut StompStream, TransportError> {
        self.stream.as_mut().ok_or(TransportError::NotConnected)
    }

    async fn send_frame(&mut self, frame: Frame) -> Result<(), TransportError> {
        trace!(command = %frame.command, "sending frame");
        self.stream()?.send(StompItem::Frame(frame)).await?;
        Ok(())
    }

    /// Read until the next frame, skipping heart-beats.
    async fn next_frame(&mut self) -> Result<Frame, TransportError> {
        let stream = self.stream()?;
        loop {
            match stream.next().await {
                Some(Ok(StompItem::Heartbeat)) => trace!("heart-beat from broker"),
                Some(Ok(StompItem::Frame(frame))) => return Ok(frame),
                Some(Err(e)) => return Err(TransportError::Io(e)),
                None => {
                    return Err(TransportError::Protocol(
                        "connection closed by broker".into(),
                    ));
                }
            }
        }
    }

    async fn handshake(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        let socket = TcpStream::connect((self.host.as_str(), self.port)).await?;
        socket.set_nodelay(true)?;
        self.stream = Some(Framed::new(
            socket,
            StompCodec::with_max_frame_size(self.options.max_frame_size),
        ));

        let vhost = self
            .options
            .virtual_host
            .clone()
            .unwrap_or_else(|| self.host.clone());
        let connect = Frame::new("CONNECT")
            .header("accept-version", "1.0,1.1,1.2")
            .header("host", vhost)
            .header("login", credentials.username())
            .header("passcode", credentials.password())
            .header("heart-beat", self.options.heartbeat.clone());
        self.send_frame(connect).await?;

        let frame = self.next_frame().await.map_err(|e| match e {
            TransportError::Protocol(_) => {
                TransportError::Protocol("connection closed before CONNECTED".into())
            }
            other => other,
        })?;
        match frame.command.as_str() {
            "CONNECTED" => {
                debug!(
                    version = frame.get_header("version").unwrap_or("1.0"),
                    server = frame.get_header("server").unwrap_or("unknown"),
                    "broker accepted connection"
                );
                Ok(())
            }
            "ERROR" => Err(broker_error(&frame)),
            other => Err(TransportError::Protocol(format!(
                "expected CONNECTED, got {}",
                other
            ))),
        }
    }
}

fn broker_error(frame: &Frame) -> TransportError {
    let body = if frame.body.is_empty() {
        None
    } else {
        Some(frame.body_text())
    };
    TransportError::Broker(BrokerError {
        message: frame
            .get_header("message")
            .unwrap_or("unknown error")
            .to_string(),
        body,
    })
}

impl Transport for StompTransport {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        if self.stream.is_some() {
            return Err(TransportError::Protocol("already connected".into()));
        }
        let timeout = self.options.connect_timeout;
        let result = match tokio::time::timeout(timeout, self.handshake(credentials)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(format!(
                "CONNECTED after {:?}",
                timeout
            ))),
        };
        if result.is_err() {
            self.stream = None;
        }
        result
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        if self.stream.is_none() {
            return Ok(());
        }
        let receipt_id = format!("rcpt-{}", self.next_receipt_id);
        self.next_receipt_id += 1;

        let sent = self
            .send_frame(Frame::new("DISCONNECT").header("receipt", receipt_id.as_str()))
            .await;
        let confirmed = match sent {
            Ok(()) => {
                let timeout = self.options.receipt_timeout;
                match tokio::time::timeout(timeout, self.wait_for_receipt(&receipt_id)).await {
                    Ok(result) => result,
                    Err(_) => Err(TransportError::Timeout(format!("RECEIPT {}", receipt_id))),
                }
            }
            Err(e) => Err(e),
        };

        self.subscriptions.clear();
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = SinkExt::<StompItem>::close(&mut stream).await {
                debug!(error = %e, "closing socket after DISCONNECT");
            }
        }
        confirmed
    }

    async fn publish(&mut self, destination: &str, payload: &str) -> Result<(), TransportError> {
        let frame = Frame::new("SEND")
            .header("destination", destination)
            .header("content-type", "text/plain")
            .set_body(payload.as_bytes().to_vec());
        self.send_frame(frame).await
    }

    async fn subscribe(&mut self, destination: &str) -> Result<(), TransportError> {
        if self.subscriptions.contains_key(destination) {
            return Err(TransportError::Protocol(format!(
                "already subscribed to {}",
                destination
            )));
        }
        let id = format!("sub-{}", self.next_sub_id);
        let frame = Frame::new("SUBSCRIBE")
            .header("id", id.as_str())
            .header("destination", destination)
            .header("ack", "auto");
        self.send_frame(frame).await?;
        self.next_sub_id += 1;
        self.subscriptions.insert(destination.to_string(), id);
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str) -> Result<(), TransportError> {
        let id = self.subscriptions.remove(destination).ok_or_else(|| {
            TransportError::Protocol(format!("no subscription for {}", destination))
        })?;
        self.send_frame(Frame::new("UNSUBSCRIBE").header("id", id))
            .await
    }

    async fn receive_one(&mut self) -> Result<Message, TransportError> {
        loop {
            let frame = self.next_frame().await?;
            match frame.command.as_str() {
                "MESSAGE" => return Ok(into_message(frame)),
                "ERROR" => return Err(broker_error(&frame)),
                other => debug!(command = other, "ignoring frame while waiting for MESSAGE"),
            }
        }
    }
}

impl StompTransport {
    async fn wait_for_receipt(&mut self, receipt_id: &str) -> Result<(), TransportError> {
        loop {
            let frame = self.next_frame().await?;
            match frame.command.as_str() {
                "RECEIPT" if frame.get_header("receipt-id") == Some(receipt_id) => return Ok(()),
                "ERROR" => return Err(broker_error(&frame)),
                "MESSAGE" => debug!("dropping MESSAGE received during DISCONNECT"),
                other => warn!(command = other, "discarding frame received during DISCONNECT"),
            }
        }
    }
}

fn into_message(frame: Frame) -> Message {
    let body = match String::from_utf8(frame.body) {
        Ok(text) => text,
        Err(e) => {
            debug!("MESSAGE body is not valid UTF-8, replacing invalid sequences");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    };
    let mut destination = None;
    let mut headers = Vec::with_capacity(frame.headers.len());
    for (k, v) in frame.headers {
        if k == "destination" && destination.is_none() {
            destination = Some(v);
        } else {
            headers.push((k, v));
        }
    }
    Message {
        destination,
        headers,
        body,
    }
}
