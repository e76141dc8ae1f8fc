//! In-memory transport used to drive `Session` without a broker.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use stomp_topic::{Credentials, Message, Transport, TransportError};
use tokio::sync::Notify;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect { username: String },
    Publish { destination: String, payload: String },
    Subscribe(String),
    Unsubscribe(String),
    Disconnect,
}

/// Shared view of everything the fake was asked to do.
#[derive(Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<Call>>>,
    publish_times: Arc<Mutex<Vec<Instant>>>,
}

impl CallLog {
    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn published(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Publish { payload, .. } => Some(payload),
                _ => None,
            })
            .collect()
    }

    pub fn publish_times(&self) -> Vec<Instant> {
        self.publish_times.lock().unwrap().clone()
    }

    fn push(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

pub struct FakeTransport {
    log: CallLog,
    inbox: VecDeque<Result<Message, TransportError>>,
    drained: Arc<Notify>,
    fail_connect: bool,
    publish_budget: Option<usize>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            log: CallLog::default(),
            inbox: VecDeque::new(),
            drained: Arc::new(Notify::new()),
            fail_connect: false,
            publish_budget: None,
        }
    }

    /// Queue text messages; once they are consumed `receive_one` blocks forever.
    pub fn with_messages<I, S>(mut self, bodies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inbox
            .extend(bodies.into_iter().map(|b| Ok(Message::text(b))));
        self
    }

    pub fn with_receive_error(mut self, err: TransportError) -> Self {
        self.inbox.push_back(Err(err));
        self
    }

    pub fn failing_connect(mut self) -> Self {
        self.fail_connect = true;
        self
    }

    /// Allow `n` successful publishes, then fail every further one.
    pub fn failing_publish_after(mut self, n: usize) -> Self {
        self.publish_budget = Some(n);
        self
    }

    pub fn log(&self) -> CallLog {
        self.log.clone()
    }

    /// Notified once every queued message has been handed out.
    pub fn drained(&self) -> Arc<Notify> {
        self.drained.clone()
    }
}

impl Transport for FakeTransport {
    async fn connect(&mut self, credentials: &Credentials) -> Result<(), TransportError> {
        self.log.push(Call::Connect {
            username: credentials.username().to_string(),
        });
        if self.fail_connect {
            return Err(TransportError::Io(std::io::Error::from(
                std::io::ErrorKind::ConnectionRefused,
            )));
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.log.push(Call::Disconnect);
        Ok(())
    }

    async fn publish(&mut self, destination: &str, payload: &str) -> Result<(), TransportError> {
        if let Some(budget) = self.publish_budget.as_mut() {
            if *budget == 0 {
                return Err(TransportError::Protocol("send channel closed".into()));
            }
            *budget -= 1;
        }
        self.log.push(Call::Publish {
            destination: destination.to_string(),
            payload: payload.to_string(),
        });
        self.log.publish_times.lock().unwrap().push(Instant::now());
        Ok(())
    }

    async fn subscribe(&mut self, destination: &str) -> Result<(), TransportError> {
        self.log.push(Call::Subscribe(destination.to_string()));
        Ok(())
    }

    async fn unsubscribe(&mut self, destination: &str) -> Result<(), TransportError> {
        self.log.push(Call::Unsubscribe(destination.to_string()));
        Ok(())
    }

    async fn receive_one(&mut self) -> Result<Message, TransportError> {
        match self.inbox.pop_front() {
            Some(item) => item,
            None => {
                self.drained.notify_one();
                std::future::pending().await
            }
        }
    }
}

pub const HEARTBEAT: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<hb xmlns="http://heartbeat.reakteu.org" originator="test1" sender="test2" timestamp="2024-05-01T12:00:00.000000Z"/>"#;
