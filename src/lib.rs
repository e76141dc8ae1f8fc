//! Command-line STOMP client for a single broker topic.
//!
//! A [`Session`] wraps one authenticated [`Transport`] bound to one
//! destination and offers the three things the tool does with it: publish a
//! message, copy received messages to a writer (optionally dropping
//! heartbeat documents), and, through [`HeartbeatEmitter`], publish
//! time-stamped heartbeats.

pub mod codec;
pub mod emitter;
pub mod frame;
pub mod heartbeat;
pub mod session;
pub mod stomp;
pub mod transport;

pub use codec::{StompCodec, StompItem};
pub use emitter::HeartbeatEmitter;
pub use frame::Frame;
pub use heartbeat::{Heartbeat, HeartbeatError, PayloadTemplate};
pub use session::{
    ReceiveOptions, ReceiveSummary, SEPARATOR, Session, SessionConfig, SessionError,
    topic_destination,
};
pub use stomp::{StompOptions, StompTransport};
pub use transport::{BrokerError, Credentials, Message, Transport, TransportError};
