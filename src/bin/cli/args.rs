use clap::{ArgAction, Parser, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use stomp_topic::{Credentials, ReceiveOptions, SessionConfig, topic_destination};
use thiserror::Error;

/// What the client does once connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Publish one message
    Sender,
    /// Print messages received on the topic
    Receiver,
    /// Publish heartbeat documents
    Heartbeat,
}

#[derive(Parser, Debug)]
#[command(name = "stomp-topic")]
#[command(version)]
#[command(about = "Send to, receive from, or emit heartbeats on a STOMP topic")]
pub struct Cli {
    /// Client role
    #[arg(value_enum)]
    pub mode: Mode,

    /// User name
    #[arg(short, long)]
    pub user: Option<String>,

    /// Password
    #[arg(short, long)]
    pub password: Option<String>,

    /// Broker host name
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Broker STOMP port
    #[arg(short = 'P', long)]
    pub port: Option<u16>,

    /// Topic name; messages go to /topic/<TOPIC>
    #[arg(short, long)]
    pub topic: Option<String>,

    /// Payload file (sender, heartbeat) or output file (receiver)
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Keep receiving instead of stopping after the first message
    #[arg(short, long)]
    pub continuous: bool,

    /// Drop heartbeat messages while receiving
    #[arg(long = "nohb")]
    pub no_heartbeats: bool,

    /// Seconds between heartbeats; without it a single heartbeat is sent
    #[arg(short, long)]
    pub interval: Option<f64>,

    /// More log output on stderr (repeat for more)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Error, Debug, PartialEq)]
pub enum UsageError {
    #[error("missing {}. See the help message using the -h option.", .0.join(", "))]
    Missing(Vec<&'static str>),
    #[error("invalid interval {0}: expected a positive number of seconds")]
    Interval(f64),
}

/// Per-mode work with its own settings.
#[derive(Debug)]
pub enum Action {
    Send {
        payload: Option<PathBuf>,
    },
    Receive {
        output: Option<PathBuf>,
        options: ReceiveOptions,
    },
    Heartbeat {
        payload: Option<PathBuf>,
        interval: Option<Duration>,
    },
}

/// Everything needed to run one invocation.
#[derive(Debug)]
pub struct Invocation {
    pub session: SessionConfig,
    pub action: Action,
}

fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl Cli {
    /// Check required options and build the session and mode settings.
    pub fn into_invocation(self) -> Result<Invocation, UsageError> {
        let user = present(self.user);
        let password = present(self.password);
        let host = present(self.host);
        let port = self.port.filter(|p| *p != 0);
        let topic = present(self.topic);

        let mut missing = Vec::new();
        if user.is_none() {
            missing.push("--user");
        }
        if password.is_none() {
            missing.push("--password");
        }
        if host.is_none() {
            missing.push("--host");
        }
        if port.is_none() {
            missing.push("--port");
        }
        if topic.is_none() {
            missing.push("--topic");
        }
        let (Some(user), Some(password), Some(host), Some(port), Some(topic)) =
            (user, password, host, port, topic)
        else {
            return Err(UsageError::Missing(missing));
        };

        let action = match self.mode {
            Mode::Sender => Action::Send { payload: self.file },
            Mode::Receiver => Action::Receive {
                output: self.file,
                options: ReceiveOptions::default().filter_heartbeats(self.no_heartbeats),
            },
            Mode::Heartbeat => {
                let interval = match self.interval {
                    None => None,
                    Some(secs) if secs > 0.0 => Some(
                        Duration::try_from_secs_f64(secs)
                            .map_err(|_| UsageError::Interval(secs))?,
                    ),
                    Some(secs) => return Err(UsageError::Interval(secs)),
                };
                Action::Heartbeat {
                    payload: self.file,
                    interval,
                }
            }
        };

        let session = SessionConfig::new(
            host,
            port,
            topic_destination(&topic),
            Credentials::new(user, password),
        )
        .continuous(self.mode == Mode::Receiver && self.continuous);

        Ok(Invocation { session, action })
    }
}
