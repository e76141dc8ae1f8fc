use std::path::Path;
use stomp_topic::{
    HeartbeatEmitter, PayloadTemplate, Session, SessionConfig, SessionError, StompOptions,
    TransportError,
};
use tokio::io::AsyncWrite;
use tracing::{info, warn};

use super::args::{Action, Invocation};
use super::exit_codes;

/// Body published by `sender` when no payload file is given.
pub const DEFAULT_MESSAGE: &str = "\nThis is a test message.\n";

type Failure = (String, u8);

/// Run one invocation to completion.
pub async fn run(invocation: Invocation) -> Result<(), Failure> {
    let Invocation { session, action } = invocation;
    match action {
        Action::Send { payload } => {
            let payload = match payload {
                Some(path) => read_file(&path).await?,
                None => DEFAULT_MESSAGE.to_string(),
            };
            let mut session = connect(session).await?;
            session.send(&payload).await.map_err(|e| describe(&e))?;
            session.close().await.map_err(|e| describe(&e))
        }
        Action::Receive { output, options } => {
            let mut sink: Box<dyn AsyncWrite + Unpin + Send> = match output {
                Some(path) => Box::new(tokio::fs::File::create(&path).await.map_err(|e| {
                    (
                        format!("cannot open output file {}: {}", path.display(), e),
                        exit_codes::IO_ERROR,
                    )
                })?),
                None => Box::new(tokio::io::stdout()),
            };
            let session = connect(session).await?;
            session
                .receive(&mut sink, &options, shutdown_signal())
                .await
                .map(|_| ())
                .map_err(|e| describe(&e))
        }
        Action::Heartbeat { payload, interval } => {
            let template = match payload {
                Some(path) => PayloadTemplate::from_text(read_file(&path).await?),
                None => PayloadTemplate::default(),
            };
            let mut session = connect(session).await?;
            let mut emitter = HeartbeatEmitter::new(template, interval);
            let sent = emitter
                .run(&mut session, shutdown_signal())
                .await
                .map_err(|e| describe(&e))?;
            info!(sent, "heartbeats published");
            session.close().await.map_err(|e| describe(&e))
        }
    }
}

async fn connect(config: SessionConfig) -> Result<Session<stomp_topic::StompTransport>, Failure> {
    Session::open(config, StompOptions::default())
        .await
        .map_err(|e| describe(&e))
}

async fn read_file(path: &Path) -> Result<String, Failure> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        (
            format!("cannot read payload file {}: {}", path.display(), e),
            exit_codes::IO_ERROR,
        )
    })
}

/// Resolves on Ctrl-C (or SIGTERM on unix). Never resolves if no handler
/// could be installed.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "cannot listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutting down");
}

fn transport_code(err: &TransportError) -> u8 {
    match err {
        TransportError::Io(_) | TransportError::Timeout(_) => exit_codes::NETWORK_ERROR,
        TransportError::Broker(_) | TransportError::Protocol(_) | TransportError::NotConnected => {
            exit_codes::PROTOCOL_ERROR
        }
    }
}

/// Map a session error to a message and exit code.
pub fn describe(err: &SessionError) -> Failure {
    let code = match err {
        SessionError::Connection { source, .. } => match source {
            TransportError::Broker(_) => exit_codes::AUTH_ERROR,
            other => transport_code(other),
        },
        SessionError::Send { source, .. }
        | SessionError::Receive { source, .. }
        | SessionError::Teardown { source, .. } => transport_code(source),
        SessionError::Parse(_) => exit_codes::DATA_ERROR,
        SessionError::Output(_) => exit_codes::IO_ERROR,
    };
    (err.to_string(), code)
}
