use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, info};

use crate::heartbeat::PayloadTemplate;
use crate::session::{Session, SessionError};
use crate::transport::Transport;

/// Sends heartbeats through a [`Session`].
///
/// Without an interval a single heartbeat is sent. With one, heartbeats are
/// sent until the shutdown future passed to [`HeartbeatEmitter::run`]
/// resolves. A failed send ends the run with that error.
pub struct HeartbeatEmitter<C = fn() -> DateTime<Utc>> {
    template: PayloadTemplate,
    interval: Option<Duration>,
    clock: C,
}

impl HeartbeatEmitter {
    pub fn new(template: PayloadTemplate, interval: Option<Duration>) -> Self {
        Self {
            template,
            interval,
            clock: Utc::now,
        }
    }
}

impl<C> HeartbeatEmitter<C>
where
    C: FnMut() -> DateTime<Utc>,
{
    /// Replace the wall clock used to stamp payloads.
    pub fn with_clock<D>(self, clock: D) -> HeartbeatEmitter<D>
    where
        D: FnMut() -> DateTime<Utc>,
    {
        HeartbeatEmitter {
            template: self.template,
            interval: self.interval,
            clock,
        }
    }

    pub fn interval(&self) -> Option<Duration> {
        self.interval
    }

    /// Returns the number of heartbeats sent.
    pub async fn run<T, F>(
        &mut self,
        session: &mut Session<T>,
        shutdown: F,
    ) -> Result<u64, SessionError>
    where
        T: Transport,
        F: Future<Output = ()>,
    {
        let mut sent = 0u64;
        tokio::pin!(shutdown);

        loop {
            let now = (self.clock)();
            let payload = self.template.render(now);
            session.send(&payload).await?;
            sent += 1;
            debug!(destination = session.destination(), seq = sent, "heartbeat sent");

            let Some(interval) = self.interval else {
                break;
            };
            tokio::select! {
                _ = &mut shutdown => {
                    info!(sent, "heartbeat emission stopped");
                    break;
                }
                _ = tokio::time::sleep(interval) => {}
            }
        }
        Ok(sent)
    }
}
