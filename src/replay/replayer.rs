//! Replayer: a single task owns the replay cassette
//!
//! Live requests reach the cassette only through the command channel, so
//! matching and webhook delivery are serialized by construction. After answering
//! a request whose recorded call was followed by webhooks, the task waits for the
//! client response to be written, delivers the webhooks in order and only then
//! takes the next command.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::cassette::{Cassette, CassetteSerializer, HttpRequest, HttpResponse, Interaction};
use crate::fingerprint::{fingerprint_request, short_hex};
use crate::network::{HttpClient, WriteOutcome};
use crate::recording::event_type;
use crate::{PlaybackError, Result};

use super::{match_request, Comparator, Matched};

/// Commands buffered ahead of the replay task
const COMMAND_BUFFER: usize = 64;

/// A recorded response ready to be written to the client
pub struct Replayed {
    /// Recorded response
    pub response: HttpResponse,
    /// Must be signalled once the client response has been written; see
    /// [`TrackedBody`](crate::network::TrackedBody)
    pub written: oneshot::Sender<WriteOutcome>,
}

enum Command {
    Load {
        cassette: Cassette,
        reply: oneshot::Sender<usize>,
    },
    Replay {
        request: HttpRequest,
        reply: oneshot::Sender<Result<Replayed>>,
    },
    Remaining {
        reply: oneshot::Sender<usize>,
    },
}

/// Handle to the replay task
#[derive(Clone)]
pub struct Replayer {
    commands: mpsc::Sender<Command>,
    serializer: Arc<dyn CassetteSerializer>,
}

impl Replayer {
    /// Start the replay task with an empty cassette
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn(
        webhook_url: impl Into<String>,
        client: HttpClient,
        serializer: Arc<dyn CassetteSerializer>,
        comparator: Comparator,
        flush_timeout: Duration,
    ) -> Self {
        let (commands, inbox) = mpsc::channel(COMMAND_BUFFER);
        let task = ReplayTask {
            cassette: Cassette::new(),
            comparator,
            webhook_url: webhook_url.into(),
            client,
            flush_timeout,
        };
        tokio::spawn(task.run(inbox));

        Self {
            commands,
            serializer,
        }
    }

    /// Decode a cassette from `reader` and make it the one being replayed
    ///
    /// Returns the number of interactions loaded. On error the previous
    /// cassette stays in place.
    ///
    /// # Errors
    ///
    /// Returns error if reading or decoding fails
    pub async fn read_cassette<R: Read>(&self, mut reader: R) -> Result<usize> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        let cassette = self.serializer.decode_cassette(&bytes)?;

        let (reply, response) = oneshot::channel();
        self.send(Command::Load { cassette, reply }).await?;
        let loaded = response.await.map_err(|_| task_stopped())?;

        info!("Loaded cassette with {} interactions for replay", loaded);
        Ok(loaded)
    }

    /// Answer a live request from the cassette
    ///
    /// # Errors
    ///
    /// Returns `NoMatchingEvents` when the cassette has no acceptable
    /// interaction left
    pub async fn replay(&self, request: HttpRequest) -> Result<Replayed> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Replay { request, reply }).await?;
        response.await.map_err(|_| task_stopped())?
    }

    /// Interactions left in the cassette, including undelivered webhooks
    ///
    /// # Errors
    ///
    /// Returns error if the replay task has stopped
    pub async fn remaining(&self) -> Result<usize> {
        let (reply, response) = oneshot::channel();
        self.send(Command::Remaining { reply }).await?;
        response.await.map_err(|_| task_stopped())
    }

    async fn send(&self, command: Command) -> Result<()> {
        self.commands.send(command).await.map_err(|_| task_stopped())
    }
}

fn task_stopped() -> PlaybackError {
    PlaybackError::Other("replay task is no longer running".to_string())
}

struct ReplayTask {
    cassette: Cassette,
    comparator: Comparator,
    webhook_url: String,
    client: HttpClient,
    flush_timeout: Duration,
}

impl ReplayTask {
    async fn run(mut self, mut inbox: mpsc::Receiver<Command>) {
        debug!("Replay task started with {:?} comparator", self.comparator);

        while let Some(command) = inbox.recv().await {
            match command {
                Command::Load { cassette, reply } => {
                    self.cassette = cassette;
                    let _ = reply.send(self.cassette.len());
                }
                Command::Remaining { reply } => {
                    let _ = reply.send(self.cassette.len());
                }
                Command::Replay { request, reply } => self.replay(request, reply).await,
            }
        }

        debug!("Replay task stopped");
    }

    async fn replay(&mut self, request: HttpRequest, reply: oneshot::Sender<Result<Replayed>>) {
        info!("--> {} to {}", request.method, request.path_and_query());

        let Matched { response, webhooks } =
            match match_request(&mut self.cassette, &request, &self.comparator) {
                Ok(matched) => matched,
                Err(e) => {
                    debug!(
                        "No match for {} (fingerprint {}), {} interactions left",
                        request.path_and_query(),
                        short_hex(&fingerprint_request(&request)),
                        self.cassette.len()
                    );
                    if self.cassette.only_incoming() {
                        warn!(
                            "{} recorded webhooks precede any API call in the cassette and will never be replayed",
                            self.cassette.len()
                        );
                    }
                    let _ = reply.send(Err(e));
                    return;
                }
            };

        info!("<-- {} from CASSETTE", response.status_code);

        let (written, write_outcome) = oneshot::channel();
        if reply.send(Ok(Replayed { response, written })).is_err() {
            warn!("Client went away before the replayed response was handed over");
        }

        if webhooks.is_empty() {
            return;
        }

        self.wait_for_write(write_outcome).await;
        self.deliver(webhooks).await;
    }

    async fn wait_for_write(&self, write_outcome: oneshot::Receiver<WriteOutcome>) {
        match tokio::time::timeout(self.flush_timeout, write_outcome).await {
            Ok(Ok(WriteOutcome::Complete)) => {}
            Ok(Ok(WriteOutcome::Aborted) | Err(_)) => {
                warn!("Replayed response was not fully written, delivering webhooks anyway");
            }
            Err(_) => {
                warn!(
                    "Replayed response still being written after {:?}, delivering webhooks anyway",
                    self.flush_timeout
                );
            }
        }
    }

    async fn deliver(&self, webhooks: Vec<Interaction>) {
        debug!("Delivering {} webhooks", webhooks.len());

        for webhook in webhooks {
            let kind = event_type(&webhook.request.body);
            info!("[WEBHOOK] [{}] --> {}", kind, self.webhook_url);

            match self.client.forward(&webhook.request, &self.webhook_url).await {
                Ok(actual) => {
                    let expected = webhook.response.status_code;
                    info!(
                        "Received {} from client. Expected {}",
                        actual.status_code, expected
                    );
                    if actual.status_code != expected {
                        warn!(
                            "[WEBHOOK] [{}] client answered {} but the recording has {}",
                            kind, actual.status_code, expected
                        );
                    }
                }
                Err(e) => error!("Error sending webhook [{}] to client: {}", kind, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::{Direction, YamlSerializer};

    fn replayer(comparator: Comparator) -> Replayer {
        Replayer::spawn(
            "http://127.0.0.1:1/webhooks",
            HttpClient::new(Duration::from_millis(200)).unwrap(),
            Arc::new(YamlSerializer),
            comparator,
            Duration::from_secs(5),
        )
    }

    fn encoded(entries: &[(Direction, &str, u16)]) -> Vec<u8> {
        let mut cassette = Cassette::new();
        for (direction, path, status) in entries {
            cassette.push(
                *direction,
                HttpRequest::new("GET", path.parse().unwrap()),
                HttpResponse::new(*status, *path),
            );
        }
        YamlSerializer.encode_cassette(&cassette).unwrap()
    }

    fn get(path: &str) -> HttpRequest {
        HttpRequest::new("GET", path.parse().unwrap())
    }

    #[tokio::test]
    async fn test_replays_in_order_until_exhausted() {
        let replayer = replayer(Comparator::Sequential);
        let bytes = encoded(&[(Direction::Outgoing, "/a", 200), (Direction::Outgoing, "/b", 402)]);
        assert_eq!(replayer.read_cassette(bytes.as_slice()).await.unwrap(), 2);

        let first = replayer.replay(get("/a")).await.unwrap();
        assert_eq!(first.response.status_code, 200);
        let second = replayer.replay(get("/b")).await.unwrap();
        assert_eq!(second.response.status_code, 402);

        let third = replayer.replay(get("/c")).await;
        assert!(matches!(third, Err(PlaybackError::NoMatchingEvents)));
        assert_eq!(replayer.remaining().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_cassette_keeps_previous() {
        let replayer = replayer(Comparator::Sequential);
        let bytes = encoded(&[(Direction::Outgoing, "/a", 200)]);
        replayer.read_cassette(bytes.as_slice()).await.unwrap();

        let result = replayer.read_cassette(&b"- type: [unclosed"[..]).await;
        assert!(matches!(result, Err(PlaybackError::Decode(_))));
        assert_eq!(replayer.remaining().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_next_request_waits_for_webhook_flush() {
        let replayer = replayer(Comparator::Sequential);
        let bytes = encoded(&[
            (Direction::Outgoing, "/a", 200),
            (Direction::Incoming, "/w1", 200),
            (Direction::Outgoing, "/b", 200),
        ]);
        replayer.read_cassette(bytes.as_slice()).await.unwrap();

        let first = replayer.replay(get("/a")).await.unwrap();

        // The write signal is held back, so the task is still parked on it.
        let pending = tokio::time::timeout(Duration::from_millis(50), replayer.remaining()).await;
        assert!(pending.is_err());

        first.written.send(WriteOutcome::Complete).unwrap();
        let second = replayer.replay(get("/b")).await.unwrap();
        assert_eq!(second.response.status_code, 200);
        assert_eq!(replayer.remaining().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_leading_webhooks_are_never_replayed() {
        let replayer = replayer(Comparator::Sequential);
        let bytes = encoded(&[(Direction::Incoming, "/w0", 200), (Direction::Outgoing, "/a", 200)]);
        replayer.read_cassette(bytes.as_slice()).await.unwrap();

        let first = replayer.replay(get("/a")).await.unwrap();
        assert_eq!(first.response.status_code, 200);

        // The webhook ahead of /a has no call to follow, so a miss leaves it in place
        let miss = replayer.replay(get("/b")).await;
        assert!(matches!(miss, Err(PlaybackError::NoMatchingEvents)));
        assert_eq!(replayer.remaining().await.unwrap(), 1);
    }
}
