//! Recorder: proxies live traffic and captures it into a cassette

use std::io::Write;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::cassette::{Cassette, CassetteSerializer, Direction, HttpRequest, HttpResponse};
use crate::network::{join_url, HttpClient};
use crate::{PlaybackError, Result};

use super::event_type;

/// Destination for a serialized cassette
pub type CassetteSink = Box<dyn Write + Send>;

struct Tape {
    cassette: Cassette,
    sink: Option<CassetteSink>,
}

/// Forwards requests to real endpoints and appends each exchange to the cassette
pub struct Recorder {
    remote_url: String,
    webhook_url: String,
    client: HttpClient,
    serializer: Arc<dyn CassetteSerializer>,
    tape: Mutex<Tape>,
}

impl Recorder {
    /// Create a recorder with no cassette inserted
    #[must_use]
    pub fn new(
        remote_url: impl Into<String>,
        webhook_url: impl Into<String>,
        client: HttpClient,
        serializer: Arc<dyn CassetteSerializer>,
    ) -> Self {
        Self {
            remote_url: remote_url.into(),
            webhook_url: webhook_url.into(),
            client,
            serializer,
            tape: Mutex::new(Tape {
                cassette: Cassette::new(),
                sink: None,
            }),
        }
    }

    /// Bind a fresh, empty cassette to `sink`; nothing is written yet
    pub async fn insert_cassette(&self, sink: CassetteSink) {
        let mut tape = self.tape.lock().await;
        tape.cassette = Cassette::new();
        tape.sink = Some(sink);
    }

    /// Append an interaction to the current cassette
    pub async fn write(&self, direction: Direction, request: HttpRequest, response: HttpResponse) {
        let mut tape = self.tape.lock().await;
        tape.cassette.push(direction, request, response);
        debug!("Recorded interaction #{}", tape.cassette.len());
    }

    /// Number of interactions captured so far
    pub async fn interaction_count(&self) -> usize {
        self.tape.lock().await.cassette.len()
    }

    /// Serialize the cassette and write it to the bound sink, then release the sink
    ///
    /// # Errors
    ///
    /// Returns error if no sink is bound, encoding fails or the write fails
    pub async fn save_and_close(&self) -> Result<()> {
        let mut tape = self.tape.lock().await;
        let mut sink = tape
            .sink
            .take()
            .ok_or_else(|| PlaybackError::CassetteWrite("no cassette inserted".to_string()))?;
        let cassette = std::mem::take(&mut tape.cassette);
        drop(tape);

        let output = self.serializer.encode_cassette(&cassette)?;
        tokio::task::spawn_blocking(move || {
            sink.write_all(&output)?;
            sink.flush()
        })
        .await
        .map_err(|e| PlaybackError::CassetteWrite(e.to_string()))?
        .map_err(|e| PlaybackError::CassetteWrite(e.to_string()))?;

        info!("Wrote {} interactions to cassette", cassette.len());
        Ok(())
    }

    /// Forward an API call to the remote and record it as outgoing
    ///
    /// Nothing is recorded when forwarding fails.
    ///
    /// # Errors
    ///
    /// Returns error if the remote cannot be reached or times out
    pub async fn handle(&self, request: HttpRequest) -> Result<HttpResponse> {
        info!("--> {} to {}", request.method, request.path_and_query());

        let destination = join_url(&self.remote_url, request.path_and_query());
        let response = self.client.forward(&request, &destination).await?;

        info!(
            "<-- {} from {}",
            response.status_code,
            self.remote_url.to_uppercase()
        );

        self.write(Direction::Outgoing, request, response.clone())
            .await;
        Ok(response)
    }

    /// Forward a webhook to the local application and record it as incoming
    ///
    /// The local application's response is what goes back to the webhook source.
    ///
    /// # Errors
    ///
    /// Returns error if the local application cannot be reached or times out
    pub async fn handle_webhook(&self, request: HttpRequest) -> Result<HttpResponse> {
        let kind = event_type(&request.body);
        info!(
            "[WEBHOOK] {} [{}] to {} --> FORWARDED to {}",
            request.method,
            kind,
            request.path_and_query(),
            self.webhook_url
        );

        let response = self
            .client
            .forward(&request, &self.webhook_url)
            .await
            .map_err(|e| PlaybackError::Transport {
                url: self.webhook_url.clone(),
                reason: format!("unexpected error forwarding [{kind}] webhook to client: {e}"),
            })?;

        self.write(Direction::Incoming, request, response.clone())
            .await;
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cassette::YamlSerializer;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    /// Sink that shares its buffer with the test
    #[derive(Clone, Default)]
    struct SharedSink(Arc<StdMutex<Vec<u8>>>);

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _buf: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn recorder(remote: &str) -> Recorder {
        Recorder::new(
            remote,
            "http://127.0.0.1:1/webhooks",
            HttpClient::new(Duration::from_secs(1)).unwrap(),
            Arc::new(YamlSerializer),
        )
    }

    #[tokio::test]
    async fn test_save_and_close_writes_yaml() {
        let recorder = recorder("http://127.0.0.1:1");
        let sink = SharedSink::default();
        recorder.insert_cassette(Box::new(sink.clone())).await;

        recorder
            .write(
                Direction::Outgoing,
                HttpRequest::new("GET", "/v1/balance".parse().unwrap()),
                HttpResponse::new(200, "{}"),
            )
            .await;
        assert_eq!(recorder.interaction_count().await, 1);

        recorder.save_and_close().await.unwrap();

        let written = sink.0.lock().unwrap().clone();
        let cassette = YamlSerializer.decode_cassette(&written).unwrap();
        assert_eq!(cassette.len(), 1);
        assert_eq!(recorder.interaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_insert_cassette_starts_empty() {
        let recorder = recorder("http://127.0.0.1:1");
        recorder.insert_cassette(Box::new(SharedSink::default())).await;
        recorder
            .write(
                Direction::Incoming,
                HttpRequest::new("POST", "/playback/webhooks".parse().unwrap()),
                HttpResponse::new(200, ""),
            )
            .await;

        recorder.insert_cassette(Box::new(SharedSink::default())).await;
        assert_eq!(recorder.interaction_count().await, 0);
    }

    #[tokio::test]
    async fn test_save_without_cassette_fails() {
        let recorder = recorder("http://127.0.0.1:1");
        let result = recorder.save_and_close().await;
        assert!(matches!(result, Err(PlaybackError::CassetteWrite(_))));
    }

    #[tokio::test]
    async fn test_save_propagates_write_error() {
        let recorder = recorder("http://127.0.0.1:1");
        recorder.insert_cassette(Box::new(FailingSink)).await;
        let result = recorder.save_and_close().await;
        assert!(matches!(result, Err(PlaybackError::CassetteWrite(m)) if m.contains("disk full")));
    }

    #[tokio::test]
    async fn test_failed_forward_is_not_recorded() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let recorder = recorder(&format!("http://{addr}"));
        recorder.insert_cassette(Box::new(SharedSink::default())).await;

        let result = recorder
            .handle(HttpRequest::new("GET", "/v1/customers".parse().unwrap()))
            .await;

        assert!(result.is_err());
        assert_eq!(recorder.interaction_count().await, 0);
    }
}
