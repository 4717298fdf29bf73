//! Integration tests for the record/replay cycle over real sockets

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use tempfile::TempDir;
use tokio::net::TcpListener;

use playback::cassette::{CassetteSerializer, HttpRequest, HttpResponse, YamlSerializer};
use playback::config::{Config, Mode};
use playback::network::{HttpClient, ProxyListener, FORWARD_TIMEOUT_SECS};
use playback::proxy::{PlaybackServer, ERROR_TYPE};

/// In-process upstream that answers from a fixed sequence and logs what it saw
#[derive(Clone)]
struct Mock {
    addr: SocketAddr,
    responses: Arc<Vec<(u16, &'static str)>>,
    seen: Arc<Mutex<Vec<String>>>,
}

impl Mock {
    async fn spawn(responses: Vec<(u16, &'static str)>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mock = Self {
            addr: listener.local_addr().unwrap(),
            responses: Arc::new(responses),
            seen: Arc::new(Mutex::new(Vec::new())),
        };

        let server = mock.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let server = server.clone();
                tokio::spawn(async move {
                    let service = service_fn(move |req| server.clone().answer(req));
                    let _ = http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });

        mock
    }

    async fn answer(self, req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
        let path = req.uri().path().to_string();
        let body = req.into_body().collect().await.unwrap().to_bytes();

        let index = {
            let mut seen = self.seen.lock().unwrap();
            seen.push(format!("{path} {}", String::from_utf8_lossy(&body)));
            seen.len() - 1
        };
        let (status, body) = self.responses[index % self.responses.len()];

        Ok(Response::builder()
            .status(status)
            .header("testHeader", "testHeaderValue")
            .body(Full::new(Bytes::from(body)))
            .unwrap())
    }

    fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

struct Harness {
    proxy: String,
    client: HttpClient,
    server: Arc<PlaybackServer>,
    upstream: Mock,
    webhooks: Mock,
    dir: TempDir,
}

impl Harness {
    async fn start(upstream: Vec<(u16, &'static str)>) -> Self {
        let upstream = Mock::spawn(upstream).await;
        let webhooks = Mock::spawn(vec![(200, "ok")]).await;
        let dir = TempDir::new().unwrap();

        let config = Config::new(
            upstream.url(),
            format!("{}/hooks", webhooks.url()),
            dir.path(),
            Mode::Auto,
        );
        let server = Arc::new(PlaybackServer::new(&config).await.unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy = format!("http://{}", listener.local_addr().unwrap());
        tokio::spawn(ProxyListener::new(Arc::clone(&server)).serve(listener));

        Self {
            proxy,
            client: HttpClient::new(Duration::from_secs(FORWARD_TIMEOUT_SECS)).unwrap(),
            server,
            upstream,
            webhooks,
            dir,
        }
    }

    async fn send(&self, method: &str, target: &str, body: &str) -> HttpResponse {
        let mut request = HttpRequest::new(method, target.parse().unwrap());
        request.body = body.as_bytes().to_vec();
        self.client
            .forward(&request, &format!("{}{}", self.proxy, target))
            .await
            .unwrap()
    }

    async fn get(&self, target: &str) -> HttpResponse {
        self.send("GET", target, "").await
    }

    async fn control(&self, target: &str) -> HttpResponse {
        self.send("POST", target, "").await
    }
}

fn error_message(response: &HttpResponse) -> String {
    let json: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
    assert_eq!(json["error"]["type"], ERROR_TYPE);
    json["error"]["message"].as_str().unwrap().to_string()
}

#[tokio::test]
async fn test_record_then_replay_returns_identical_responses() {
    let harness = Harness::start(vec![(200, "body1"), (402, "body2")]).await;

    assert_eq!(harness.control("/playback/mode/record").await.status_code, 200);
    assert_eq!(
        harness
            .control("/playback/cassette/load?filepath=session.yaml")
            .await
            .status_code,
        200
    );

    let first = harness.get("/v1/first").await;
    let second = harness.get("/v1/second").await;
    assert_eq!((first.status_code, first.body.as_slice()), (200, &b"body1"[..]));
    assert_eq!((second.status_code, second.body.as_slice()), (402, &b"body2"[..]));

    assert_eq!(harness.control("/playback/cassette/eject").await.status_code, 200);

    let saved = std::fs::read(harness.dir.path().join("session.yaml")).unwrap();
    assert_eq!(YamlSerializer.decode_cassette(&saved).unwrap().len(), 2);

    assert_eq!(harness.control("/playback/mode/replay").await.status_code, 200);
    assert_eq!(
        harness
            .control("/playback/cassette/load?filepath=session.yaml")
            .await
            .status_code,
        200
    );

    let replayed_first = harness.get("/v1/first").await;
    let replayed_second = harness.get("/v1/second").await;
    assert_eq!(replayed_first.status_code, 200);
    assert_eq!(replayed_first.body, b"body1");
    assert_eq!(
        replayed_first.headers.get("testheader"),
        Some("testHeaderValue")
    );
    assert_eq!(replayed_second.status_code, 402);
    assert_eq!(replayed_second.body, b"body2");

    // Replay never reaches the upstream
    assert_eq!(harness.upstream.seen().len(), 2);

    let exhausted = harness.get("/v1/third").await;
    assert_eq!(exhausted.status_code, 500);
    assert_eq!(error_message(&exhausted), "no matching events");
}

#[tokio::test]
async fn test_auto_mode_records_new_and_replays_existing_cassettes() {
    let harness = Harness::start(vec![(200, "hello")]).await;

    harness
        .control("/playback/cassette/load?filepath=auto/new.yaml")
        .await;
    assert!(harness.server.cassette_loaded().await);
    assert!(harness.server.is_recording().await);
    harness.get("/v1/ping").await;
    harness.control("/playback/cassette/eject").await;

    harness
        .control("/playback/cassette/load?filepath=auto/new.yaml")
        .await;
    assert!(harness.server.cassette_loaded().await);
    assert!(!harness.server.is_recording().await);
    assert_eq!(harness.server.replayer().remaining().await.unwrap(), 1);
}

#[tokio::test]
async fn test_webhooks_replay_before_next_request_is_matched() {
    let harness = Harness::start(vec![(200, "A"), (200, "B")]).await;

    harness.control("/playback/cassette/load?filepath=hooks.yaml").await;
    harness.get("/v1/a").await;
    let ack = harness
        .send("POST", "/playback/webhooks", r#"{"type":"w1"}"#)
        .await;
    assert_eq!(ack.status_code, 200);
    harness
        .send("POST", "/playback/webhooks", r#"{"type":"w2"}"#)
        .await;
    harness.get("/v1/b").await;
    harness.control("/playback/cassette/eject").await;

    let recorded = harness.webhooks.seen();
    assert_eq!(recorded.len(), 2);

    harness.control("/playback/cassette/load?filepath=hooks.yaml").await;
    assert!(!harness.server.is_recording().await);

    let a = harness.get("/v1/a").await;
    assert_eq!(a.body, b"A");

    // Matching B waits for A's webhooks to be delivered
    let b = harness.get("/v1/b").await;
    assert_eq!(b.body, b"B");

    let delivered = harness.webhooks.seen();
    assert_eq!(
        delivered,
        vec![
            r#"/hooks {"type":"w1"}"#.to_string(),
            r#"/hooks {"type":"w2"}"#.to_string(),
            r#"/hooks {"type":"w1"}"#.to_string(),
            r#"/hooks {"type":"w2"}"#.to_string(),
        ]
    );
    assert_eq!(harness.server.replayer().remaining().await.unwrap(), 0);
}

#[tokio::test]
async fn test_absolute_cassette_path_is_rejected() {
    let harness = Harness::start(vec![(200, "")]).await;

    let response = harness
        .control("/playback/cassette/load?filepath=/etc/passwd.yaml")
        .await;
    assert_eq!(response.status_code, 400);
    assert!(error_message(&response).contains("must be a relative filepath"));
    assert!(!harness.server.cassette_loaded().await);

    let not_yaml = harness
        .control("/playback/cassette/load?filepath=notes.txt")
        .await;
    assert_eq!(not_yaml.status_code, 400);

    let missing = harness.control("/playback/cassette/load").await;
    assert_eq!(missing.status_code, 400);
    assert_eq!(
        error_message(&missing),
        "\"filepath\" query param must be present"
    );
}

#[tokio::test]
async fn test_traffic_without_cassette_is_rejected() {
    let harness = Harness::start(vec![(200, "never")]).await;

    let response = harness.get("/v1/customers").await;
    assert_eq!(response.status_code, 400);
    assert_eq!(error_message(&response), "no cassette is loaded");
    assert!(harness.upstream.seen().is_empty());

    let eject = harness.control("/playback/cassette/eject").await;
    assert_eq!(eject.status_code, 400);
}

#[tokio::test]
async fn test_control_errors() {
    let harness = Harness::start(vec![(200, "")]).await;

    let invalid_mode = harness.control("/playback/mode/rewind").await;
    assert_eq!(invalid_mode.status_code, 400);
    assert!(error_message(&invalid_mode).contains("\"rewind\" is not a valid playback mode"));
    assert_eq!(harness.server.mode().await, Mode::Auto);

    let unknown = harness.control("/playback/unknown").await;
    assert_eq!(unknown.status_code, 404);
    assert!(String::from_utf8_lossy(&unknown.body)
        .contains("is not a valid /playback/ control endpoint"));

    let missing_dir = harness
        .control("/playback/cassette/setroot?dir=/definitely/not/here")
        .await;
    assert_eq!(missing_dir.status_code, 400);
    assert!(error_message(&missing_dir).contains("does not exist"));

    let wrong_method = harness.send("DELETE", "/playback/cassette/eject", "").await;
    assert_eq!(wrong_method.status_code, 405);

    let nested = harness.dir.path().join("nested");
    std::fs::create_dir(&nested).unwrap();
    let setroot = harness
        .control(&format!(
            "/playback/cassette/setroot?dir={}",
            nested.display()
        ))
        .await;
    assert_eq!(setroot.status_code, 200);
    assert_eq!(harness.server.status().await.cassette_dir, nested);
}
