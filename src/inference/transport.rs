//! HTTP transport seam.
//!
//! Everything that talks to a backend goes through [`Transport`], so tests can
//! substitute a stub without touching process-wide state. The production
//! implementation is [`ReqwestTransport`].

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt, TryStreamExt};
use reqwest::Client as HttpClient;

use super::errors::InferenceError;

// ─── Constants ───────────────────────────────────────────────────────────────

/// TCP connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Request / Response ──────────────────────────────────────────────────────

/// A response body as a stream of byte chunks. Dropping it releases the
/// underlying connection.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, InferenceError>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// A single outbound HTTP request.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    /// Total time allowed for the request, body included.
    pub timeout: Duration,
}

impl TransportRequest {
    pub fn get(url: impl Into<String>, timeout: Duration) -> Self {
        Self {
            method: Method::Get,
            url: url.into(),
            headers: Vec::new(),
            body: None,
            timeout,
        }
    }

    pub fn post_json<T: serde::Serialize>(
        url: impl Into<String>,
        body: &T,
        timeout: Duration,
    ) -> Result<Self, InferenceError> {
        let body = serde_json::to_vec(body).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("failed to serialize request body: {e}"),
        })?;
        Ok(Self {
            method: Method::Post,
            url: url.into(),
            headers: vec![("Content-Type".to_string(), "application/json".to_string())],
            body: Some(body),
            timeout,
        })
    }

    pub fn with_headers<I>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        self.headers.extend(headers);
        self
    }
}

/// Status plus a lazily-read body.
pub struct TransportResponse {
    pub status: u16,
    pub body: ByteStream,
}

impl TransportResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Read the whole body into a string.
    pub async fn text(self) -> Result<String, InferenceError> {
        let mut body = self.body;
        let mut buf = Vec::new();
        while let Some(chunk) = body.next().await {
            buf.extend_from_slice(&chunk?);
        }
        String::from_utf8(buf).map_err(|e| InferenceError::MalformedResponse {
            reason: format!("response body is not valid UTF-8: {e}"),
        })
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

// ─── Transport ───────────────────────────────────────────────────────────────

/// Sends one HTTP request and returns the status with a streaming body.
///
/// Implementations map their own failures onto `InferenceError`
/// (`ConnectionFailed`, `Timeout`); a non-2xx status is not an error here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, InferenceError>;
}

/// `reqwest`-backed transport used in production.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, InferenceError> {
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| InferenceError::ConnectionFailed {
                endpoint: String::new(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: TransportRequest) -> Result<TransportResponse, InferenceError> {
        let TransportRequest {
            method,
            url,
            headers,
            body,
            timeout,
        } = request;

        let mut builder = match method {
            Method::Get => self.http.get(&url),
            Method::Post => self.http.post(&url),
        };
        builder = builder.timeout(timeout);
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout {
                    duration_ms: timeout.as_millis() as u64,
                }
            } else {
                InferenceError::ConnectionFailed {
                    endpoint: url.clone(),
                    reason: e.to_string(),
                }
            }
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_err(|e| InferenceError::StreamError {
                reason: format!("stream read error: {e}"),
            });

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}

// ─── Test Stub ───────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod stub {
    //! In-memory transport for tests.

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// A canned reply. `chunks` are delivered one per poll; `hang` keeps the
    /// body open after the last chunk until the consumer drops it.
    #[derive(Clone)]
    pub enum StubReply {
        Respond {
            status: u16,
            chunks: Vec<Vec<u8>>,
            hang: bool,
        },
        Fail(fn() -> InferenceError),
        /// Never answers; only cancellation or a timeout gets past it.
        Stall,
        /// Answers with the inner reply after a delay.
        Delayed(Duration, Box<StubReply>),
    }

    impl StubReply {
        pub fn json(status: u16, body: &str) -> Self {
            StubReply::Respond {
                status,
                chunks: vec![body.as_bytes().to_vec()],
                hang: false,
            }
        }

        pub fn ndjson(lines: &[&str]) -> Self {
            StubReply::Respond {
                status: 200,
                chunks: lines.iter().map(|l| format!("{l}\n").into_bytes()).collect(),
                hang: false,
            }
        }

        pub fn chunks(chunks: Vec<Vec<u8>>, hang: bool) -> Self {
            StubReply::Respond {
                status: 200,
                chunks,
                hang,
            }
        }
    }

    /// Flips to `true` when the body it is attached to is dropped.
    pub struct ReleaseFlag(pub Arc<AtomicBool>);

    impl Drop for ReleaseFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Serves replies by URL suffix. `models` answers model-listing GETs,
    /// `chat` replies are consumed in order by POSTs.
    #[derive(Clone)]
    pub struct StubTransport {
        pub models: Arc<Mutex<StubReply>>,
        pub chat: Arc<Mutex<VecDeque<StubReply>>>,
        pub requests: Arc<Mutex<Vec<TransportRequest>>>,
        pub released: Arc<AtomicBool>,
        pub probe_count: Arc<AtomicUsize>,
    }

    impl StubTransport {
        pub fn new() -> Self {
            Self {
                models: Arc::new(Mutex::new(StubReply::json(200, r#"{"models":[]}"#))),
                chat: Arc::new(Mutex::new(VecDeque::new())),
                requests: Arc::new(Mutex::new(Vec::new())),
                released: Arc::new(AtomicBool::new(false)),
                probe_count: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn unreachable() -> Self {
            let stub = Self::new();
            *stub.models.lock().unwrap() = StubReply::Fail(|| InferenceError::ConnectionFailed {
                endpoint: "http://localhost:11434".into(),
                reason: "connection refused".into(),
            });
            stub
        }

        pub fn push_chat(&self, reply: StubReply) -> &Self {
            self.chat.lock().unwrap().push_back(reply);
            self
        }

        pub fn chat_bodies(&self) -> Vec<serde_json::Value> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .filter_map(|r| r.body.as_ref())
                .map(|b| serde_json::from_slice(b).unwrap())
                .collect()
        }

        pub fn was_released(&self) -> bool {
            self.released.load(Ordering::SeqCst)
        }

        /// Only chat bodies carry the release flag; probe bodies are not tracked.
        fn respond(&self, reply: StubReply, track_release: bool) -> BoxedReply {
            match reply {
                StubReply::Respond {
                    status,
                    chunks,
                    hang,
                } => {
                    let flag = track_release.then(|| ReleaseFlag(self.released.clone()));
                    let items = futures::stream::iter(
                        chunks.into_iter().map(|c| Ok::<_, InferenceError>(Bytes::from(c))),
                    );
                    let body: ByteStream = if hang {
                        Box::pin(items.chain(futures::stream::pending()).map(move |item| {
                            let _keep = &flag;
                            item
                        }))
                    } else {
                        Box::pin(items.map(move |item| {
                            let _keep = &flag;
                            item
                        }))
                    };
                    BoxedReply::Ready(Ok(TransportResponse { status, body }))
                }
                StubReply::Fail(make) => BoxedReply::Ready(Err(make())),
                StubReply::Stall => BoxedReply::Stall,
                StubReply::Delayed(delay, inner) => BoxedReply::Delayed(delay, inner),
            }
        }
    }

    enum BoxedReply {
        Ready(Result<TransportResponse, InferenceError>),
        Stall,
        Delayed(Duration, Box<StubReply>),
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn send(
            &self,
            request: TransportRequest,
        ) -> Result<TransportResponse, InferenceError> {
            let request_is_chat = request.method == Method::Post;
            let reply = match request.method {
                Method::Get => {
                    self.probe_count.fetch_add(1, Ordering::SeqCst);
                    self.models.lock().unwrap().clone()
                }
                Method::Post => {
                    self.requests.lock().unwrap().push(request.clone());
                    self.chat
                        .lock()
                        .unwrap()
                        .pop_front()
                        .unwrap_or(StubReply::json(500, "no reply queued"))
                }
            };
            match self.respond(reply, request_is_chat) {
                BoxedReply::Ready(result) => result,
                BoxedReply::Stall => futures::future::pending().await,
                BoxedReply::Delayed(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    match self.respond(*inner, request_is_chat) {
                        BoxedReply::Ready(result) => result,
                        _ => futures::future::pending().await,
                    }
                }
            }
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::stub::*;
    use super::*;

    #[test]
    fn test_post_json_sets_content_type() {
        let req = TransportRequest::post_json(
            "http://localhost:11434/api/chat",
            &serde_json::json!({"model": "phi3:mini"}),
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(req.method, Method::Post);
        assert!(req
            .headers
            .iter()
            .any(|(k, v)| k == "Content-Type" && v == "application/json"));
        assert_eq!(req.body.as_deref(), Some(br#"{"model":"phi3:mini"}"#.as_slice()));
    }

    #[tokio::test]
    async fn test_response_text_joins_chunks() {
        let stub = StubTransport::new();
        stub.push_chat(StubReply::chunks(
            vec![b"{\"a\":".to_vec(), b"1}".to_vec()],
            false,
        ));
        let resp = stub
            .send(TransportRequest::post_json("http://x/api/chat", &1, Duration::from_secs(1)).unwrap())
            .await
            .unwrap();
        assert!(resp.is_success());
        assert_eq!(resp.text().await.unwrap(), r#"{"a":1}"#);
        assert!(stub.was_released());
    }

    #[test]
    fn test_is_success_range() {
        let ok = TransportResponse {
            status: 204,
            body: Box::pin(futures::stream::empty()),
        };
        let not_found = TransportResponse {
            status: 404,
            body: Box::pin(futures::stream::empty()),
        };
        assert!(ok.is_success());
        assert!(!not_found.is_success());
    }
}
