use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use azrest::prelude::{
    CancellationToken, Client, Error, ErrorCode, RequestBody, RequestOptions,
    StaticTokenProvider, TokenProvider,
};
use azrest::{BoxError, MAX_BUFFERED_BODY_BYTES};
use serde_json::{Value, json};

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    declared_length: Option<usize>,
    delay: Duration,
}

impl MockResponse {
    fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: Vec::new(),
            body: body.into().into_bytes(),
            declared_length: None,
            delay: Duration::ZERO,
        }
    }

    /// Advertises `length` without sending a body, as a HEAD reply does.
    fn head(status: u16, length: usize) -> Self {
        let mut response = Self::new(status, "");
        response.declared_length = Some(length);
        response
    }

    fn json(status: u16, body: Value) -> Self {
        Self::new(status, body.to_string()).header("Content-Type", "application/json")
    }

    fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    fn delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);
        let stop_clone = Arc::clone(&stop);

        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut response_index = 0;

            while response_index < responses.len()
                && Instant::now() < deadline
                && !stop_clone.load(Ordering::SeqCst)
            {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;

                        if !response.delay.is_zero() {
                            thread::sleep(response.delay);
                        }

                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            stop,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    while find_header_end(&raw).is_none() {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]).into_owned();
    let mut lines = header_text.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_owned();
    let path = request_line.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let mut body = raw[header_end + 4..].to_vec();
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));
    if chunked {
        // Raw chunked framing is kept; tests only need the stream drained.
        while !body.ends_with(b"0\r\n\r\n") {
            let mut chunk = vec![0_u8; 64 * 1024];
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        return Ok(CapturedRequest {
            method,
            path,
            headers,
            body,
        });
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        404 => "Not Found",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Status",
    }
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        response.declared_length.unwrap_or(response.body.len())
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(&response.body)?;
    stream.flush()
}

fn client() -> Client {
    Client::builder()
        .no_proxy()
        .build()
        .expect("client should build")
}

fn fast_retries(options: RequestOptions) -> RequestOptions {
    options.retry_base_backoff(Duration::from_millis(10))
}

fn unused_local_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
    let address = listener.local_addr().expect("read probe address");
    drop(listener);
    format!("http://{address}/items")
}

struct FailingProvider;

#[async_trait]
impl TokenProvider for FailingProvider {
    async fn get_token(&self, _scope: &str) -> Result<String, BoxError> {
        Err("no credential available".into())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_are_retried_until_success() {
    let server = MockServer::start(vec![
        MockResponse::new(503, "busy"),
        MockResponse::new(502, "bad gateway"),
        MockResponse::json(200, json!({"ok": true})),
    ]);

    let response = client()
        .execute(fast_retries(RequestOptions::get(server.url("/items"))))
        .await
        .expect("request should succeed after retries");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.json::<Value>().expect("json body"), json!({"ok": true}));
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn last_server_error_is_returned_when_retries_run_out() {
    let server = MockServer::start(vec![
        MockResponse::new(500, "one"),
        MockResponse::new(500, "two"),
        MockResponse::new(500, "three"),
    ]);

    let response = client()
        .execute(fast_retries(RequestOptions::get(server.url("/items")).retry(2)))
        .await
        .expect("5xx is returned as a response");

    assert_eq!(response.status().as_u16(), 500);
    assert_eq!(response.text_lossy(), "three");
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_errors_are_not_retried() {
    let server = MockServer::start(vec![
        MockResponse::new(404, "missing"),
        MockResponse::new(200, "unused"),
    ]);

    let response = client()
        .execute(fast_retries(RequestOptions::get(server.url("/items"))))
        .await
        .expect("4xx is returned as a response");

    assert_eq!(response.status().as_u16(), 404);
    assert_eq!(response.text_lossy(), "missing");
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn retried_post_resends_identical_body() {
    let server = MockServer::start(vec![
        MockResponse::new(503, "busy"),
        MockResponse::new(503, "busy"),
        MockResponse::json(201, json!({"id": 7})),
    ]);

    let response = client()
        .execute(fast_retries(
            RequestOptions::post(server.url("/items"))
                .header("Content-Type", "application/json")
                .body(r#"{"name":"widget"}"#),
        ))
        .await
        .expect("post should succeed after retries");

    assert_eq!(response.status().as_u16(), 201);
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(request.method, "POST");
        assert_eq!(request.body, br#"{"name":"widget"}"#);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connections_exhaust_retries() {
    let error = client()
        .execute(fast_retries(RequestOptions::get(unused_local_url()).retry(2)))
        .await
        .expect_err("nothing is listening");

    assert_eq!(error.code(), ErrorCode::RetriesExhausted);
    match error {
        Error::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert_eq!(last.code(), ErrorCode::Transport);
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn refused_connection_without_retries_is_a_transport_error() {
    let error = client()
        .execute(RequestOptions::get(unused_local_url()).retry(-1))
        .await
        .expect_err("nothing is listening");

    assert_eq!(error.code(), ErrorCode::Transport);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn slow_responses_hit_the_attempt_timeout() {
    let server = MockServer::start(vec![
        MockResponse::new(200, "late").delay(Duration::from_millis(600)),
    ]);

    let started = Instant::now();
    let error = client()
        .execute(
            RequestOptions::get(server.url("/slow"))
                .timeout(Duration::from_millis(100))
                .retry(-1),
        )
        .await
        .expect_err("request should time out");

    assert_eq!(error.code(), ErrorCode::Timeout);
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_responses_are_rejected() {
    let server = MockServer::start(vec![MockResponse::new(200, "x".repeat(64))]);

    let error = client()
        .execute(RequestOptions::get(server.url("/big")).max_response_size(16))
        .await
        .expect_err("body exceeds ceiling");

    assert_eq!(error.code(), ErrorCode::ResponseTooLarge);
    assert!(error.to_string().contains("exceeds maximum size"));
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_interrupts_retry_backoff() {
    let server = MockServer::start(vec![
        MockResponse::new(503, "busy"),
        MockResponse::new(200, "unused"),
    ]);
    let cancellation = CancellationToken::new();
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = client()
        .execute(
            RequestOptions::get(server.url("/items"))
                .retry_base_backoff(Duration::from_secs(30))
                .cancellation(cancellation),
        )
        .await
        .expect_err("call should be cancelled");

    assert!(error.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancelled_token_stops_before_sending() {
    let cancellation = CancellationToken::new();
    cancellation.cancel();

    let error = client()
        .execute(RequestOptions::get(unused_local_url()).cancellation(cancellation))
        .await
        .expect_err("call should be cancelled");

    assert_eq!(error.code(), ErrorCode::Cancelled);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn bearer_token_and_user_agent_are_attached() {
    let server = MockServer::start(vec![MockResponse::json(200, json!({}))]);

    client()
        .execute(
            RequestOptions::get(server.url("/subscriptions"))
                .scope("https://management.azure.com/.default")
                .token_provider(Arc::new(StaticTokenProvider::new("token-abc"))),
        )
        .await
        .expect("request should succeed");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    let headers = &requests[0].headers;
    assert_eq!(headers.get("authorization").map(String::as_str), Some("Bearer token-abc"));
    assert!(
        headers
            .get("user-agent")
            .is_some_and(|value| value.starts_with("azrest/"))
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn caller_headers_win_over_defaults_and_skip_auth_omits_token() {
    let server = MockServer::start(vec![MockResponse::json(200, json!({}))]);

    client()
        .execute(
            RequestOptions::get(server.url("/items"))
                .header("User-Agent", "custom-agent/2.0")
                .header("X-Trace", "abc")
                .scope("https://management.azure.com/.default")
                .token_provider(Arc::new(StaticTokenProvider::new("token-abc")))
                .skip_auth(true),
        )
        .await
        .expect("request should succeed");

    let headers = &server.requests()[0].headers;
    assert_eq!(headers.get("user-agent").map(String::as_str), Some("custom-agent/2.0"));
    assert_eq!(headers.get("x-trace").map(String::as_str), Some("abc"));
    assert!(!headers.contains_key("authorization"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn token_failures_surface_as_authentication_errors() {
    let error = client()
        .execute(
            RequestOptions::get(unused_local_url())
                .scope("https://management.azure.com/.default")
                .token_provider(Arc::new(FailingProvider)),
        )
        .await
        .expect_err("token acquisition fails");

    assert_eq!(error.code(), ErrorCode::Authentication);
    assert!(error.to_string().contains("https://management.azure.com/.default"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redirects_are_returned_when_following_is_disabled() {
    let server = MockServer::start(vec![
        MockResponse::new(302, "").header("Location", "/final"),
    ]);

    let response = client()
        .execute(RequestOptions::get(server.url("/start")).follow_redirects(false))
        .await
        .expect("redirect is returned as a response");

    assert_eq!(response.status().as_u16(), 302);
    assert_eq!(
        response
            .headers()
            .get("location")
            .and_then(|value| value.to_str().ok()),
        Some("/final")
    );
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redirects_are_followed_to_the_final_response() {
    let server = MockServer::start(vec![
        MockResponse::new(302, "").header("Location", "/middle"),
        MockResponse::new(307, "").header("Location", "/final"),
        MockResponse::json(200, json!({"done": true})),
    ]);

    let response = client()
        .execute(RequestOptions::get(server.url("/start")))
        .await
        .expect("redirects should be followed");

    assert_eq!(response.status().as_u16(), 200);
    let paths: Vec<String> = server
        .requests()
        .into_iter()
        .map(|request| request.path)
        .collect();
    assert_eq!(paths, vec!["/start", "/middle", "/final"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn see_other_after_post_switches_to_get_without_body() {
    let server = MockServer::start(vec![
        MockResponse::new(303, "").header("Location", "/result"),
        MockResponse::json(200, json!({"status": "created"})),
    ]);

    client()
        .execute(RequestOptions::post(server.url("/jobs")).body("payload"))
        .await
        .expect("redirect should be followed");

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"payload");
    assert_eq!(requests[1].method, "GET");
    assert!(requests[1].body.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn redirect_limit_is_enforced() {
    let server = MockServer::start(vec![
        MockResponse::new(302, "").header("Location", "/a"),
        MockResponse::new(302, "").header("Location", "/b"),
        MockResponse::new(302, "").header("Location", "/c"),
    ]);

    let error = client()
        .execute(RequestOptions::get(server.url("/start")).max_redirects(2))
        .await
        .expect_err("third redirect exceeds the limit");

    assert_eq!(error.code(), ErrorCode::TooManyRedirects);
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cross_origin_redirect_drops_authorization() {
    let target = MockServer::start(vec![MockResponse::json(200, json!({}))]);
    let origin = MockServer::start(vec![
        MockResponse::new(302, "").header("Location", target.url("/landing")),
    ]);

    client()
        .execute(
            RequestOptions::get(origin.url("/start"))
                .scope("https://management.azure.com/.default")
                .token_provider(Arc::new(StaticTokenProvider::new("token-abc"))),
        )
        .await
        .expect("redirect should be followed");

    assert!(origin.requests()[0].headers.contains_key("authorization"));
    assert!(!target.requests()[0].headers.contains_key("authorization"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pagination_follows_next_link_fields() {
    let server = MockServer::start(vec![
        MockResponse::json(
            200,
            json!({"value": [{"id": 1}, {"id": 2}], "nextLink": "/items?page=2"}),
        ),
        MockResponse::json(
            200,
            json!({"value": [{"id": 3}], "@odata.nextLink": "/items?page=3"}),
        ),
        MockResponse::json(200, json!({"value": [{"id": 4}]})),
    ]);

    let response = client()
        .execute(RequestOptions::get(server.url("/items")).paginate(true))
        .await
        .expect("pagination should succeed");

    let merged = response.json::<Value>().expect("merged json");
    assert_eq!(
        merged,
        json!({"value": [{"id": 1}, {"id": 2}, {"id": 3}, {"id": 4}]})
    );
    let paths: Vec<String> = server
        .requests()
        .into_iter()
        .map(|request| request.path)
        .collect();
    assert_eq!(paths, vec!["/items", "/items?page=2", "/items?page=3"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pagination_follows_link_header() {
    let server = MockServer::start(vec![
        MockResponse::json(200, json!({"value": ["a"]}))
            .header("Link", r#"</items?page=2>; rel="next", </items?page=9>; rel="last""#),
        MockResponse::json(200, json!({"value": ["b"]})),
    ]);

    let response = client()
        .execute(RequestOptions::get(server.url("/items")).paginate(true))
        .await
        .expect("pagination should succeed");

    assert_eq!(
        response.json::<Value>().expect("merged json"),
        json!({"value": ["a", "b"]})
    );
    assert_eq!(server.requests()[1].path, "/items?page=2");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pagination_keeps_collected_pages_when_a_page_fails() {
    let server = MockServer::start(vec![
        MockResponse::json(200, json!({"value": [1, 2], "nextLink": "/items?page=2"})),
        MockResponse::new(500, "boom"),
    ]);

    let response = client()
        .execute(RequestOptions::get(server.url("/items")).paginate(true).retry(-1))
        .await
        .expect("first page is still returned");

    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(
        response.json::<Value>().expect("merged json"),
        json!({"value": [1, 2]})
    );
    assert_eq!(server.served_count(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pagination_leaves_single_page_bodies_untouched() {
    let body = r#"{"value":[1],"count":1}"#;
    let server = MockServer::start(vec![
        MockResponse::new(200, body).header("Content-Type", "application/json"),
    ]);

    let response = client()
        .execute(RequestOptions::get(server.url("/items")).paginate(true))
        .await
        .expect("request should succeed");

    assert_eq!(response.text_lossy(), body);
    assert_eq!(server.served_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn head_replies_are_not_held_to_their_declared_length() {
    let server = MockServer::start(vec![MockResponse::head(200, 1000)]);

    let response = client()
        .execute(RequestOptions::new("HEAD", server.url("/big")).max_response_size(16))
        .await
        .expect("HEAD reply carries no body");

    assert_eq!(response.status().as_u16(), 200);
    assert!(response.body().is_empty());
    assert_eq!(server.requests()[0].method, "HEAD");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn merged_pages_respect_the_response_size_limit() {
    let server = MockServer::start(vec![
        MockResponse::json(200, json!({"value": ["aaaaaaaaaa"], "nextLink": "?p=2"})),
        MockResponse::json(200, json!({"value": ["bbbbbbbbbb"], "nextLink": "?p=3"})),
        MockResponse::json(200, json!({"value": ["cccccccccc"]})),
    ]);

    let response = client()
        .execute(
            RequestOptions::get(server.url("/items"))
                .paginate(true)
                .max_response_size(45),
        )
        .await
        .expect("pagination degrades instead of failing");

    assert!(response.body().len() <= 45);
    assert_eq!(
        response.json::<Value>().expect("merged json"),
        json!({"value": ["aaaaaaaaaa", "bbbbbbbbbb"]})
    );
    assert_eq!(server.served_count(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_aborts_an_in_flight_request() {
    let server = MockServer::start(vec![
        MockResponse::new(200, "late").delay(Duration::from_millis(1500)),
    ]);
    let cancellation = CancellationToken::new();
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(150)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = client()
        .execute(RequestOptions::get(server.url("/slow")).cancellation(cancellation))
        .await
        .expect_err("call should be cancelled");

    assert!(error.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_during_a_follow_up_page_escapes_execute() {
    let server = MockServer::start(vec![
        MockResponse::json(200, json!({"value": [1], "nextLink": "/items?page=2"})),
        MockResponse::json(200, json!({"value": [2]})).delay(Duration::from_millis(1500)),
    ]);
    let cancellation = CancellationToken::new();
    let trigger = cancellation.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let started = Instant::now();
    let error = client()
        .execute(
            RequestOptions::get(server.url("/items"))
                .paginate(true)
                .cancellation(cancellation),
        )
        .await
        .expect_err("pagination should be cancelled");

    assert_eq!(error.code(), ErrorCode::Cancelled);
    assert!(started.elapsed() < Duration::from_secs(1));
    let paths: Vec<String> = server
        .requests()
        .into_iter()
        .map(|request| request.path)
        .collect();
    assert_eq!(paths, vec!["/items", "/items?page=2"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn seekable_body_is_rewound_for_each_retry() {
    let server = MockServer::start(vec![
        MockResponse::new(503, "busy"),
        MockResponse::new(503, "busy"),
        MockResponse::new(201, "created"),
    ]);
    let directory = tempfile::tempdir().expect("tempdir");
    let path = directory.path().join("payload.json");
    let payload = br#"{"name":"widget","tags":["a","b"]}"#;
    std::fs::write(&path, payload).expect("write payload");
    let file = tokio::fs::File::open(&path).await.expect("open payload");

    let response = client()
        .execute(fast_retries(
            RequestOptions::post(server.url("/items")).body(RequestBody::seekable(file)),
        ))
        .await
        .expect("post should succeed after retries");

    assert_eq!(response.status().as_u16(), 201);
    let requests = server.requests();
    assert_eq!(requests.len(), 3);
    for request in &requests {
        assert_eq!(request.body, payload);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_one_shot_body_is_sent_once() {
    let server = MockServer::start(vec![
        MockResponse::new(503, "busy"),
        MockResponse::new(201, "unused"),
    ]);
    let payload = vec![b'x'; MAX_BUFFERED_BODY_BYTES + 1];

    let response = client()
        .execute(fast_retries(
            RequestOptions::post(server.url("/upload"))
                .body(RequestBody::one_shot(std::io::Cursor::new(payload))),
        ))
        .await
        .expect("503 is returned as a response");

    assert_eq!(response.status().as_u16(), 503);
    assert_eq!(server.served_count(), 1);
}
