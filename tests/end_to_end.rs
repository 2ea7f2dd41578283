//! Requests served end to end: configuration → listener → sandboxed script.

use std::time::Duration;

use axum::http::StatusCode;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use directive_server::config::ServerSettings;

mod common;

const BASIC: &str = r#"
- init: 'let motd = "hi";'
- http: 127.0.0.1:0
- location: /
  content: response.write(request.method)
"#;

#[tokio::test]
async fn test_method_echo_at_root() {
    let running = common::start(BASIC).await;
    let client = common::client();

    let res = client
        .get(common::url(common::addr(&running), "/"))
        .send()
        .await
        .expect("server unreachable");
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "GET");

    common::stop(running).await;
}

#[tokio::test]
async fn test_unmatched_path_is_404() {
    let running = common::start(BASIC).await;
    let res = common::client()
        .get(common::url(common::addr(&running), "/nowhere"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    common::stop(running).await;
}

#[tokio::test]
async fn test_root_globals_are_visible() {
    let running = common::start(
        r#"
- init: 'let motd = "hi";'
- http: 127.0.0.1:0
- location: /motd
  content: 'response.write(`${motd} from ${server.name}`)'
"#,
    )
    .await;
    let body = common::client()
        .get(common::url(common::addr(&running), "/motd"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "hi from directive-server");
    common::stop(running).await;
}

#[tokio::test]
async fn test_method_matcher() {
    let running = common::start(
        r#"
- http: 127.0.0.1:0
- location: /submit
  methods: [POST]
  content: response.write("posted")
"#,
    )
    .await;
    let client = common::client();
    let url = common::url(common::addr(&running), "/submit");

    let get = client.get(&url).send().await.unwrap();
    assert_eq!(get.status(), StatusCode::NOT_FOUND);

    let post = client.post(&url).send().await.unwrap();
    assert_eq!(post.status(), StatusCode::OK);
    assert_eq!(post.text().await.unwrap(), "posted");

    common::stop(running).await;
}

#[tokio::test]
async fn test_script_error_keeps_partial_output() {
    let running = common::start(
        r#"
- http: 127.0.0.1:0
- location: /boom
  content: 'response.write("partial"); throw "boom";'
"#,
    )
    .await;
    let res = common::client()
        .get(common::url(common::addr(&running), "/boom"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.text().await.unwrap(), "partial");
    assert_eq!(running.active_sandboxes(), 0);
    common::stop(running).await;
}

#[tokio::test]
async fn test_status_headers_and_json() {
    let running = common::start(
        r#"
- http: 127.0.0.1:0
- location: /created
  content: |
    response.set_header("x-kind", "widget");
    response.status(201);
    response.write("made");
- location: /json
  content: 'response.json(#{ ok: true, n: 3 })'
"#,
    )
    .await;
    let client = common::client();
    let addr = common::addr(&running);

    let created = client.get(common::url(addr, "/created")).send().await.unwrap();
    assert_eq!(created.status(), StatusCode::CREATED);
    assert_eq!(created.headers()["x-kind"], "widget");
    assert_eq!(created.text().await.unwrap(), "made");

    let json = client.get(common::url(addr, "/json")).send().await.unwrap();
    assert_eq!(json.headers()["content-type"], "application/json");
    let value: serde_json::Value = json.json().await.unwrap();
    assert_eq!(value, serde_json::json!({ "ok": true, "n": 3 }));

    common::stop(running).await;
}

#[tokio::test]
async fn test_request_binding_fields() {
    let running = common::start(
        r#"
- http: 127.0.0.1:0
- location: /echo
  content: 'response.write(`${request.path}|${request.query}|${request.header("x-test")}|${request.body}`)'
"#,
    )
    .await;
    let body = common::client()
        .post(common::url(common::addr(&running), "/echo?a=1"))
        .header("x-test", "yes")
        .body("ping")
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "/echo|a=1|yes|ping");
    common::stop(running).await;
}

#[tokio::test]
async fn test_named_handler_guard_and_params() {
    let running = common::start(
        r#"
- init: |
    fn allow(req) { req.header("x-token") == "secret" }
    fn show(req, res) { res.write(`user ${req.params.id}`); }
- http: 127.0.0.1:0
- location: /users/{id}
  auth: allow
  handler: show
"#,
    )
    .await;
    let client = common::client();
    let url = common::url(common::addr(&running), "/users/42");

    let denied = client.get(&url).send().await.unwrap();
    assert_eq!(denied.status(), StatusCode::UNAUTHORIZED);

    let allowed = client.get(&url).header("x-token", "secret").send().await.unwrap();
    assert_eq!(allowed.status(), StatusCode::OK);
    assert_eq!(allowed.text().await.unwrap(), "user 42");

    common::stop(running).await;
}

#[tokio::test]
async fn test_sandboxes_are_isolated() {
    let running = common::start(
        r#"
- init: 'let counter = 0;'
- http: 127.0.0.1:0
- location: /count
  content: 'let seen = counter; counter += 1; response.write(seen.to_string());'
"#,
    )
    .await;
    let client = common::client();
    let url = common::url(common::addr(&running), "/count");

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let client = client.clone();
        let url = url.clone();
        tasks.push(tokio::spawn(async move {
            client.get(url).send().await.unwrap().text().await.unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), "0");
    }
    assert_eq!(client.get(&url).send().await.unwrap().text().await.unwrap(), "0");
    assert_eq!(running.active_sandboxes(), 0);

    common::stop(running).await;
}

#[tokio::test]
async fn test_runaway_script_times_out() {
    let mut settings = ServerSettings::default();
    settings.script.timeout_ms = 200;
    settings.script.max_operations = 0;

    let running = common::start_with(
        r#"
- http: 127.0.0.1:0
- location: /spin
  content: 'loop { }'
- location: /spin-after-write
  content: 'response.write("started"); loop { }'
- location: /ok
  content: response.write("still serving")
"#,
        settings,
    )
    .await;
    let client = common::client();
    let addr = common::addr(&running);

    let started = std::time::Instant::now();
    let spin = client.get(common::url(addr, "/spin")).send().await.unwrap();
    assert_eq!(spin.status(), StatusCode::GATEWAY_TIMEOUT);
    assert!(started.elapsed() < Duration::from_secs(5));

    let partial = client.get(common::url(addr, "/spin-after-write")).send().await.unwrap();
    assert_eq!(partial.status(), StatusCode::OK);
    assert_eq!(partial.text().await.unwrap(), "started");

    let ok = client.get(common::url(addr, "/ok")).send().await.unwrap();
    assert_eq!(ok.text().await.unwrap(), "still serving");

    common::stop(running).await;
}

#[tokio::test]
async fn test_nested_locations() {
    let running = common::start(
        r#"
- init: 'fn tag(req, res) { res.set_header("x-api", "1"); }'
- http: 127.0.0.1:0
- location: /api
  middleware: [tag]
  content: response.write("root")
  nested:
    - location: /items/{id}
      methods: [GET]
      content: 'response.write(request.params.id)'
"#,
    )
    .await;
    let client = common::client();
    let addr = common::addr(&running);

    let item = client.get(common::url(addr, "/api/items/7")).send().await.unwrap();
    assert_eq!(item.headers()["x-api"], "1");
    assert_eq!(item.text().await.unwrap(), "7");

    let delete = client.delete(common::url(addr, "/api/items/7")).send().await.unwrap();
    assert_eq!(delete.status(), StatusCode::NOT_FOUND);

    let root = client.get(common::url(addr, "/api")).send().await.unwrap();
    assert_eq!(root.text().await.unwrap(), "root");

    common::stop(running).await;
}

#[tokio::test]
async fn test_headers_handle_is_live() {
    let running = common::start(
        r#"
- http: 127.0.0.1:0
- location: /live
  content: 'let h = response.headers(); h["x-live"] = "1"; h.add("x-multi", "a"); response.write("ok")'
"#,
    )
    .await;
    let res = common::client()
        .get(common::url(common::addr(&running), "/live"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.headers()["x-live"], "1");
    assert_eq!(res.headers()["x-multi"], "a");
    assert_eq!(res.text().await.unwrap(), "ok");
    common::stop(running).await;
}

#[tokio::test]
async fn test_idle_connection_is_closed() {
    let mut settings = ServerSettings::default();
    settings.timeouts.idle_secs = 1;
    let running = common::start_with(BASIC, settings).await;

    let mut stream = tokio::net::TcpStream::connect(common::addr(&running)).await.unwrap();
    stream
        .write_all(b"GET / HTTP/1.1\r\nHost: test\r\n\r\n")
        .await
        .unwrap();

    // The keep-alive connection stays open after the response until the idle
    // window passes, then the server hangs up.
    let mut received = Vec::new();
    let closed = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut received)).await;
    assert!(closed.is_ok(), "idle connection was never closed");
    let text = String::from_utf8_lossy(&received);
    assert!(text.starts_with("HTTP/1.1 200"), "unexpected response: {}", text);
    assert!(text.ends_with("GET"));

    common::stop(running).await;
}
