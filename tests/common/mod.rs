#![allow(dead_code)]

use std::{path::PathBuf, sync::Arc, time::Duration};

use color_eyre::{eyre::bail, Result};
use hyper::{header::HeaderMap, Body, Client, Method, Request, StatusCode};
use relay_gps_gateway::{config::Config, logging, mock::MockTransport, server};
use tokio::sync::oneshot;
use tokio::time::{timeout, Instant};
use tracing::{info, Level};

pub const RMC: &str = "$GPRMC,123519,A,4807.038,N,01131.000,E,022.4,084.4,230394,003.1,W*6A";
pub const GGA: &str = "$GPGGA,123519,4807.038,N,01131.000,E,1,08,0.9,545.4,M,46.9,M,,*47";

/// Same as the defaults, but quick enough for tests running in real time.
pub fn fast_config(name: &str) -> Config {
    let mut config = Config::default();

    config.scan_backoff_ms = 100;
    config.relay.probe.timeout_ms = 200;
    config.relay.reacquire_delay_ms = 400;
    config.relay.watchdog_ms = 500;
    config.gps.probe.timeout_ms = 300;
    config.gps.reacquire_delay_ms = 400;
    config.server.static_dir = static_dir(name);

    config
}

/// A directory with an `index.html` and a stylesheet, unique per test.
pub fn static_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "relay-gps-gateway-{name}-{}",
        std::process::id()
    ));

    std::fs::create_dir_all(&dir).expect("Should be able to create a temporary directory");
    std::fs::write(dir.join("index.html"), "<h1>Relay</h1>\n").expect("Should write index");
    std::fs::write(dir.join("style.css"), "h1 { color: red; }\n").expect("Should write css");

    dir
}

pub async fn start_server_with_config(config: Config, transport: MockTransport) -> u16 {
    logging::init(Level::INFO, None).await;

    let (port_tx, port_rx) = oneshot::channel();

    tokio::spawn(async move {
        if let Err(e) = server::run_any_port(config, Arc::new(transport), port_tx).await {
            panic!("Server failed: {e}");
        }
    });

    port_rx
        .await
        .expect("Server should reply with allocated port")
}

pub async fn start_server(name: &str, transport: MockTransport) -> u16 {
    start_server_with_config(fast_config(name), transport).await
}

#[derive(Debug)]
pub struct Reply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl Reply {
    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

pub async fn request(
    port: u16,
    method: Method,
    path: &str,
    body: Option<&str>,
) -> Result<Reply> {
    let builder = Request::builder()
        .method(method)
        .uri(format!("http://127.0.0.1:{port}{path}"))
        .header("origin", "http://example.com");

    let request = match body {
        Some(body) => builder
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))?,
        None => builder.body(Body::empty())?,
    };

    let response = timeout(Duration::from_secs(5), Client::new().request(request)).await??;

    let status = response.status();
    let headers = response.headers().clone();
    let body = hyper::body::to_bytes(response.into_body()).await?;

    Ok(Reply {
        status,
        headers,
        body: String::from_utf8(body.to_vec())?,
    })
}

pub async fn get(port: u16, path: &str) -> Result<Reply> {
    request(port, Method::GET, path, None).await
}

pub async fn send_command(port: u16, command: &str) -> Result<Reply> {
    let body = serde_json::json!({ "command": command }).to_string();

    request(port, Method::POST, "/", Some(&body)).await
}

/// Repeat a request until it gives the expected status.
pub async fn until_status<F, Fut>(expected: StatusCode, mut make_request: F) -> Result<Reply>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<Reply>>,
{
    let deadline = Instant::now() + Duration::from_secs(10);

    loop {
        let reply = make_request().await?;

        if reply.status == expected {
            return Ok(reply);
        }

        if Instant::now() > deadline {
            bail!("Gave up waiting for {expected}, last reply: {reply:?}");
        }

        info!(status = %reply.status, "Not yet");
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}
