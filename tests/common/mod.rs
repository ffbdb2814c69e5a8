use std::net::SocketAddr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use rtapi::spec::{EndpointSpec, RawEndpoint, RawQuery, RawTarget};

/// Spawn an in-process HTTP server that answers `/` after `delay` and `/err`
/// immediately with status 500. Returns the bound address.
pub async fn spawn_server(delay: Duration) -> SocketAddr {
    let app = Router::new()
        .route(
            "/",
            get(move || async move {
                tokio::time::sleep(delay).await;
                "ok"
            }),
        )
        .route(
            "/err",
            get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
        );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Spawn a server that accepts TCP connections but never writes a byte, so
/// every request runs into the client timeout.
#[allow(dead_code)]
pub async fn spawn_black_hole() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let mut held = Vec::new();
        loop {
            match listener.accept().await {
                Ok((stream, _)) => held.push(stream),
                Err(_) => break,
            }
        }
    });
    addr
}

/// Build a validated GET spec against `url` with tight test timings.
pub fn attack_spec(url: String, rate: u64, duration: &str, timeout: &str) -> EndpointSpec {
    EndpointSpec::from_raw(RawEndpoint {
        target: RawTarget {
            method: Some("GET".to_string()),
            url: Some(url),
            body: None,
            header: None,
        },
        query: RawQuery {
            threads: Some(2),
            max_threads: Some(2),
            connections: Some(10),
            duration: Some(duration.to_string()),
            request_rate: Some(rate),
            timeout: Some(timeout.to_string()),
        },
    })
    .unwrap()
}
