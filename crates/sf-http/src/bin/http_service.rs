use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use uuid::Uuid;

use sf_http::{ExecutorSettings, JobExecutor, JobRegistry, JobRequest};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let addr = std::env::var("SIMFORGE_HTTP_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let settings = ExecutorSettings {
        miner_jar: env_path(
            "SIMFORGE_MINER_JAR",
            "external_tools/split-miner/split-miner.jar",
        ),
        simulator_command: env_path("SIMFORGE_SIMULATOR_BIN", "prosim"),
        archive_dir: env_path("SIMFORGE_ARCHIVE_DIR", "archives"),
    };

    let registry = Arc::new(JobRegistry::new());
    let executor = Arc::new(JobExecutor::new(settings, registry.clone()));

    let listener = TcpListener::bind(&addr).await?;
    println!("SimForge discovery service listening on {addr}");

    loop {
        let (mut socket, _) = listener.accept().await?;
        let registry = registry.clone();
        let executor = executor.clone();

        tokio::spawn(async move {
            let mut buffer = Vec::with_capacity(8192);
            let mut chunk = [0u8; 4096];
            loop {
                match socket.read(&mut chunk).await {
                    Ok(0) => break,
                    Ok(n) => {
                        buffer.extend_from_slice(&chunk[..n]);
                        if request_complete(&buffer) {
                            break;
                        }
                    }
                    Err(_) => return,
                }
            }

            let response = route(&buffer, &registry, &executor);
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        });
    }
}

fn env_path(variable: &str, fallback: &str) -> PathBuf {
    std::env::var(variable)
        .unwrap_or_else(|_| fallback.to_string())
        .into()
}

/// The headers are in and, if a body was announced, all of it arrived.
fn request_complete(buffer: &[u8]) -> bool {
    let Some(header_end) = find_header_end(buffer) else {
        return false;
    };
    let body_len = content_length(&buffer[..header_end]).unwrap_or(0);
    buffer.len() >= header_end + body_len
}

fn find_header_end(buffer: &[u8]) -> Option<usize> {
    buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|i| i + 4)
}

fn content_length(headers: &[u8]) -> Option<usize> {
    let headers = String::from_utf8_lossy(headers);
    headers.lines().find_map(|line| {
        let (name, value) = line.split_once(':')?;
        if name.eq_ignore_ascii_case("content-length") {
            value.trim().parse().ok()
        } else {
            None
        }
    })
}

fn route(buffer: &[u8], registry: &Arc<JobRegistry>, executor: &Arc<JobExecutor>) -> String {
    let Some(header_end) = find_header_end(buffer) else {
        return http_response("400 Bad Request", r#"{"error":"malformed request"}"#.to_string());
    };
    let head = String::from_utf8_lossy(&buffer[..header_end]);
    let mut request_line = head.lines().next().unwrap_or("").split_whitespace();
    let method = request_line.next().unwrap_or("");
    let path = request_line.next().unwrap_or("");
    let body_len = content_length(&buffer[..header_end]).unwrap_or(0);
    let body = &buffer[header_end..(header_end + body_len).min(buffer.len())];

    match (method, path) {
        ("GET", "/health") => http_response(
            "200 OK",
            r#"{"status":"ok","service":"discovery"}"#.to_string(),
        ),
        ("POST", "/discoveries") => match serde_json::from_slice::<JobRequest>(body) {
            Ok(request) => {
                let job = registry.create();
                tracing::info!("Accepted discovery job {}", job.id);
                let executor = executor.clone();
                let job_id = job.id;
                tokio::spawn(async move {
                    executor.execute(job_id, request).await;
                });
                http_response(
                    "202 Accepted",
                    format!(r#"{{"job_id":"{}","state":"pending"}}"#, job.id),
                )
            }
            Err(error) => http_response(
                "422 Unprocessable Entity",
                format!(r#"{{"error":"{error}"}}"#),
            ),
        },
        ("GET", _) if path.starts_with("/discoveries/") => {
            let id = path.trim_start_matches("/discoveries/");
            match id.parse::<Uuid>().ok().and_then(|id| registry.get(id)) {
                Some(job) => match serde_json::to_string(&job) {
                    Ok(body) => http_response("200 OK", body),
                    Err(_) => http_response(
                        "500 Internal Server Error",
                        r#"{"error":"serialization failed"}"#.to_string(),
                    ),
                },
                None => http_response("404 Not Found", r#"{"error":"unknown job"}"#.to_string()),
            }
        }
        _ => http_response("404 Not Found", r#"{"error":"unknown route"}"#.to_string()),
    }
}

fn http_response(status: &str, body: String) -> String {
    format!(
        "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}
