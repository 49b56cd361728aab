use std::{sync::OnceLock, time::Duration};

use anyhow::Context as _;
use reqwest::{Client, RequestBuilder, Response};

static SHARED_CLIENT: OnceLock<Client> = OnceLock::new();

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Process-wide HTTP client shared by all S3 based stores.
pub fn shared_client() -> Result<Client, anyhow::Error> {
    if let Some(client) = SHARED_CLIENT.get() {
        return Ok(client.clone());
    }
    let client = Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    Ok(SHARED_CLIENT.get_or_init(|| client).clone())
}

/// Send a request built by `build`, retrying transport errors and 5xx
/// responses until `max_attempts` is reached.
///
/// `build` is called once per attempt, so bodies must be cheap to clone.
pub(crate) async fn send_with_retry<F>(
    op: &'static str,
    max_attempts: u32,
    build: F,
) -> Result<Response, anyhow::Error>
where
    F: Fn() -> RequestBuilder,
{
    let max_attempts = max_attempts.max(1);
    let mut attempt = 1;
    loop {
        let retry_left = attempt < max_attempts;
        match build().send().await {
            Ok(res) if res.status().is_server_error() && retry_left => {
                tracing::warn!(op, attempt, status = %res.status(), "s3 request failed, retrying");
            }
            Ok(res) => return Ok(res),
            Err(err) if retry_left && (err.is_connect() || err.is_timeout()) => {
                tracing::warn!(op, attempt, error = %err, "s3 request failed, retrying");
            }
            Err(err) => return Err(err).with_context(|| format!("s3 {op} request failed")),
        }
        tokio::time::sleep(RETRY_BACKOFF * attempt).await;
        attempt += 1;
    }
}

/// Turn non-success responses into errors that include the response body.
pub(crate) async fn error_for_status(res: Response) -> Result<Response, anyhow::Error> {
    if res.status().is_success() {
        return Ok(res);
    }
    let status = res.status();
    let body = res.text().await.context("failed to read response body")?;
    Err(anyhow::anyhow!("S3 request failed: {status}: {body}"))
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    use pretty_assertions::assert_eq;
    use tokio::{
        io::{AsyncReadExt as _, AsyncWriteExt as _},
        net::TcpListener,
    };

    use super::*;

    /// Serve every request with `status` and count the requests received.
    async fn serve_status(status: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        let hits = Arc::new(AtomicUsize::new(0));

        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let counter = counter.clone();
                tokio::spawn(async move {
                    let mut request = Vec::new();
                    let mut chunk = [0u8; 1024];
                    while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut chunk).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => request.extend_from_slice(&chunk[..n]),
                        }
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                    let res = format!(
                        "HTTP/1.1 {status}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n"
                    );
                    let _ = socket.write_all(res.as_bytes()).await;
                    let _ = socket.shutdown().await;
                });
            }
        });

        (url, hits)
    }

    async fn attempts_for(status: &'static str, max_attempts: u32) -> (u16, usize) {
        let (url, hits) = serve_status(status).await;
        let client = Client::new();
        let res = send_with_retry("test", max_attempts, || client.get(&url))
            .await
            .unwrap();
        (res.status().as_u16(), hits.load(Ordering::SeqCst))
    }

    #[tokio::test]
    async fn test_single_attempt_does_not_retry() {
        assert_eq!(attempts_for("500 Internal Server Error", 1).await, (500, 1));
    }

    #[tokio::test]
    async fn test_server_errors_retry_up_to_max_attempts() {
        assert_eq!(attempts_for("500 Internal Server Error", 3).await, (500, 3));
        assert_eq!(attempts_for("503 Service Unavailable", 2).await, (503, 2));
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        assert_eq!(attempts_for("404 Not Found", 3).await, (404, 1));
        assert_eq!(attempts_for("200 OK", 3).await, (200, 1));
    }

    #[tokio::test]
    async fn test_connect_errors_fail_after_max_attempts() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/", listener.local_addr().unwrap());
        drop(listener);

        let client = Client::new();
        let err = send_with_retry("test", 2, || client.get(&url))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("s3 test request failed"), "{err:#}");
    }

    #[test]
    fn test_shared_client_is_reused() {
        shared_client().unwrap();
        shared_client().unwrap();
        assert!(SHARED_CLIENT.get().is_some());
    }
}
