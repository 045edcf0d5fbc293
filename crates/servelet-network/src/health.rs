//! HTTP health checking

use servelet_core::{ServeletError, ServeletResult};
use std::time::Duration;
use tracing::debug;

/// HTTP health checker for the serving endpoint
#[derive(Debug, Clone)]
pub struct HealthChecker {
    /// HTTP client for health checks
    client: reqwest::Client,
    /// Full URL to GET
    url: String,
}

impl HealthChecker {
    /// Create a new health checker for `url`
    pub fn new(url: impl Into<String>) -> ServeletResult<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| ServeletError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    /// Health check URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// GET the URL; healthy on a 2xx response within `timeout`
    pub async fn check(&self, timeout: Duration) -> bool {
        match self.client.get(&self.url).timeout(timeout).send().await {
            Ok(response) => {
                let healthy = response.status().is_success();
                debug!(
                    endpoint = %self.url,
                    status = %response.status(),
                    healthy = healthy,
                    "Health check response"
                );
                healthy
            }
            Err(e) => {
                debug!(endpoint = %self.url, error = %e, "Health check error");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn serve_once(status_line: &'static str) -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 1024];
            let _ = socket.read(&mut buf).await;
            let response = format!("{}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status_line);
            let _ = socket.write_all(response.as_bytes()).await;
        });
        port
    }

    #[test]
    fn test_health_checker_creation() {
        let checker = HealthChecker::new("http://127.0.0.1:9000/v1/models/model").unwrap();
        assert_eq!(checker.url(), "http://127.0.0.1:9000/v1/models/model");
    }

    #[tokio::test]
    async fn test_healthy_endpoint() {
        let port = serve_once("HTTP/1.1 200 OK").await;
        let checker = HealthChecker::new(format!("http://127.0.0.1:{}/health", port)).unwrap();
        assert!(checker.check(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_unhealthy_endpoint() {
        let port = serve_once("HTTP/1.1 503 Service Unavailable").await;
        let checker = HealthChecker::new(format!("http://127.0.0.1:{}/health", port)).unwrap();
        assert!(!checker.check(Duration::from_secs(2)).await);
    }

    #[tokio::test]
    async fn test_unreachable_endpoint() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let checker = HealthChecker::new(format!("http://127.0.0.1:{}/health", port)).unwrap();
        assert!(!checker.check(Duration::from_millis(200)).await);
    }
}
