// SPDX-License-Identifier: AGPL-3.0-or-later
//! Public address discovery
//!
//! The host's public address is asked of several independent lookup
//! services in a fixed order. The first service that answers with a success
//! status wins; the rest are never contacted.

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::error::{Result, SetupError};

/// Resolves the provisioning host's public IP address
#[derive(Debug, Clone)]
pub struct IpResolver {
    endpoints: Vec<String>,
    client: reqwest::Client,
}

impl IpResolver {
    /// Create a resolver over `endpoints`, each request bounded by `timeout`
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(SetupError::InvalidConfig {
                message: "at least one IP lookup service is required".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("ioa-setup/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()
            .map_err(|e| SetupError::InvalidConfig {
                message: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self { endpoints, client })
    }

    /// Ask each endpoint in turn until one returns an address
    pub async fn resolve_public_address(&self) -> Result<String> {
        for endpoint in &self.endpoints {
            debug!(service = %endpoint, "Requesting public IP");

            match self.query(endpoint).await {
                Ok(ip) => {
                    info!(service = %endpoint, ip = %ip, "Successfully detected public IP");
                    return Ok(ip);
                }
                Err(reason) => {
                    warn!(service = %endpoint, reason = %reason, "Failed to get IP");
                }
            }
        }

        Err(SetupError::Resolution {
            attempts: self.endpoints.len(),
        })
    }

    async fn query(&self, endpoint: &str) -> std::result::Result<String, String> {
        let response = self
            .client
            .get(endpoint)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("unexpected status {status}"));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("failed to read response: {e}"))?;

        let ip = body.trim();
        if ip.is_empty() {
            return Err("empty response body".to_string());
        }

        Ok(ip.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn resolver(endpoints: Vec<String>) -> IpResolver {
        IpResolver::new(endpoints, Duration::from_millis(500)).unwrap()
    }

    #[test]
    fn test_new_requires_endpoints() {
        assert!(IpResolver::new(Vec::new(), Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn test_first_success_wins() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a"))
            .respond_with(ResponseTemplate::new(200).set_body_string("198.51.100.7\n"))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/b"))
            .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.5"))
            .expect(0)
            .mount(&server)
            .await;

        let ip = resolver(vec![
            format!("{}/a", server.uri()),
            format!("{}/b", server.uri()),
        ])
        .resolve_public_address()
        .await
        .unwrap();

        assert_eq!(ip, "198.51.100.7");
    }

    #[tokio::test]
    async fn test_falls_through_timeout_and_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("192.0.2.1")
                    .set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/broken"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("203.0.113.5"))
            .mount(&server)
            .await;

        let ip = resolver(vec![
            format!("{}/slow", server.uri()),
            format!("{}/broken", server.uri()),
            format!("{}/ok", server.uri()),
        ])
        .resolve_public_address()
        .await
        .unwrap();

        assert_eq!(ip, "203.0.113.5");
    }

    #[tokio::test]
    async fn test_empty_body_is_skipped() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_string("  \n"))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ok"))
            .respond_with(ResponseTemplate::new(200).set_body_string("2001:db8::1"))
            .mount(&server)
            .await;

        let ip = resolver(vec![
            format!("{}/empty", server.uri()),
            format!("{}/ok", server.uri()),
        ])
        .resolve_public_address()
        .await
        .unwrap();

        assert_eq!(ip, "2001:db8::1");
    }

    #[tokio::test]
    async fn test_all_endpoints_failing_is_resolution_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let err = resolver(vec![
            format!("{}/one", server.uri()),
            format!("{}/two", server.uri()),
        ])
        .resolve_public_address()
        .await
        .unwrap_err();

        assert!(matches!(err, SetupError::Resolution { attempts: 2 }));
    }
}
