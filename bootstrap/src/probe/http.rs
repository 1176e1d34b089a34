//! HTTP transport for the external probe
//!
//! One ping is a `GET` of the node status route with the bearer token. A
//! configured certificate is trusted as a root and switches the scheme to
//! HTTPS. The whole request, body included, runs under the timeout so a hung
//! server counts as a failed attempt.
//!
//! Clients are built once per trusted certificate and reused across pings.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::ExternalNode;
use crate::probe::EndpointClient;

/// Status route served by the node
pub const STATUS_PATH: &str = "/api/v1/node";

/// `reqwest`-backed endpoint client
#[derive(Debug)]
pub struct HttpEndpointClient {
    timeout: Duration,
    // keyed by the trusted PEM, `None` for plain HTTP
    clients: Mutex<HashMap<Option<String>, reqwest::Client>>,
}

impl HttpEndpointClient {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// URL pinged for `endpoint`
    pub fn status_url(endpoint: &ExternalNode) -> String {
        let scheme = if endpoint.certificate.is_some() {
            "https"
        } else {
            "http"
        };
        let host = if endpoint.host.contains(':') && !endpoint.host.starts_with('[') {
            format!("[{}]", endpoint.host)
        } else {
            endpoint.host.clone()
        };
        format!("{}://{}:{}{}", scheme, host, endpoint.port, STATUS_PATH)
    }

    fn client_for(&self, endpoint: &ExternalNode) -> Result<reqwest::Client, String> {
        let mut clients = self
            .clients
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(client) = clients.get(&endpoint.certificate) {
            return Ok(client.clone());
        }

        let client = self.build_client(endpoint.certificate.as_deref())?;
        clients.insert(endpoint.certificate.clone(), client.clone());
        Ok(client)
    }

    fn build_client(&self, certificate: Option<&str>) -> Result<reqwest::Client, String> {
        let mut builder = reqwest::Client::builder().timeout(self.timeout);
        if let Some(pem) = certificate {
            let cert = reqwest::Certificate::from_pem(pem.as_bytes())
                .map_err(|e| format!("invalid certificate: {}", e))?;
            builder = builder.add_root_certificate(cert);
        }
        builder.build().map_err(|e| e.to_string())
    }
}

impl Default for HttpEndpointClient {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

#[async_trait]
impl EndpointClient for HttpEndpointClient {
    async fn ping(&self, endpoint: &ExternalNode) -> Result<(), String> {
        let client = self.client_for(endpoint)?;
        let mut request = client.get(Self::status_url(endpoint));
        if !endpoint.token.is_empty() {
            request = request.bearer_auth(&endpoint.token);
        }

        let resp = request.send().await.map_err(|e| e.to_string())?;
        if !resp.status().is_success() {
            return Err(format!("non-success status {}", resp.status()));
        }
        // Read body to ensure the node is fully responsive
        let _body = resp.bytes().await.map_err(|e| e.to_string())?;
        Ok(())
    }
}
