//! Keytab extraction port and its HTTP client.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use base64::prelude::*;
use serde::Deserialize;

use crate::PortError;

#[async_trait]
pub trait KeytabSource: Send + Sync {
    /// Extract a keytab holding `principals` from the KDC service at `api`.
    async fn extract(&self, api: &str, principals: &[String]) -> Result<Vec<u8>, PortError>;
}

#[derive(Deserialize)]
struct ExtKeytabReply {
    stdout: String,
}

/// Client for the KDC service's `ext_keytab` endpoint.
#[derive(Debug, Clone)]
pub struct KdcClient {
    http: reqwest::Client,
    timeout: Duration,
}

impl KdcClient {
    /// Build a client. `cacert` pins the server CA; `clientcert` (optionally
    /// with a separate `clientkey`) authenticates us.
    ///
    /// # Errors
    ///
    /// Returns an error if a PEM file cannot be read or parsed.
    pub fn new(
        cacert: Option<&Path>,
        clientcert: Option<&Path>,
        clientkey: Option<&Path>,
        timeout: Duration,
    ) -> Result<Self, PortError> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        if let Some(path) = cacert {
            let pem = std::fs::read(path)?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }
        if let Some(path) = clientcert {
            let mut pem = std::fs::read(path)?;
            if let Some(key) = clientkey {
                pem.push(b'\n');
                pem.extend(std::fs::read(key)?);
            }
            builder = builder.identity(reqwest::Identity::from_pem(&pem)?);
        }
        Ok(Self {
            http: builder.build()?,
            timeout,
        })
    }
}

#[async_trait]
impl KeytabSource for KdcClient {
    async fn extract(&self, api: &str, principals: &[String]) -> Result<Vec<u8>, PortError> {
        let url = format!("{}/v1/ext_keytab", api.trim_end_matches('/'));
        let list =
            serde_json::to_string(principals).map_err(|e| PortError::Invalid(e.to_string()))?;
        let form = reqwest::multipart::Form::new().text("principals", list);

        let response = self
            .http
            .post(&url)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PortError::Timeout {
                        tool: "ext_keytab".into(),
                        secs: self.timeout.as_secs(),
                    }
                } else {
                    e.into()
                }
            })?;
        let status = response.status();
        if !status.is_success() {
            return Err(PortError::Http(format!("{url} returned {status}")));
        }

        let reply: ExtKeytabReply = response
            .json()
            .await
            .map_err(|e| PortError::Invalid(format!("ext_keytab reply: {e}")))?;
        let keytab = BASE64_STANDARD
            .decode(reply.stdout.trim())
            .map_err(|_| PortError::Invalid("ext_keytab reply is not base64".into()))?;
        tracing::debug!(principals = principals.len(), bytes = keytab.len(), "Extracted keytab");
        Ok(keytab)
    }
}
