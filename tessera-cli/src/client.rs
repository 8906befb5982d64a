//! HTTP client for the tesserad API.
//!
//! Every call goes through [`ApiClient::send`], which retries transport
//! failures a fixed number of times with a fixed pause. An HTTP error status
//! is an answer, not a transport failure, and is returned immediately.

use std::path::PathBuf;
use std::time::Duration;

use reqwest::multipart::{Form, Part};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::de::DeserializeOwned;
use tessera_core::wire::{
    EnrollResponse, EntryList, ErrorBody, Health, InitialContext, JanitorReport,
};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connect, timeout or I/O failure after all retries.
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned {status}: {message}")]
    Status {
        url: String,
        status: StatusCode,
        message: String,
    },

    #[error("unexpected response from {url}: {reason}")]
    Decode { url: String, reason: String },

    #[error("client setup: {0}")]
    Setup(String),
}

impl ClientError {
    /// The HTTP status, if the server answered.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

/// Connection settings shared by every command.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub cacert: Option<PathBuf>,
    pub noverify: bool,
    pub clientcert: Option<PathBuf>,
    pub clientkey: Option<PathBuf>,
    pub timeout: Duration,
    pub retries: u32,
    pub pause: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            cacert: None,
            noverify: false,
            clientcert: None,
            clientkey: None,
            timeout: Duration::from_secs(600),
            retries: 0,
            pause: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    base: String,
    http: reqwest::Client,
    retries: u32,
    pause: Duration,
}

impl ApiClient {
    pub fn new(base: &str, options: &ClientOptions) -> Result<Self, ClientError> {
        let setup = |e: &dyn std::fmt::Display| ClientError::Setup(e.to_string());
        let read = |path: &PathBuf| {
            std::fs::read(path).map_err(|e| ClientError::Setup(format!("{}: {e}", path.display())))
        };

        let mut builder = reqwest::Client::builder().timeout(options.timeout);
        if let Some(path) = &options.cacert {
            let cert = reqwest::Certificate::from_pem(&read(path)?).map_err(|e| setup(&e))?;
            builder = builder.add_root_certificate(cert);
        }
        if options.noverify {
            tracing::warn!("Server certificate verification disabled");
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(path) = &options.clientcert {
            let mut pem = read(path)?;
            if let Some(key) = &options.clientkey {
                pem.push(b'\n');
                pem.extend(read(key)?);
            }
            builder = builder.identity(reqwest::Identity::from_pem(&pem).map_err(|e| setup(&e))?);
        }

        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http: builder.build().map_err(|e| setup(&e))?,
            retries: options.retries,
            pause: options.pause,
        })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    /// Send the request built by `build`, retrying transport failures.
    ///
    /// `build` is called once per attempt since multipart bodies cannot be
    /// replayed.
    async fn send<F>(&self, path: &str, build: F) -> Result<Response, ClientError>
    where
        F: Fn(&reqwest::Client, &str) -> RequestBuilder,
    {
        let url = self.url(path);
        let mut attempt = 0;
        loop {
            match build(&self.http, &url).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => return Err(status_error(&url, response).await),
                Err(source) if attempt < self.retries && !source.is_builder() => {
                    attempt += 1;
                    tracing::warn!(
                        url = %url,
                        error = %source,
                        attempt,
                        retries = self.retries,
                        "Request failed, retrying"
                    );
                    tokio::time::sleep(self.pause).await;
                }
                Err(source) => return Err(ClientError::Transport { url, source }),
            }
        }
    }

    async fn json<T: DeserializeOwned>(
        &self,
        path: &str,
        response: Response,
    ) -> Result<T, ClientError> {
        response.json().await.map_err(|e| ClientError::Decode {
            url: self.url(path),
            reason: e.to_string(),
        })
    }

    async fn bytes(&self, path: &str, response: Response) -> Result<Vec<u8>, ClientError> {
        response
            .bytes()
            .await
            .map(|b| b.to_vec())
            .map_err(|e| ClientError::Decode {
                url: self.url(path),
                reason: e.to_string(),
            })
    }

    // ========================================================================
    // Attestation
    // ========================================================================

    pub async fn initiate(&self, ekpubhash: &str) -> Result<InitialContext, ClientError> {
        let path = "/v1/initiate";
        let response = self
            .send(path, |http, url| {
                http.post(url)
                    .multipart(Form::new().text("ekpubhash", ekpubhash.to_string()))
            })
            .await?;
        self.json(path, response).await
    }

    /// Returns the raw asset archive.
    pub async fn complete(
        &self,
        initial: &InitialContext,
        quote: &[u8],
    ) -> Result<Vec<u8>, ClientError> {
        let path = "/v1/complete";
        let initial = serde_json::to_vec(initial).map_err(|e| ClientError::Setup(e.to_string()))?;
        let response = self
            .send(path, |http, url| {
                let form = Form::new()
                    .part(
                        "initial",
                        Part::bytes(initial.clone()).file_name("initial.json"),
                    )
                    .part("quote", Part::bytes(quote.to_vec()).file_name("quote.zip"));
                http.post(url).multipart(form)
            })
            .await?;
        self.bytes(path, response).await
    }

    // ========================================================================
    // Enrollment
    // ========================================================================

    pub async fn add(
        &self,
        ek_pub: &[u8],
        profile: Option<&str>,
    ) -> Result<EnrollResponse, ClientError> {
        let path = "/v1/add";
        let response = self
            .send(path, |http, url| {
                let mut form =
                    Form::new().part("ekpub", Part::bytes(ek_pub.to_vec()).file_name("ek.pub"));
                if let Some(profile) = profile {
                    form = form.text("profile", profile.to_string());
                }
                http.post(url).multipart(form)
            })
            .await?;
        self.json(path, response).await
    }

    pub async fn query(&self, prefix: &str, with_files: bool) -> Result<EntryList, ClientError> {
        let path = "/v1/query";
        let response = self
            .send(path, |http, url| {
                let mut query = vec![("ekpubhash", prefix)];
                if !with_files {
                    query.push(("nofiles", ""));
                }
                http.get(url).query(&query)
            })
            .await?;
        self.json(path, response).await
    }

    pub async fn delete(&self, prefix: &str, with_files: bool) -> Result<EntryList, ClientError> {
        self.post_prefix("/v1/delete", prefix, with_files).await
    }

    pub async fn reenroll(&self, prefix: &str, with_files: bool) -> Result<EntryList, ClientError> {
        self.post_prefix("/v1/reenroll", prefix, with_files).await
    }

    async fn post_prefix(
        &self,
        path: &str,
        prefix: &str,
        with_files: bool,
    ) -> Result<EntryList, ClientError> {
        let response = self
            .send(path, |http, url| {
                let mut request = http
                    .post(url)
                    .multipart(Form::new().text("ekpubhash", prefix.to_string()));
                if !with_files {
                    request = request.query(&[("nofiles", "")]);
                }
                request
            })
            .await?;
        self.json(path, response).await
    }

    pub async fn janitor(&self) -> Result<JanitorReport, ClientError> {
        let path = "/v1/janitor";
        let response = self.send(path, |http, url| http.get(url)).await?;
        self.json(path, response).await
    }

    /// Hex Ed25519 key that verifies the daemon's sealed assets.
    pub async fn asset_signer(&self) -> Result<String, ClientError> {
        let path = "/v1/get-asset-signer";
        let response = self.send(path, |http, url| http.get(url)).await?;
        let bytes = self.bytes(path, response).await?;
        String::from_utf8(bytes)
            .map(|s| s.trim().to_string())
            .map_err(|e| ClientError::Decode {
                url: self.url(path),
                reason: e.to_string(),
            })
    }

    pub async fn health(&self) -> Result<Health, ClientError> {
        let path = "/healthcheck";
        let response = self.send(path, |http, url| http.get(url)).await?;
        self.json(path, response).await
    }
}

async fn status_error(url: &str, response: Response) -> ClientError {
    let status = response.status();
    let message = match response.bytes().await {
        Ok(body) => match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(body) => body.error,
            Err(_) => String::from_utf8_lossy(&body).trim().to_string(),
        },
        Err(e) => e.to_string(),
    };
    ClientError::Status {
        url: url.to_string(),
        status,
        message,
    }
}
