//! HTTP transport seam used by the remote key and chain stores.
//!
//! Stores talk to the server through the [`Transport`] trait so tests can
//! script responses without a network. The production implementation is a
//! blocking reqwest client with a 5-second per-request timeout.

use std::time::Duration;

use crate::error::Result;

/// A minimal synchronous HTTP client.
pub trait Transport: Send + Sync {
    /// Perform a GET request.
    fn get(&self, url: &str) -> Result<Response>;

    /// Perform a POST request with the given content type and body.
    fn post(&self, url: &str, content_type: &str, body: String) -> Result<Response>;
}

/// An HTTP response reduced to what the stores need.
#[derive(Debug, Clone)]
pub struct Response {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: String,
}

/// Blocking reqwest-backed [`Transport`].
#[derive(Debug)]
pub struct HttpTransport {
    client: reqwest::blocking::Client,
}

impl HttpTransport {
    /// Build a transport with the store-wide 5-second request timeout.
    pub fn new() -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self { client })
    }
}

impl Transport for HttpTransport {
    fn get(&self, url: &str) -> Result<Response> {
        let resp = self.client.get(url).send()?;
        Ok(Response {
            status: resp.status().as_u16(),
            body: resp.text()?,
        })
    }

    fn post(&self, url: &str, content_type: &str, body: String) -> Result<Response> {
        let resp = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()?;
        Ok(Response {
            status: resp.status().as_u16(),
            body: resp.text()?,
        })
    }
}
