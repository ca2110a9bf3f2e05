//! HTTP client for tensorflow-lite-rest-server.
//!
//! One multipart POST per frame to `/v1/object/detection`. No retries, no
//! authentication. A non-success status or a transport error is reported as
//! [`ServiceReply::Unavailable`]; only an unparsable success body is an error.

use anyhow::{anyhow, Context, Result};
use reqwest::blocking::{multipart, Client};
use serde::Deserialize;
use std::time::Duration;

use crate::detect::backend::{DetectionService, ServiceReply};
use crate::detect::result::Prediction;

pub const DETECTION_PATH: &str = "/v1/object/detection";
const IMAGE_FIELD: &str = "image";

/// Response body of the detection endpoint. Extra fields are ignored.
#[derive(Debug, Deserialize)]
struct DetectionResponse {
    objects: Vec<Prediction>,
}

/// Parse a detection response body into predictions.
pub fn parse_detection_response(body: &[u8]) -> Result<Vec<Prediction>> {
    let response: DetectionResponse =
        serde_json::from_slice(body).map_err(|e| anyhow!("malformed detection response: {}", e))?;
    Ok(response.objects)
}

/// Detection service reached over HTTP.
pub struct HttpDetectionClient {
    url: String,
    client: Client,
}

impl HttpDetectionClient {
    /// Build a client for `http://{host}:{port}/v1/object/detection`.
    ///
    /// `timeout` of `None` keeps the transport blocking until the service
    /// answers or the connection drops.
    pub fn new(host: &str, port: u16, timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("build detection http client")?;
        Ok(Self {
            url: detection_url(host, port),
            client,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

pub fn detection_url(host: &str, port: u16) -> String {
    format!("http://{}:{}{}", host, port, DETECTION_PATH)
}

impl DetectionService for HttpDetectionClient {
    fn name(&self) -> &str {
        &self.url
    }

    fn detect(&self, image: &[u8]) -> Result<ServiceReply> {
        let part = multipart::Part::bytes(image.to_vec()).file_name(IMAGE_FIELD);
        let form = multipart::Form::new().part(IMAGE_FIELD, part);

        let response = match self.client.post(&self.url).multipart(form).send() {
            Ok(response) => response,
            Err(err) => {
                log::warn!("detection request to {} failed: {}", self.url, err);
                return Ok(ServiceReply::Unavailable {
                    reason: err.to_string(),
                });
            }
        };

        let status = response.status();
        if status != reqwest::StatusCode::OK {
            log::warn!("detection service {} returned {}", self.url, status);
            return Ok(ServiceReply::Unavailable {
                reason: format!("status {}", status.as_u16()),
            });
        }

        let body = response
            .bytes()
            .with_context(|| format!("read detection response from {}", self.url))?;
        let predictions = parse_detection_response(&body)?;
        log::debug!(
            "detection service {} returned {} objects",
            self.url,
            predictions.len()
        );
        Ok(ServiceReply::Predictions(predictions))
    }
}
