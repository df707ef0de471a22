//! Make/model verification service client.
//!
//! The service receives a JPEG still as multipart field `image` and answers with
//! the makes it recognized:
//!
//! ```json
//! { "is_success": true, "detections": [ { "mmg": [ { "make_name": "Jaguar" } ] } ] }
//! ```

use reqwest::blocking::multipart::{Form, Part};
use reqwest::header::ACCEPT;
use serde::Deserialize;
use std::io::Read;
use std::time::Duration;

use crate::error::SentryError;

const MAX_RESPONSE_BYTES: u64 = 1024 * 1024;

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct VerificationResponse {
    #[serde(default)]
    pub is_success: bool,
    #[serde(default)]
    pub detections: Vec<VehicleMatch>,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct VehicleMatch {
    #[serde(default)]
    pub mmg: Vec<MakeMatch>,
}

/// One make/model/generation candidate. Only the make is used.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub struct MakeMatch {
    #[serde(default)]
    pub make_name: String,
}

impl VerificationResponse {
    /// True when the response succeeded and any candidate's make equals `brand`, ignoring case.
    pub fn matches_brand(&self, brand: &str) -> bool {
        if !self.is_success {
            return false;
        }
        let brand = brand.to_lowercase();
        self.detections
            .iter()
            .flat_map(|d| d.mmg.iter())
            .any(|m| m.make_name.to_lowercase() == brand)
    }
}

/// Verification capability.
pub trait Verifier: Send + Sync {
    fn verify(&self, jpeg: &[u8]) -> Result<VerificationResponse, SentryError>;
}

#[derive(Clone, Debug)]
pub struct HttpVerifierConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub timeout: Duration,
}

/// Posts snapshots to the verification endpoint as multipart form data.
pub struct HttpVerifier {
    client: reqwest::blocking::Client,
    config: HttpVerifierConfig,
}

impl HttpVerifier {
    pub fn new(config: HttpVerifierConfig) -> Result<Self, SentryError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .build()
            .map_err(|e| SentryError::Config(format!("verification client: {}", e)))?;
        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }
}

impl Verifier for HttpVerifier {
    fn verify(&self, jpeg: &[u8]) -> Result<VerificationResponse, SentryError> {
        let image = Part::bytes(jpeg.to_vec())
            .file_name("snapshot.jpg")
            .mime_str("image/jpeg")
            .map_err(|e| SentryError::VerificationTransport(e.to_string()))?;
        let form = Form::new().part("image", image);

        let mut request = self
            .client
            .post(&self.config.endpoint)
            .header(ACCEPT, "application/json")
            .multipart(form);
        if let Some(key) = &self.config.api_key {
            request = request.header("api-key", key);
        }

        let response = request
            .send()
            .map_err(|e| SentryError::VerificationTransport(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SentryError::VerificationTransport(format!(
                "service answered HTTP {}",
                status.as_u16()
            )));
        }

        serde_json::from_reader(response.take(MAX_RESPONSE_BYTES))
            .map_err(|e| SentryError::VerificationTransport(format!("invalid response: {}", e)))
    }
}
