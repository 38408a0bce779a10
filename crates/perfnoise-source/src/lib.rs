use std::collections::HashSet;
use std::time::Duration;

use perfnoise_config::SourceConfig;
use perfnoise_core::{RawRun, Signature, SignatureId};
use reqwest::blocking::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source.endpoint is not configured")]
    NotConfigured,
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("request to {url} failed with status {status}")]
    Status { url: String, status: u16 },
    #[error("signature {0} not found")]
    NotFound(SignatureId),
}

/// Read-only access to the remote performance database.
pub trait SignalSource: Send + Sync {
    fn signature(&self, id: SignatureId) -> Result<Signature, SourceError>;

    fn runs(&self, id: SignatureId) -> Result<Vec<RawRun>, SourceError>;

    /// Ids selected by `selection`, deduplicated, in source order.
    fn candidates(&self, selection: &str) -> Result<Vec<SignatureId>, SourceError>;
}

#[derive(Debug, Serialize)]
struct CandidateQuery<'a> {
    selection: &'a str,
}

pub struct HttpSignalSource {
    client: Client,
    endpoint: String,
}

impl HttpSignalSource {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, SourceError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into().trim_end_matches('/').to_owned(),
        })
    }

    pub fn from_config(config: &SourceConfig) -> Result<Self, SourceError> {
        let endpoint = config
            .endpoint
            .as_deref()
            .ok_or(SourceError::NotConfigured)?;
        Self::new(endpoint, Duration::from_secs(config.timeout_secs))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn signature_url(&self, id: SignatureId) -> String {
        format!("{}/signatures/{id}", self.endpoint)
    }

    fn runs_url(&self, id: SignatureId) -> String {
        format!("{}/signatures/{id}/runs", self.endpoint)
    }

    fn candidates_url(&self) -> String {
        format!("{}/signatures/query", self.endpoint)
    }

    fn get_json<T: DeserializeOwned>(&self, url: String) -> Result<T, SourceError> {
        tracing::debug!(url = %url, "fetching from signal source");
        let response = self.client.get(&url).send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response.json()?)
    }
}

impl SignalSource for HttpSignalSource {
    fn signature(&self, id: SignatureId) -> Result<Signature, SourceError> {
        let url = self.signature_url(id);
        match self.get_json::<Signature>(url) {
            Err(SourceError::Status { status: 404, .. }) => Err(SourceError::NotFound(id)),
            other => other,
        }
    }

    fn runs(&self, id: SignatureId) -> Result<Vec<RawRun>, SourceError> {
        self.get_json(self.runs_url(id))
    }

    fn candidates(&self, selection: &str) -> Result<Vec<SignatureId>, SourceError> {
        let url = self.candidates_url();
        tracing::debug!(url = %url, "discovering candidate signatures");
        let response = self
            .client
            .post(&url)
            .json(&CandidateQuery { selection })
            .send()?;
        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url,
                status: status.as_u16(),
            });
        }

        let ids: Vec<SignatureId> = response.json()?;
        Ok(dedupe_candidates(ids))
    }
}

pub fn dedupe_candidates(ids: impl IntoIterator<Item = SignatureId>) -> Vec<SignatureId> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(*id)).collect()
}
