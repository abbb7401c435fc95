//! HTTP client for a remote signatory service.
//!
//! ```text
//! POST {signatory}/keys/{address}   "<hex payload>"   → {"signature": "..."}
//! GET  {signatory}/keys/{address}                     → {"public_key": "..."}
//! ```

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::BlockchainConfig;
use crate::error::{ConnectorError, ConnectorResult};
use crate::signer::Signer;
use crate::tezos::types::{Address, PublicKey, Signature};

#[derive(Deserialize)]
struct SignResponse {
    signature: Option<String>,
}

#[derive(Deserialize)]
struct KeyResponse {
    public_key: Option<String>,
}

#[derive(Clone)]
pub struct RemoteSigner {
    http: reqwest::Client,
    base_url: String,
    timeout_duration: Duration,
}

impl RemoteSigner {
    pub fn new(config: &BlockchainConfig) -> ConnectorResult<Self> {
        Self::with_url(
            &config.signatory_url,
            Duration::from_secs(config.signer_timeout_secs),
        )
    }

    pub fn with_url(base_url: &str, timeout_duration: Duration) -> ConnectorResult<Self> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ConnectorError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout_duration,
        })
    }

    fn key_url(&self, source: &Address) -> ConnectorResult<String> {
        if self.base_url.is_empty() {
            return Err(ConnectorError::SignerUnreachable(
                "no signatory URL configured".to_string(),
            ));
        }
        Ok(format!("{}/keys/{}", self.base_url, source))
    }

    async fn exchange<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> ConnectorResult<T> {
        let response = tokio::time::timeout(self.timeout_duration, request.send())
            .await
            .map_err(|_| {
                ConnectorError::SignerUnreachable(format!(
                    "no answer after {} seconds",
                    self.timeout_duration.as_secs()
                ))
            })?
            .map_err(|e| ConnectorError::SignerUnreachable(e.to_string()))?;

        let status = response.status();
        let body = tokio::time::timeout(self.timeout_duration, response.text())
            .await
            .map_err(|_| ConnectorError::SignerUnreachable("response body timed out".to_string()))?
            .map_err(|e| ConnectorError::SignerUnreachable(e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "Signer rejected request");
            return Err(ConnectorError::SignerRejected {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body)
            .map_err(|e| ConnectorError::SignerBadResponse(format!("invalid JSON: {}", e)))
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    async fn sign(&self, source: &Address, payload: &[u8]) -> ConnectorResult<Signature> {
        if payload.is_empty() {
            return Err(ConnectorError::InvalidState(
                "nothing to sign: empty payload".to_string(),
            ));
        }
        let url = self.key_url(source)?;
        tracing::debug!(source = %source, payload_len = payload.len(), "Requesting signature");

        let response: SignResponse = self
            .exchange(self.http.post(url).json(&hex::encode(payload)))
            .await?;
        let signature = response.signature.ok_or_else(|| {
            ConnectorError::SignerBadResponse("missing signature field".to_string())
        })?;
        signature
            .parse()
            .map_err(|e| ConnectorError::SignerBadResponse(format!("invalid signature: {}", e)))
    }

    async fn public_key(&self, source: &Address) -> ConnectorResult<PublicKey> {
        let url = self.key_url(source)?;
        let response: KeyResponse = self.exchange(self.http.get(url)).await?;
        let key = response.public_key.ok_or_else(|| {
            ConnectorError::SignerBadResponse("missing public_key field".to_string())
        })?;
        key.parse()
            .map_err(|e| ConnectorError::SignerBadResponse(format!("invalid public key: {}", e)))
    }
}

impl std::fmt::Debug for RemoteSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSigner")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_duration.as_secs())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source() -> Address {
        "tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN".parse().unwrap()
    }

    #[tokio::test]
    async fn test_empty_payload_is_invalid_state() {
        let signer = RemoteSigner::with_url("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
        let err = signer.sign(&source(), &[]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::InvalidState(_)));
    }

    #[tokio::test]
    async fn test_missing_url_is_unreachable() {
        let signer = RemoteSigner::with_url("", Duration::from_secs(1)).unwrap();
        let err = signer.sign(&source(), &[3, 1, 2]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::SignerUnreachable(_)));
    }

    #[tokio::test]
    async fn test_connection_refused_is_unreachable() {
        let signer = RemoteSigner::with_url("http://127.0.0.1:1/", Duration::from_secs(2)).unwrap();
        let err = signer.sign(&source(), &[3, 1, 2]).await.unwrap_err();
        assert!(matches!(err, ConnectorError::SignerUnreachable(_)));
    }

    #[test]
    fn test_key_url() {
        let signer = RemoteSigner::with_url("http://signer:6732/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            signer.key_url(&source()).unwrap(),
            "http://signer:6732/keys/tz1Y6GnVhC4EpcDDSmD3ibcC4WX6DJ4Q1QLN"
        );
    }
}
