//! R2 (S3-compatible) integration.
//!
//! Every request is signed with [`crate::signer`].  Content is a signed
//! `GET`; a lookup is a signed `HEAD` whose `content-length` is the size.
//!
//! Key mapping:
//!   Objects:  `https://{account_id}.{domain}/{bucket}/{dir}/{file}`
//!   Check:    `HEAD {bucket}/{dir}/test-access` (a 404 proves reachability and auth)

use chrono::{DateTime, Utc};
use http::{HeaderName, HeaderValue, Method};
use std::sync::Arc;
use tracing::warn;

use super::{join_path, Catalog, Mode, SourceKind};
use crate::config::R2AccountConfig;
use crate::errors::CandidateError;
use crate::signer::{sign_request, Credentials, SignError};
use crate::status::{Health, StatusLine};
use crate::upstream::{OutboundRequest, Upstream, UpstreamResponse};

/// Sentinel object checked by the status page.
pub const CHECK_OBJECT: &str = "test-access";

/// One R2 account / bucket pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct R2Account {
    pub name: String,
    pub bucket: String,
    pub credentials: Credentials,
}

impl R2Account {
    /// `None` unless every credential field is filled in.
    pub fn from_config(config: &R2AccountConfig) -> Option<Self> {
        let fields = [
            &config.account_id,
            &config.access_key_id,
            &config.secret_access_key,
            &config.bucket,
        ];
        if fields.iter().any(|f| f.trim().is_empty()) {
            return None;
        }
        let name = config.name.trim();
        Some(Self {
            name: if name.is_empty() {
                config.account_id.trim().to_string()
            } else {
                name.to_string()
            },
            bucket: config.bucket.trim().to_string(),
            credentials: Credentials {
                account_id: config.account_id.trim().to_string(),
                access_key_id: config.access_key_id.trim().to_string(),
                secret_access_key: config.secret_access_key.trim().to_string(),
            },
        })
    }

    /// Sign `method` on `bucket/path`.
    fn signed(
        &self,
        catalog: &Catalog,
        method: Method,
        path: &str,
        now: DateTime<Utc>,
    ) -> Result<OutboundRequest, SignError> {
        let object = join_path(&[&self.bucket, path]);
        let signed = sign_request(
            &self.credentials,
            &catalog.endpoints.r2_domain,
            method.as_str(),
            &object,
            now,
        )?;
        let mut request = OutboundRequest {
            method,
            url: signed.url,
            headers: http::HeaderMap::new(),
        };
        for (name, value) in signed.headers {
            let value = HeaderValue::from_str(&value)
                .map_err(|e| SignError::InvalidKey(format!("unencodable {name} header: {e}")))?;
            request.headers.insert(HeaderName::from_static(name), value);
        }
        Ok(request)
    }
}

/// Signed request for `file`: `GET` for content, `HEAD` for lookup.
pub fn file_request(
    catalog: &Catalog,
    account: &R2Account,
    file: &str,
    mode: Mode,
    now: DateTime<Utc>,
) -> Result<OutboundRequest, SignError> {
    let method = match mode {
        Mode::Content => Method::GET,
        Mode::Lookup => Method::HEAD,
    };
    account.signed(catalog, method, &catalog.object_path(file), now)
}

/// Lookup interpretation: the `content-length` header.
pub fn content_length(resp: &UpstreamResponse) -> Result<u64, CandidateError> {
    resp.headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .ok_or_else(|| CandidateError::Malformed("missing content-length".to_string()))
}

/// Check one account with a signed `HEAD` on the sentinel object.
pub async fn check(
    upstream: Arc<dyn Upstream>,
    catalog: Arc<Catalog>,
    account: R2Account,
) -> StatusLine {
    let path = catalog.object_path(CHECK_OBJECT);
    let outcome = match account.signed(&catalog, Method::HEAD, &path, Utc::now()) {
        Ok(request) => upstream.send(request).await.map_err(|e| e.to_string()),
        Err(e) => Err(e.to_string()),
    };

    let (health, bucket) = match outcome {
        Ok(resp) if resp.status.as_u16() == 404 => (Health::Working(None), account.bucket.clone()),
        Ok(resp) => (
            Health::Error(format!("unexpected status {}", resp.status.as_u16())),
            account.bucket.clone(),
        ),
        Err(e) => {
            warn!("R2 account {} check failed: {}", account.name, e);
            (Health::Error(e), "connection failed".to_string())
        }
    };

    StatusLine::new(SourceKind::R2, &account.name, health).detail("Bucket", bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixtures::full_config;
    use crate::upstream::mock::MockUpstream;
    use bytes::Bytes;
    use http::{HeaderMap, StatusCode};

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_config(&full_config()))
    }

    fn account() -> R2Account {
        R2Account::from_config(&R2AccountConfig {
            name: "accountA".to_string(),
            account_id: "acca".to_string(),
            access_key_id: "AKA".to_string(),
            secret_access_key: "SA".to_string(),
            bucket: "bucketA".to_string(),
        })
        .unwrap()
    }

    const CHECK_URL: &str = "https://acca.r2.cloudflarestorage.com/bucketA/images/test-access";

    #[test]
    fn test_content_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-length", HeaderValue::from_static("2048"));
        let resp = UpstreamResponse {
            status: StatusCode::OK,
            headers,
            body: Bytes::new(),
        };
        assert_eq!(content_length(&resp).unwrap(), 2048);

        let missing = UpstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        };
        assert!(content_length(&missing).is_err());
    }

    #[test]
    fn test_from_config_requires_all_credentials() {
        let mut config = R2AccountConfig {
            name: "n".to_string(),
            account_id: "a".to_string(),
            access_key_id: "k".to_string(),
            secret_access_key: "s".to_string(),
            bucket: "b".to_string(),
        };
        assert!(R2Account::from_config(&config).is_some());
        config.secret_access_key.clear();
        assert!(R2Account::from_config(&config).is_none());
    }

    #[tokio::test]
    async fn test_check_not_found_means_working() {
        let upstream = MockUpstream::new().respond(Method::HEAD, CHECK_URL, 404, &[], "");
        let upstream = Arc::new(upstream);
        let line = check(upstream.clone(), catalog(), account()).await;
        assert_eq!(line.render(), "R2 Storage: accountA - working (Bucket: bucketA)");

        let seen = upstream.seen();
        assert_eq!(seen.len(), 1);
        assert!(seen[0].headers.contains_key("authorization"));
    }

    #[tokio::test]
    async fn test_check_other_status_is_error() {
        let upstream = MockUpstream::new().respond(Method::HEAD, CHECK_URL, 403, &[], "");
        let line = check(Arc::new(upstream), catalog(), account()).await;
        assert_eq!(
            line.render(),
            "R2 Storage: accountA - error: unexpected status 403 (Bucket: bucketA)"
        );
    }

    #[tokio::test]
    async fn test_check_transport_failure() {
        let upstream = MockUpstream::new().fail(Method::HEAD, CHECK_URL, "tls handshake");
        let line = check(Arc::new(upstream), catalog(), account()).await;
        assert_eq!(
            line.render(),
            "R2 Storage: accountA - error: tls handshake (Bucket: connection failed)"
        );
    }
}
