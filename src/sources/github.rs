//! GitHub integration.
//!
//! Content is read from `raw.githubusercontent.com`; lookups and status
//! checks use the REST API (`application/vnd.github.v3+json`).
//!
//! URL shapes:
//!   content:  `{raw}/{owner}/{repo}/{branch}/{dir}/{file}`
//!   lookup:   `{api}/repos/{owner}/{repo}/contents/{dir}/{file}`
//!   metadata: `{api}/repos/{owner}/{repo}`
//!   listing:  `{api}/repos/{owner}/{repo}/contents/{dir}`
//!   identity: `{api}/user`

use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use super::{join_path, Catalog, Mode, SourceKind};
use crate::errors::CandidateError;
use crate::signer::s3_uri_encode;
use crate::status::{format_size, Health, StatusLine};
use crate::upstream::{OutboundRequest, Upstream, UpstreamResponse};

const ACCEPT_V3: &str = "application/vnd.github.v3+json";

/// One GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubRepo {
    pub owner: String,
    pub repo: String,
    /// Personal access token; empty for anonymous access.
    pub token: String,
}

// -- API response types ------------------------------------------------------

#[derive(Debug, Deserialize)]
struct ContentsEntry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct FileMetadata {
    size: u64,
}

#[derive(Debug, Deserialize)]
struct RepoMetadata {
    #[serde(default)]
    private: bool,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct User {
    login: String,
}

// -- Requests ----------------------------------------------------------------

fn authorized(request: OutboundRequest, token: &str, user_agent: &str) -> OutboundRequest {
    let request = request.with_header("user-agent", user_agent);
    if token.is_empty() {
        request
    } else {
        request.with_header("authorization", &format!("token {token}"))
    }
}

fn api_request(url: String, token: &str, user_agent: &str) -> OutboundRequest {
    authorized(OutboundRequest::get(url), token, user_agent).with_header("accept", ACCEPT_V3)
}

/// Request for `file` from `repo`: raw bytes or contents metadata.
pub fn file_request(catalog: &Catalog, repo: &GithubRepo, file: &str, mode: Mode) -> OutboundRequest {
    let path = s3_uri_encode(&catalog.object_path(file), false);
    match mode {
        Mode::Content => {
            let url = format!(
                "{}/{}",
                catalog.endpoints.github_raw.trim_end_matches('/'),
                join_path(&[&repo.owner, &repo.repo, &catalog.branch, &path])
            );
            authorized(OutboundRequest::get(url), &repo.token, &catalog.user_agent)
        }
        Mode::Lookup => {
            let url = format!(
                "{}/repos/{}/{}/contents/{}",
                catalog.endpoints.github_api.trim_end_matches('/'),
                repo.owner,
                repo.repo,
                path
            );
            api_request(url, &repo.token, &catalog.user_agent)
        }
    }
}

/// Lookup interpretation: the `size` field of the contents response.
pub fn reported_size(resp: &UpstreamResponse) -> Result<u64, CandidateError> {
    let meta: FileMetadata = resp
        .json()
        .map_err(|e| CandidateError::Malformed(e.to_string()))?;
    Ok(meta.size)
}

// -- Status checks -----------------------------------------------------------

/// Resolve the login behind the configured token.
///
/// Returns `Unknown` on a non-200 answer and `Error` when the call fails.
pub async fn fetch_username(upstream: Arc<dyn Upstream>, catalog: Arc<Catalog>) -> String {
    let url = format!(
        "{}/user",
        catalog.endpoints.github_api.trim_end_matches('/')
    );
    let request = api_request(url, &catalog.github_token, &catalog.user_agent);
    match upstream.send(request).await {
        Ok(resp) if resp.status.as_u16() == 200 => match resp.json::<User>() {
            Ok(user) => user.login,
            Err(_) => "Unknown".to_string(),
        },
        Ok(resp) => {
            warn!("GitHub user lookup returned {}", resp.status);
            "Unknown".to_string()
        }
        Err(e) => {
            warn!("GitHub user lookup failed: {}", e);
            "Error".to_string()
        }
    }
}

/// Check one repository: metadata and directory listing in parallel.
pub async fn check(upstream: Arc<dyn Upstream>, catalog: Arc<Catalog>, repo: GithubRepo) -> StatusLine {
    let api = catalog.endpoints.github_api.trim_end_matches('/');
    let meta_url = format!("{api}/repos/{}/{}", repo.owner, repo.repo);
    let list_url = format!(
        "{api}/repos/{}/{}/contents/{}",
        repo.owner,
        repo.repo,
        s3_uri_encode(&catalog.dir, false)
    );

    let (meta, listing) = tokio::join!(
        upstream.send(api_request(meta_url, &repo.token, &catalog.user_agent)),
        upstream.send(api_request(list_url, &repo.token, &catalog.user_agent)),
    );

    let (health, files, bytes) = match classify(meta, listing) {
        Ok(result) => result,
        Err(message) => {
            warn!("GitHub repo {} check failed: {}", repo.repo, message);
            (Health::Error(message), 0, 0)
        }
    };

    StatusLine::new(SourceKind::GitHub, &repo.repo, health)
        .detail("Files", files.to_string())
        .detail("Size", format_size(bytes))
}

fn classify(
    meta: anyhow::Result<UpstreamResponse>,
    listing: anyhow::Result<UpstreamResponse>,
) -> Result<(Health, usize, u64), String> {
    let meta = meta.map_err(|e| e.to_string())?;
    if meta.status.as_u16() != 200 {
        let message = meta
            .json::<ApiError>()
            .ok()
            .and_then(|e| e.message)
            .unwrap_or_else(|| meta.status.to_string());
        return Err(format!("Repository error: {message}"));
    }
    let repo: RepoMetadata = meta.json().map_err(|e| e.to_string())?;
    let visibility = if repo.private { "private" } else { "public" };
    let health = Health::Working(Some(visibility.to_string()));

    let entries: Vec<ContentsEntry> = match listing {
        Ok(resp) if resp.status.as_u16() == 200 => resp.json().unwrap_or_default(),
        _ => Vec::new(),
    };
    let (files, bytes) = entries
        .iter()
        .filter(|e| e.kind == "file")
        .fold((0usize, 0u64), |(n, total), e| (n + 1, total + e.size));
    Ok((health, files, bytes))
}
