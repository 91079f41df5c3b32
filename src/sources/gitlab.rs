//! GitLab integration.
//!
//! Every project carries its own `PRIVATE-TOKEN`.  The file path is sent
//! as a single URL-encoded path segment, as the repository files API
//! requires.
//!
//! URL shapes:
//!   content:  `{api}/projects/{id}/repository/files/{enc(dir/file)}/raw?ref={branch}`
//!   lookup:   `{api}/projects/{id}/repository/files/{enc(dir/file)}?ref={branch}`
//!   metadata: `{api}/projects/{id}`
//!   listing:  `{api}/projects/{id}/repository/tree?path={dir}&per_page=100`

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;

use super::{Catalog, Mode, SourceKind};
use crate::config::GitlabAccountConfig;
use crate::errors::CandidateError;
use crate::status::{Health, StatusLine};
use crate::upstream::{OutboundRequest, Upstream, UpstreamResponse};

/// Characters left unescaped by a URI component encoder.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// One GitLab project.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitlabProject {
    pub name: String,
    pub id: String,
    pub token: String,
}

impl GitlabProject {
    /// `None` when the project ID is blank.
    pub fn from_config(config: &GitlabAccountConfig) -> Option<Self> {
        let id = config.id.trim();
        if id.is_empty() {
            return None;
        }
        let name = config.name.trim();
        Some(Self {
            name: if name.is_empty() { id.to_string() } else { name.to_string() },
            id: id.to_string(),
            token: config.token.trim().to_string(),
        })
    }

    fn request(&self, url: String) -> OutboundRequest {
        let request = OutboundRequest::get(url);
        if self.token.is_empty() {
            request
        } else {
            request.with_header("private-token", &self.token)
        }
    }
}

// -- API response types ------------------------------------------------------

#[derive(Debug, Deserialize)]
struct FileResponse {
    content: Option<String>,
    size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct Owner {
    username: String,
}

#[derive(Debug, Deserialize)]
struct ProjectMetadata {
    #[serde(default)]
    visibility: Option<String>,
    owner: Option<Owner>,
}

#[derive(Debug, Deserialize)]
struct TreeEntry {
    #[serde(rename = "type")]
    kind: String,
}

// -- Requests ----------------------------------------------------------------

/// Request for `file` from `project`: raw bytes or base64 file metadata.
pub fn file_request(
    catalog: &Catalog,
    project: &GitlabProject,
    file: &str,
    mode: Mode,
) -> OutboundRequest {
    let encoded = utf8_percent_encode(&catalog.object_path(file), COMPONENT).to_string();
    let raw = match mode {
        Mode::Content => "/raw",
        Mode::Lookup => "",
    };
    let url = format!(
        "{}/projects/{}/repository/files/{}{}?ref={}",
        catalog.endpoints.gitlab_api.trim_end_matches('/'),
        project.id,
        encoded,
        raw,
        utf8_percent_encode(&catalog.branch, COMPONENT)
    );
    project.request(url)
}

/// Lookup interpretation: length of the decoded `content` field.
///
/// Falls back to the reported `size` when no content is returned.
pub fn encoded_content_size(resp: &UpstreamResponse) -> Result<u64, CandidateError> {
    let file: FileResponse = resp
        .json()
        .map_err(|e| CandidateError::Malformed(e.to_string()))?;
    match (file.content, file.size) {
        (Some(content), _) => {
            let compact: String = content.split_whitespace().collect();
            let decoded = BASE64_STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| CandidateError::Malformed(format!("invalid base64 content: {e}")))?;
            Ok(decoded.len() as u64)
        }
        (None, Some(size)) => Ok(size),
        (None, None) => Err(CandidateError::Malformed(
            "missing content and size".to_string(),
        )),
    }
}

// -- Status checks -----------------------------------------------------------

/// Check one project: metadata and tree listing in parallel.
///
/// Only the file count is reported; per-file sizes would need one call
/// per blob.
pub async fn check(
    upstream: Arc<dyn Upstream>,
    catalog: Arc<Catalog>,
    project: GitlabProject,
) -> StatusLine {
    let api = catalog.endpoints.gitlab_api.trim_end_matches('/');
    let meta_url = format!("{api}/projects/{}", project.id);
    let tree_url = format!(
        "{api}/projects/{}/repository/tree?path={}&per_page=100",
        project.id,
        utf8_percent_encode(&catalog.dir, COMPONENT)
    );

    let (meta, tree) = tokio::join!(
        upstream.send(project.request(meta_url)),
        upstream.send(project.request(tree_url)),
    );

    let (health, username, files) = match meta {
        Ok(resp) if resp.status.as_u16() == 200 => match resp.json::<ProjectMetadata>() {
            Ok(meta) => {
                let files = match tree {
                    Ok(tree) if tree.status.as_u16() == 200 => tree
                        .json::<Vec<TreeEntry>>()
                        .map(|entries| entries.iter().filter(|e| e.kind == "blob").count())
                        .unwrap_or(0),
                    _ => 0,
                };
                let username = meta
                    .owner
                    .map(|o| o.username)
                    .unwrap_or_else(|| "Unknown".to_string());
                (Health::Working(meta.visibility), username, files)
            }
            Err(e) => {
                warn!("GitLab project {} returned malformed metadata: {}", project.id, e);
                (Health::Disconnected, "Error".to_string(), 0)
            }
        },
        Ok(resp) if resp.status.as_u16() == 404 => {
            (Health::NotFound, "Unknown".to_string(), 0)
        }
        Ok(resp) => {
            warn!("GitLab project {} returned {}", project.id, resp.status);
            (Health::Disconnected, "Unknown".to_string(), 0)
        }
        Err(e) => {
            warn!("GitLab project {} check failed: {}", project.id, e);
            (Health::Disconnected, "Error".to_string(), 0)
        }
    };

    StatusLine::new(SourceKind::GitLab, &project.id, health)
        .detail("Username", username)
        .detail("Files", files.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixtures::full_config;
    use crate::upstream::mock::MockUpstream;
    use bytes::Bytes;
    use http::{HeaderMap, Method, StatusCode};

    fn catalog() -> Arc<Catalog> {
        Arc::new(Catalog::from_config(&full_config()))
    }

    fn project() -> GitlabProject {
        GitlabProject {
            name: "lab-1".to_string(),
            id: "101".to_string(),
            token: "glpat-1".to_string(),
        }
    }

    fn ok_json(body: &'static str) -> UpstreamResponse {
        UpstreamResponse {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::from_static(body.as_bytes()),
        }
    }

    #[test]
    fn test_file_path_is_component_encoded() {
        let req = file_request(&catalog(), &project(), "my logo.png", Mode::Content);
        assert_eq!(
            req.url,
            "https://gitlab.com/api/v4/projects/101/repository/files/images%2Fmy%20logo.png/raw?ref=main"
        );
    }

    #[test]
    fn test_encoded_content_size_decodes_base64() {
        // "hello world" is 11 bytes.
        let resp = ok_json(r#"{"content": "aGVsbG8gd29y\nbGQ=", "size": 999}"#);
        assert_eq!(encoded_content_size(&resp).unwrap(), 11);
    }

    #[test]
    fn test_encoded_content_size_falls_back_to_size() {
        let resp = ok_json(r#"{"size": 77}"#);
        assert_eq!(encoded_content_size(&resp).unwrap(), 77);
    }

    #[test]
    fn test_encoded_content_size_rejects_garbage() {
        let resp = ok_json(r#"{"content": "***"}"#);
        assert!(encoded_content_size(&resp).is_err());
    }

    #[test]
    fn test_from_config_skips_blank_id() {
        let blank = GitlabAccountConfig {
            name: "x".to_string(),
            id: " ".to_string(),
            token: "t".to_string(),
        };
        assert!(GitlabProject::from_config(&blank).is_none());
    }

    #[tokio::test]
    async fn test_check_working_counts_blobs() {
        let upstream = MockUpstream::new()
            .respond(
                Method::GET,
                "https://gitlab.com/api/v4/projects/101",
                200,
                &[],
                r#"{"visibility": "private", "owner": {"username": "labuser"}}"#,
            )
            .respond(
                Method::GET,
                "https://gitlab.com/api/v4/projects/101/repository/tree?path=images&per_page=100",
                200,
                &[],
                r#"[{"type": "blob"}, {"type": "tree"}, {"type": "blob"}]"#,
            );
        let line = check(Arc::new(upstream), catalog(), project()).await;
        assert_eq!(
            line.render(),
            "GitLab: Project ID 101 - working (private) (Username: labuser, Files: 2)"
        );
    }

    #[tokio::test]
    async fn test_check_not_found_and_disconnect() {
        let missing = MockUpstream::new();
        let line = check(Arc::new(missing), catalog(), project()).await;
        assert_eq!(line.health, Health::NotFound);

        let broken = MockUpstream::new().respond(
            Method::GET,
            "https://gitlab.com/api/v4/projects/101",
            500,
            &[],
            "",
        );
        let line = check(Arc::new(broken), catalog(), project()).await;
        assert_eq!(line.health, Health::Disconnected);
        assert_eq!(
            line.render(),
            "GitLab: Project ID 101 - disconnect (Username: Unknown, Files: 0)"
        );

        let unreachable = MockUpstream::new().fail(
            Method::GET,
            "https://gitlab.com/api/v4/projects/101",
            "connection reset",
        );
        let line = check(Arc::new(unreachable), catalog(), project()).await;
        assert!(line.render().contains("Username: Error"));
    }
}
