//! Backend status report.
//!
//! [`build_report`] checks every backend in the catalog concurrently and
//! renders one line per backend.  Each check turns its own failures into
//! an error line, so one broken account never hides the others.

use std::fmt;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

use crate::sources::{github, gitlab, r2, Backend, Catalog, SourceKind};
use crate::upstream::Upstream;

/// First line of the rendered report.
pub const REPORT_HEADER: &str = "GitHub, GitLab and R2 Storage status:";

/// Liveness classification of one backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Health {
    /// Reachable; carries the repository visibility when known.
    Working(Option<String>),
    NotFound,
    Disconnected,
    Error(String),
}

impl fmt::Display for Health {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Health::Working(Some(visibility)) => write!(f, "working ({visibility})"),
            Health::Working(None) => f.write_str("working"),
            Health::NotFound => f.write_str("not found"),
            Health::Disconnected => f.write_str("disconnect"),
            Health::Error(message) if message.is_empty() => f.write_str("error"),
            Health::Error(message) => write!(f, "error: {message}"),
        }
    }
}

/// One line of the report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    pub kind: SourceKind,
    pub identifier: String,
    pub health: Health,
    /// Ordered free-form counters.
    pub detail: Vec<(&'static str, String)>,
}

impl StatusLine {
    pub fn new(kind: SourceKind, identifier: &str, health: Health) -> Self {
        Self {
            kind,
            identifier: identifier.to_string(),
            health,
            detail: Vec::new(),
        }
    }

    pub fn detail(mut self, key: &'static str, value: impl Into<String>) -> Self {
        self.detail.push((key, value.into()));
        self
    }

    pub fn render(&self) -> String {
        let subject = match self.kind {
            SourceKind::GitHub => format!("GitHub: {}", self.identifier),
            SourceKind::GitLab => format!("GitLab: Project ID {}", self.identifier),
            SourceKind::R2 => format!("R2 Storage: {}", self.identifier),
        };
        let detail = self
            .detail
            .iter()
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{subject} - {} ({detail})", self.health)
    }
}

/// The full report, lines in catalog order.
#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub lines: Vec<StatusLine>,
}

impl StatusReport {
    pub fn render(&self) -> String {
        let mut out = format!("{REPORT_HEADER}\n\n");
        for line in &self.lines {
            out.push_str(&line.render());
            out.push('\n');
        }
        out
    }
}

/// Check every backend and compose the report.
///
/// The GitHub username is looked up once and shared by every GitHub line.
pub async fn build_report(upstream: Arc<dyn Upstream>, catalog: Arc<Catalog>) -> StatusReport {
    let username = async {
        if catalog.has(SourceKind::GitHub) {
            Some(github::fetch_username(upstream.clone(), catalog.clone()).await)
        } else {
            None
        }
    };

    let mut checks = JoinSet::new();
    for (index, backend) in catalog.backends.iter().cloned().enumerate() {
        let upstream = upstream.clone();
        let catalog = catalog.clone();
        checks.spawn(async move {
            let line = match backend {
                Backend::GitHub(repo) => github::check(upstream, catalog, repo).await,
                Backend::GitLab(project) => gitlab::check(upstream, catalog, project).await,
                Backend::R2(account) => r2::check(upstream, catalog, account).await,
            };
            (index, line)
        });
    }

    // A check that panics still gets a line.
    let mut slots: Vec<StatusLine> = catalog
        .backends
        .iter()
        .map(|b| {
            StatusLine::new(
                b.kind(),
                &check_identifier(b),
                Health::Error("check did not complete".to_string()),
            )
        })
        .collect();

    let collect = async {
        while let Some(joined) = checks.join_next().await {
            match joined {
                Ok((index, line)) => slots[index] = line,
                Err(e) => warn!("status check task failed: {}", e),
            }
        }
    };

    let (username, ()) = tokio::join!(username, collect);

    if let Some(username) = username {
        for line in slots.iter_mut().filter(|l| l.kind == SourceKind::GitHub) {
            line.detail.insert(0, ("Username", username.clone()));
        }
    }

    StatusReport { lines: slots }
}

fn check_identifier(backend: &Backend) -> String {
    match backend {
        Backend::GitHub(repo) => repo.repo.clone(),
        Backend::GitLab(project) => project.id.clone(),
        Backend::R2(account) => account.name.clone(),
    }
}

/// Format a byte count as kB, MB or GB with two decimals.
pub fn format_size(bytes: u64) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = 1024.0 * 1024.0;
    const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
    let b = bytes as f64;
    if b >= GIB {
        format!("{:.2} GB", b / GIB)
    } else if b >= MIB {
        format!("{:.2} MB", b / MIB)
    } else {
        format!("{:.2} kB", b / KIB)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::fixtures::full_config;
    use crate::upstream::mock::MockUpstream;
    use http::Method;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0.00 kB");
        assert_eq!(format_size(1536), "1.50 kB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(3 * 1024 * 1024 * 1024), "3.00 GB");
    }

    #[test]
    fn test_health_display() {
        assert_eq!(Health::Working(Some("public".into())).to_string(), "working (public)");
        assert_eq!(Health::Working(None).to_string(), "working");
        assert_eq!(Health::NotFound.to_string(), "not found");
        assert_eq!(Health::Disconnected.to_string(), "disconnect");
        assert_eq!(Health::Error(String::new()).to_string(), "error");
        assert_eq!(Health::Error("boom".into()).to_string(), "error: boom");
    }

    #[tokio::test]
    async fn test_report_isolates_failing_repo() {
        let upstream = MockUpstream::new()
            .respond(
                Method::GET,
                "https://api.github.com/user",
                200,
                &[],
                r#"{"login": "octocat"}"#,
            )
            // pics-a metadata 404s.
            .respond(
                Method::GET,
                "https://api.github.com/repos/octo/pics-a",
                404,
                &[],
                r#"{"message": "Not Found"}"#,
            )
            .respond(
                Method::GET,
                "https://api.github.com/repos/octo/pics-b",
                200,
                &[],
                r#"{"private": false}"#,
            )
            .respond(
                Method::GET,
                "https://api.github.com/repos/octo/pics-b/contents/images",
                200,
                &[],
                r#"[{"type": "file", "size": 2048}]"#,
            )
            .respond(
                Method::GET,
                "https://gitlab.com/api/v4/projects/101",
                200,
                &[],
                r#"{"visibility": "public", "owner": {"username": "lab"}}"#,
            )
            .respond(
                Method::HEAD,
                "https://acca.r2.cloudflarestorage.com/bucketA/images/test-access",
                404,
                &[],
                "",
            )
            .fail(
                Method::HEAD,
                "https://accb.r2.cloudflarestorage.com/bucketB/images/test-access",
                "connection refused",
            );

        let catalog = Arc::new(Catalog::from_config(&full_config()));
        let report = build_report(Arc::new(upstream), catalog).await;
        let text = report.render();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines[0], REPORT_HEADER);
        assert_eq!(lines[1], "");
        assert_eq!(
            lines[2],
            "GitHub: pics-a - error: Repository error: Not Found (Username: octocat, Files: 0, Size: 0.00 kB)"
        );
        assert_eq!(
            lines[3],
            "GitHub: pics-b - working (public) (Username: octocat, Files: 1, Size: 2.00 kB)"
        );
        assert_eq!(
            lines[4],
            "GitLab: Project ID 101 - working (public) (Username: lab, Files: 0)"
        );
        assert_eq!(
            lines[5],
            "GitLab: Project ID 102 - not found (Username: Unknown, Files: 0)"
        );
        assert_eq!(lines[6], "R2 Storage: accountA - working (Bucket: bucketA)");
        assert_eq!(
            lines[7],
            "R2 Storage: accountB - error: connection refused (Bucket: connection failed)"
        );
        assert_eq!(report.lines.len(), 6);
    }

    #[tokio::test]
    async fn test_report_without_backends_skips_username_lookup() {
        let upstream = Arc::new(MockUpstream::new());
        let catalog = Arc::new(Catalog::from_config(&crate::config::Config::default()));
        let report = build_report(upstream.clone(), catalog).await;
        assert!(report.lines.is_empty());
        assert_eq!(report.render(), format!("{REPORT_HEADER}\n\n"));
        assert_eq!(upstream.calls(), 0);
    }
}
