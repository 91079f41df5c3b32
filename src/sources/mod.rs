//! Backend families and candidate construction.
//!
//! A [`Catalog`] is built once from [`Config`] and lists every usable
//! [`Backend`].  For each inbound request, [`build_candidates`] turns the
//! catalog, the requested file name and the `from` [`Selector`] into the
//! ordered list of [`Candidate`] requests the race will fire.
//!
//! Family-specific URL shapes, response interpretation and status checks
//! live in one module per family:
//!   - [`github`]: raw content, contents API, repo metadata
//!   - [`gitlab`]: repository files API, project metadata, tree listing
//!   - [`r2`]:     SigV4-signed object reads

pub mod github;
pub mod gitlab;
pub mod r2;

use chrono::{DateTime, Utc};
use std::fmt;

use crate::config::{Config, EndpointsConfig};
use crate::errors::{CandidateError, EdgeError};
use crate::signer::SignError;
use crate::upstream::{OutboundRequest, UpstreamResponse};

/// The three integration kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    GitHub,
    GitLab,
    R2,
}

impl SourceKind {
    /// Lowercase identifier used in `from=` and in labels.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::GitHub => "github",
            SourceKind::GitLab => "gitlab",
            SourceKind::R2 => "r2",
        }
    }

    /// Interpret a lookup-mode response as a file size in bytes.
    ///
    /// Any non-success status is a failure of this candidate.
    pub fn interpret(self, resp: &UpstreamResponse) -> Result<u64, CandidateError> {
        if !resp.status.is_success() {
            return Err(CandidateError::Status(resp.status));
        }
        match self {
            SourceKind::GitHub => github::reported_size(resp),
            SourceKind::GitLab => gitlab::encoded_content_size(resp),
            SourceKind::R2 => r2::content_length(resp),
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the caller asked for via `?from=`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    /// No selector: fetch content from every family.
    All,
    /// `where`: report size, origin and latency from every family.
    Lookup,
    /// Fetch content from one family only.
    Only(SourceKind),
    /// Unrecognised selector; never matches a backend.
    Unknown(String),
}

impl Selector {
    /// Parse the raw `from` query value (case-insensitive).
    pub fn parse(raw: Option<&str>) -> Self {
        let value = match raw {
            Some(v) if !v.is_empty() => v.to_lowercase(),
            _ => return Selector::All,
        };
        match value.as_str() {
            "github" => Selector::Only(SourceKind::GitHub),
            "gitlab" => Selector::Only(SourceKind::GitLab),
            "r2" => Selector::Only(SourceKind::R2),
            "where" => Selector::Lookup,
            _ => Selector::Unknown(value),
        }
    }

    pub fn mode(&self) -> Mode {
        match self {
            Selector::Lookup => Mode::Lookup,
            _ => Mode::Content,
        }
    }

    /// Whether backends of `kind` take part.
    pub fn includes(&self, kind: SourceKind) -> bool {
        match self {
            Selector::All | Selector::Lookup => true,
            Selector::Only(only) => *only == kind,
            Selector::Unknown(_) => false,
        }
    }

    /// Tail of the 404 message.
    pub fn describe(&self) -> String {
        match self {
            Selector::All => "in the GitHub, GitLab and R2 storage".to_string(),
            Selector::Lookup => "in any repository".to_string(),
            Selector::Only(kind) => format!("from {kind}"),
            Selector::Unknown(raw) => format!("from {raw}"),
        }
    }
}

/// Content fetch or metadata lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Content,
    Lookup,
}

/// One configured backend account.
#[derive(Debug, Clone)]
pub enum Backend {
    GitHub(github::GithubRepo),
    GitLab(gitlab::GitlabProject),
    R2(r2::R2Account),
}

impl Backend {
    pub fn kind(&self) -> SourceKind {
        match self {
            Backend::GitHub(_) => SourceKind::GitHub,
            Backend::GitLab(_) => SourceKind::GitLab,
            Backend::R2(_) => SourceKind::R2,
        }
    }

    /// Backend label as shown in lookup results.
    pub fn label(&self) -> String {
        match self {
            Backend::GitHub(repo) => repo.repo.clone(),
            Backend::GitLab(project) => project.name.clone(),
            Backend::R2(account) => format!("{} ({})", account.name, account.bucket),
        }
    }

    /// Build the outbound request for `file` in `mode`.
    pub fn candidate(
        &self,
        catalog: &Catalog,
        file: &str,
        mode: Mode,
        now: DateTime<Utc>,
    ) -> Candidate {
        let request = match self {
            Backend::GitHub(repo) => Ok(github::file_request(catalog, repo, file, mode)),
            Backend::GitLab(project) => Ok(gitlab::file_request(catalog, project, file, mode)),
            Backend::R2(account) => r2::file_request(catalog, account, file, mode, now),
        };
        Candidate {
            kind: self.kind(),
            label: self.label(),
            request,
        }
    }
}

/// Every usable backend plus the shared request context.
#[derive(Debug, Clone)]
pub struct Catalog {
    pub backends: Vec<Backend>,
    /// Shared directory prefix inside every repository/bucket.
    pub dir: String,
    pub branch: String,
    pub user_agent: String,
    pub endpoints: EndpointsConfig,
    /// Token for the shared GitHub username lookup.
    pub github_token: String,
}

impl Catalog {
    /// Resolve the configuration into a list of usable backends.
    ///
    /// Partially filled entries are skipped. The GitHub repository list
    /// falls back to the GitLab account names when it is empty.
    pub fn from_config(config: &Config) -> Self {
        let sources = &config.sources;
        let mut backends = Vec::new();

        let gitlab: Vec<gitlab::GitlabProject> = sources
            .gitlab
            .iter()
            .filter_map(gitlab::GitlabProject::from_config)
            .collect();

        let mut repos: Vec<String> = sources
            .github
            .repos
            .iter()
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();
        if repos.is_empty() {
            repos = sources
                .gitlab
                .iter()
                .map(|g| g.name.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect();
        }
        let owner = sources.github.username.trim();
        if !owner.is_empty() {
            for repo in repos {
                backends.push(Backend::GitHub(github::GithubRepo {
                    owner: owner.to_string(),
                    repo,
                    token: sources.github.token.trim().to_string(),
                }));
            }
        }

        backends.extend(gitlab.into_iter().map(Backend::GitLab));
        backends.extend(
            sources
                .r2
                .iter()
                .filter_map(r2::R2Account::from_config)
                .map(Backend::R2),
        );

        Self {
            backends,
            dir: sources.dir.trim_matches('/').to_string(),
            branch: sources.branch.clone(),
            user_agent: sources.user_agent.clone(),
            endpoints: config.endpoints.clone(),
            github_token: sources.github.token.trim().to_string(),
        }
    }

    /// `dir/file`, or just `file` when no directory is configured.
    pub fn object_path(&self, file: &str) -> String {
        join_path(&[&self.dir, file])
    }

    pub fn has(&self, kind: SourceKind) -> bool {
        self.backends.iter().any(|b| b.kind() == kind)
    }
}

/// One fully constructed outbound request within a race.
#[derive(Debug)]
pub struct Candidate {
    pub kind: SourceKind,
    /// Backend label (repo, project name, or `account (bucket)`).
    pub label: String,
    /// The request, or the signing error that prevented building it.
    pub request: Result<OutboundRequest, SignError>,
}

impl Candidate {
    /// `source (label)` as reported to the caller.
    pub fn source(&self) -> String {
        format!("{} ({})", self.kind, self.label)
    }
}

/// Enumerate the candidates for `file` under `selector`.
///
/// Returns [`EdgeError::NoValidSource`] when nothing can be contacted, so
/// the caller never goes to the network with an empty race.
pub fn build_candidates(
    catalog: &Catalog,
    file: &str,
    selector: &Selector,
    now: DateTime<Utc>,
) -> Result<Vec<Candidate>, EdgeError> {
    let mode = selector.mode();
    let candidates: Vec<Candidate> = if file.is_empty() {
        Vec::new()
    } else {
        catalog
            .backends
            .iter()
            .filter(|b| selector.includes(b.kind()))
            .map(|b| b.candidate(catalog, file, mode, now))
            .collect()
    };

    if candidates.is_empty() {
        return Err(EdgeError::NoValidSource {
            file: file.to_string(),
            selector: selector.clone(),
        });
    }
    Ok(candidates)
}

/// Join path segments with `/`, trimming slashes and skipping empty parts.
pub fn join_path(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|p| p.trim_matches('/'))
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
