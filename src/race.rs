//! Race-fetch orchestration.
//!
//! Every candidate is spawned onto one [`JoinSet`].  The first candidate
//! that *succeeds* wins; a non-OK status, a transport error, a signing
//! error or an interpretation error only eliminates that candidate.  When
//! the winner is found the set is dropped, which aborts the stragglers.
//!
//! Failures are kept per candidate index so an all-failed race always
//! reports exactly one entry per candidate, in candidate order.

use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::errors::{CandidateError, CandidateFailure};
use crate::metrics::CANDIDATE_RESULTS_TOTAL;
use crate::signer::SignError;
use crate::sources::{Candidate, Mode, SourceKind};
use crate::upstream::{OutboundRequest, Upstream};

/// Headers never forwarded from a winning backend response.
///
/// Credentials and signer material first, then hop-by-hop headers and
/// `content-length`, which the server recomputes.
pub const SCRUBBED_HEADERS: &[&str] = &[
    "authorization",
    "private-token",
    "x-amz-content-sha256",
    "x-amz-date",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

/// A successful lookup-mode candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Located {
    pub size_bytes: u64,
    pub source: SourceKind,
    pub backend: String,
    /// Race start to this candidate's resolution.
    pub elapsed_ms: u128,
}

impl Located {
    /// `source (backend)`, as shown to the caller.
    pub fn source_label(&self) -> String {
        format!("{} ({})", self.source, self.backend)
    }

    pub fn report(&self, file: &str) -> LookupReport {
        LookupReport {
            file_name: file.to_string(),
            size: format_lookup_size(self.size_bytes),
            source: self.source_label(),
            duration: format!("{}ms", self.elapsed_ms),
        }
    }
}

/// JSON body of a `where` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupReport {
    pub file_name: String,
    pub size: String,
    pub source: String,
    pub duration: String,
}

/// A successful content-mode candidate, headers already scrubbed.
#[derive(Debug, Clone)]
pub struct FetchedContent {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
pub enum RaceOutcome {
    Located(Located),
    Content(FetchedContent),
    /// One entry per candidate, in candidate order.
    AllFailed(Vec<CandidateFailure>),
}

enum Win {
    Located(u64),
    Content(FetchedContent),
}

/// Fire every candidate concurrently and return the first success.
pub async fn race(upstream: Arc<dyn Upstream>, candidates: Vec<Candidate>, mode: Mode) -> RaceOutcome {
    let started = Instant::now();
    let mut failures: Vec<CandidateFailure> = candidates
        .iter()
        .map(|c| CandidateFailure {
            backend: c.source(),
            reason: "request did not complete".to_string(),
        })
        .collect();
    let meta: Vec<(SourceKind, String)> = candidates
        .iter()
        .map(|c| (c.kind, c.label.clone()))
        .collect();

    let mut set = JoinSet::new();
    for (index, candidate) in candidates.into_iter().enumerate() {
        let upstream = upstream.clone();
        set.spawn(async move {
            let result = attempt(upstream, candidate.kind, candidate.request, mode).await;
            (index, result)
        });
    }

    while let Some(joined) = set.join_next().await {
        let (index, result) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                warn!("candidate task failed: {}", e);
                continue;
            }
        };
        let (kind, label) = &meta[index];
        match result {
            Ok(win) => {
                let elapsed_ms = started.elapsed().as_millis();
                record(*kind, "success");
                info!(
                    source = kind.as_str(),
                    backend = %label,
                    elapsed_ms = elapsed_ms as u64,
                    "candidate won race"
                );
                // Dropping `set` on return aborts the remaining candidates.
                return match win {
                    Win::Located(size_bytes) => RaceOutcome::Located(Located {
                        size_bytes,
                        source: *kind,
                        backend: label.clone(),
                        elapsed_ms,
                    }),
                    Win::Content(content) => RaceOutcome::Content(content),
                };
            }
            Err(e) => {
                record(*kind, "failure");
                debug!("candidate {} ({}) failed: {}", kind, label, e);
                failures[index].reason = e.to_string();
            }
        }
    }

    warn!("all {} candidates failed", failures.len());
    RaceOutcome::AllFailed(failures)
}

async fn attempt(
    upstream: Arc<dyn Upstream>,
    kind: SourceKind,
    request: Result<OutboundRequest, SignError>,
    mode: Mode,
) -> Result<Win, CandidateError> {
    let request = request?;
    let resp = upstream
        .send(request)
        .await
        .map_err(|e| CandidateError::Transport(e.to_string()))?;
    match mode {
        Mode::Lookup => kind.interpret(&resp).map(Win::Located),
        Mode::Content => {
            if !resp.status.is_success() {
                return Err(CandidateError::Status(resp.status));
            }
            Ok(Win::Content(FetchedContent {
                status: resp.status,
                headers: scrub_headers(&resp.headers),
                body: resp.body,
            }))
        }
    }
}

fn record(kind: SourceKind, result: &'static str) {
    metrics::counter!(
        CANDIDATE_RESULTS_TOTAL,
        "source" => kind.as_str(),
        "result" => result
    )
    .increment(1);
}

/// Copy `headers` without any of [`SCRUBBED_HEADERS`].
pub fn scrub_headers(headers: &HeaderMap) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        if !SCRUBBED_HEADERS.contains(&name.as_str()) {
            out.append(name.clone(), value.clone());
        }
    }
    out
}

/// Two-decimal kB, or MB above one MiB.
pub fn format_lookup_size(bytes: u64) -> String {
    const MIB: u64 = 1024 * 1024;
    if bytes > MIB {
        format!("{:.2} MB", bytes as f64 / MIB as f64)
    } else {
        format!("{:.2} kB", bytes as f64 / 1024.0)
    }
}
