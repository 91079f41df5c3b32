//! Error types for the retrieval engine.
//!
//! Backend failures are modelled in two layers.  A [`CandidateError`] is
//! what went wrong with one backend; the race folds it into a
//! [`CandidateFailure`] and never lets it escape.  Only [`EdgeError`] is
//! user-visible, and it always renders as `404 Not Found`: an unreachable
//! backend set is "not found", never a server error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::signer::SignError;
use crate::sources::Selector;

/// Generate a 16-character hex request ID.
pub fn generate_request_id() -> String {
    let bytes: [u8; 8] = rand::random();
    hex::encode(bytes).to_uppercase()
}

/// Why a single candidate request failed.
#[derive(Debug, Error)]
pub enum CandidateError {
    /// The backend answered with a non-success status.
    #[error("Not found (status {0})")]
    Status(StatusCode),

    /// The request never produced a response.
    #[error("request failed: {0}")]
    Transport(String),

    /// The request could not be signed.
    #[error(transparent)]
    Signing(#[from] SignError),

    /// The response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Malformed(String),
}

/// One candidate's failure, labelled with the backend it came from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Error in {backend}: {reason}")]
pub struct CandidateFailure {
    /// `source (label)`, e.g. `r2 (main (assets))`.
    pub backend: String,
    /// Human-readable cause.
    pub reason: String,
}

/// Request-level failures surfaced to the caller.
#[derive(Debug, Error)]
pub enum EdgeError {
    /// No candidate could be constructed for the request.
    #[error("404: Cannot find the {file} {}.", .selector.describe())]
    NoValidSource { file: String, selector: Selector },

    /// Every candidate failed.
    #[error("404: Cannot find the {file} {}.", .selector.describe())]
    AllBackendsFailed {
        file: String,
        selector: Selector,
        failures: Vec<CandidateFailure>,
    },
}

impl EdgeError {
    /// Both variants are reported as 404.
    pub fn status_code(&self) -> StatusCode {
        StatusCode::NOT_FOUND
    }
}

impl IntoResponse for EdgeError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            [("content-type", "text/plain;charset=UTF-8")],
            self.to_string(),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::SourceKind;

    #[test]
    fn test_request_id_format() {
        let id = generate_request_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_lowercase()));
    }

    #[test]
    fn test_no_valid_source_message_for_all_sources() {
        let err = EdgeError::NoValidSource {
            file: "logo.png".to_string(),
            selector: Selector::All,
        };
        assert_eq!(
            err.to_string(),
            "404: Cannot find the logo.png in the GitHub, GitLab and R2 storage."
        );
    }

    #[test]
    fn test_all_failed_message_variants() {
        let lookup = EdgeError::AllBackendsFailed {
            file: "a.txt".to_string(),
            selector: Selector::Lookup,
            failures: vec![],
        };
        assert_eq!(lookup.to_string(), "404: Cannot find the a.txt in any repository.");

        let only = EdgeError::AllBackendsFailed {
            file: "a.txt".to_string(),
            selector: Selector::Only(SourceKind::GitLab),
            failures: vec![],
        };
        assert_eq!(only.to_string(), "404: Cannot find the a.txt from gitlab.");

        let unknown = EdgeError::NoValidSource {
            file: "a.txt".to_string(),
            selector: Selector::Unknown("ftp".to_string()),
        };
        assert_eq!(unknown.to_string(), "404: Cannot find the a.txt from ftp.");
    }

    #[test]
    fn test_edge_error_is_404() {
        let resp = EdgeError::NoValidSource {
            file: "x".to_string(),
            selector: Selector::All,
        }
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_candidate_failure_display() {
        let failure = CandidateFailure {
            backend: "github (pics)".to_string(),
            reason: CandidateError::Status(StatusCode::NOT_FOUND).to_string(),
        };
        assert_eq!(
            failure.to_string(),
            "Error in github (pics): Not found (status 404 Not Found)"
        );
    }
}
