use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const RESOURCE_MATERIALIZATION_FAILED: &str = "resource_materialization_failed";
pub const SESSION_CLOSED: &str = "session_closed";
pub const SESSION_NOT_RUNNING: &str = "session_not_running";
pub const RECORD_NOT_FOUND: &str = "record_not_found";
pub const INVALID_BACKUP: &str = "invalid_backup";
pub const FULLSCREEN_UNAVAILABLE: &str = "fullscreen_unavailable";
/// Code reported for failures that carry no [`CodedError`].
pub const UNCLASSIFIED: &str = "unclassified";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    /// The caller asked for something the current state cannot do.
    Usage,
    /// The host platform refused or failed an operation.
    Platform,
    /// Stored or imported data was missing or malformed.
    Data,
}

impl CodedErrorKind {
    /// Process exit status for a failure of this kind. Uncoded failures exit 1.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Usage => 2,
            Self::Data => 3,
            Self::Platform => 4,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CodedError {
    pub code: &'static str,
    pub message: String,
    pub details: Option<Value>,
    pub kind: CodedErrorKind,
}

impl CodedError {
    pub fn usage(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Usage, code, message)
    }

    pub fn platform(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Platform, code, message)
    }

    pub fn data(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(CodedErrorKind::Data, code, message)
    }

    fn new(kind: CodedErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                details: self.details.clone(),
            },
        }
    }
}

impl fmt::Display for CodedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for CodedError {}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelope {
    pub ok: bool,
    pub error: ErrorEnvelopeBody,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorEnvelopeBody {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

/// Returns the outermost [`CodedError`] attached to `error`, whether it was
/// raised directly, added as context, or sits further down the chain.
pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error.downcast_ref::<CodedError>().or_else(|| {
        error
            .chain()
            .find_map(|cause| cause.downcast_ref::<CodedError>())
    })
}

/// Convenience for tests and callers that branch on a stable code.
pub fn has_code(error: &Error, code: &str) -> bool {
    find_coded_error(error).is_some_and(|coded| coded.code == code)
}

/// Machine-readable form of any error. The message is the full context chain;
/// code and details come from the attached [`CodedError`], if any.
pub fn error_envelope(error: &Error) -> ErrorEnvelope {
    let message = format!("{error:#}");
    match find_coded_error(error) {
        Some(coded) => {
            let mut envelope = coded.envelope();
            envelope.error.message = message;
            envelope
        }
        None => ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: UNCLASSIFIED.to_owned(),
                message,
                details: None,
            },
        },
    }
}

pub fn exit_code_for(error: &Error) -> u8 {
    find_coded_error(error).map_or(1, |coded| coded.kind.exit_code())
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use serde_json::json;

    use super::*;

    #[test]
    fn coded_error_survives_context_wrapping() {
        let error = Err::<(), _>(anyhow!(CodedError::data(
            RECORD_NOT_FOUND,
            "no record with id 'x'"
        )))
        .context("failed to launch")
        .expect_err("should fail");

        let coded = find_coded_error(&error).expect("coded error should be found");
        assert_eq!(coded.code, RECORD_NOT_FOUND);
        assert_eq!(coded.kind, CodedErrorKind::Data);
        assert!(has_code(&error, RECORD_NOT_FOUND));
        assert!(!has_code(&error, SESSION_CLOSED));
    }

    #[test]
    fn envelope_serializes_details_only_when_present() {
        let bare = CodedError::usage(SESSION_CLOSED, "closed").envelope();
        let text = serde_json::to_string(&bare).expect("envelope should serialize");
        assert!(!text.contains("details"));

        let detailed = CodedError::usage(SESSION_CLOSED, "closed")
            .with_details(json!({ "id": "abc" }))
            .envelope();
        let value = serde_json::to_value(&detailed).expect("envelope should serialize");
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["details"]["id"], json!("abc"));
    }

    #[test]
    fn envelope_for_any_error_keeps_the_context_chain() {
        let coded = Err::<(), _>(anyhow!(CodedError::data(INVALID_BACKUP, "no games array")
            .with_details(json!({ "path": "b.json" }))))
        .context("failed to import backup b.json")
        .expect_err("should fail");
        let envelope = error_envelope(&coded);
        assert_eq!(envelope.error.code, INVALID_BACKUP);
        assert!(envelope.error.message.starts_with("failed to import backup b.json: "));
        assert_eq!(envelope.error.details, Some(json!({ "path": "b.json" })));
        assert_eq!(exit_code_for(&coded), 3);

        let plain = anyhow!("disk full");
        let envelope = error_envelope(&plain);
        assert_eq!(envelope.error.code, UNCLASSIFIED);
        assert_eq!(envelope.error.message, "disk full");
        assert_eq!(exit_code_for(&plain), 1);

        let usage = anyhow!(CodedError::usage(SESSION_CLOSED, "closed"));
        assert_eq!(exit_code_for(&usage), 2);
        let platform = anyhow!(CodedError::platform(FULLSCREEN_UNAVAILABLE, "no"));
        assert_eq!(exit_code_for(&platform), 4);
    }
}
