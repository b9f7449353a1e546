use std::fmt;

use anyhow::Error;
use serde::Serialize;
use serde_json::Value;

pub const CONFIG_PARSE: &str = "CONFIG_PARSE";
pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
pub const CONFIG_RANGE: &str = "CONFIG_RANGE";
pub const CONFIG_DUPLICATE_LINE: &str = "CONFIG_DUPLICATE_LINE";
pub const EMPTY_CONTENT: &str = "EMPTY_CONTENT";
pub const RENDER_TIMEOUT: &str = "RENDER_TIMEOUT";
pub const EXTERNAL_TOOL_FAILURE: &str = "EXTERNAL_TOOL_FAILURE";
pub const VIDEO_NOT_FOUND: &str = "VIDEO_NOT_FOUND";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CodedErrorKind {
    Configuration,
    EmptyContent,
    NotFound,
    RenderTimeout,
    ExternalTool,
}

/// Which side of the service boundary an error is blamed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Client,
    Server,
}

impl CodedErrorKind {
    pub fn class(self) -> ErrorClass {
        match self {
            Self::Configuration | Self::EmptyContent | Self::NotFound => ErrorClass::Client,
            Self::RenderTimeout | Self::ExternalTool => ErrorClass::Server,
        }
    }

    /// HTTP-equivalent status for callers that put this behind a web surface.
    pub fn status_code(self) -> u16 {
        match self {
            Self::Configuration | Self::EmptyContent => 400,
            Self::NotFound => 404,
            Self::RenderTimeout | Self::ExternalTool => 500,
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
    pub fn configuration(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(code, message, CodedErrorKind::Configuration)
    }

    pub fn empty_content(message: impl Into<String>) -> Self {
        Self::new(EMPTY_CONTENT, message, CodedErrorKind::EmptyContent)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(VIDEO_NOT_FOUND, message, CodedErrorKind::NotFound)
    }

    pub fn render_timeout(message: impl Into<String>) -> Self {
        Self::new(RENDER_TIMEOUT, message, CodedErrorKind::RenderTimeout)
    }

    pub fn external_tool(message: impl Into<String>) -> Self {
        Self::new(EXTERNAL_TOOL_FAILURE, message, CodedErrorKind::ExternalTool)
    }

    fn new(code: &'static str, message: impl Into<String>, kind: CodedErrorKind) -> Self {
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

    pub fn class(&self) -> ErrorClass {
        self.kind.class()
    }

    pub fn envelope(&self) -> ErrorEnvelope {
        ErrorEnvelope {
            ok: false,
            error: ErrorEnvelopeBody {
                code: self.code.to_owned(),
                message: self.message.clone(),
                class: self.class(),
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
    pub class: ErrorClass,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

pub fn find_coded_error(error: &Error) -> Option<&CodedError> {
    error
        .chain()
        .find_map(|cause| cause.downcast_ref::<CodedError>())
}

/// Envelope for any error; uncoded failures are reported as external tool failures.
pub fn envelope_for(error: &Error) -> ErrorEnvelope {
    match find_coded_error(error) {
        Some(coded) => coded.envelope(),
        None => CodedError::external_tool(format!("{error:#}")).envelope(),
    }
}

#[cfg(test)]
mod tests {
    use anyhow::{anyhow, Context};
    use serde_json::json;

    use super::*;

    #[test]
    fn coded_error_survives_context_wrapping() {
        let error = Err::<(), _>(anyhow!(CodedError::empty_content("no lines")))
            .context("while planning layout")
            .unwrap_err();
        let coded = find_coded_error(&error).expect("coded error should be found");
        assert_eq!(coded.code, EMPTY_CONTENT);
        assert_eq!(coded.class(), ErrorClass::Client);
    }

    #[test]
    fn timeout_and_tool_failures_are_server_class() {
        assert_eq!(CodedErrorKind::RenderTimeout.class(), ErrorClass::Server);
        assert_eq!(CodedErrorKind::ExternalTool.status_code(), 500);
        assert_eq!(CodedErrorKind::Configuration.status_code(), 400);
    }

    #[test]
    fn envelope_serializes_details_only_when_present() {
        let bare = serde_json::to_value(CodedError::configuration(CONFIG_RANGE, "bad").envelope())
            .expect("envelope should serialize");
        assert!(bare["error"].get("details").is_none());

        let detailed = CodedError::configuration(CONFIG_RANGE, "bad")
            .with_details(json!({ "start_line": 9, "end_line": 3 }));
        let value = serde_json::to_value(detailed.envelope()).expect("envelope should serialize");
        assert_eq!(value["ok"], json!(false));
        assert_eq!(value["error"]["class"], json!("client"));
        assert_eq!(value["error"]["details"]["start_line"], json!(9));
    }

    #[test]
    fn uncoded_errors_fall_back_to_tool_failure_envelope() {
        let envelope = envelope_for(&anyhow!("ffmpeg exploded"));
        assert_eq!(envelope.error.code, EXTERNAL_TOOL_FAILURE);
        assert!(envelope.error.message.contains("ffmpeg exploded"));
    }
}
