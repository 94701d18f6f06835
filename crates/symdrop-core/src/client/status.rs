//! Human-readable descriptions of failed responses.

use super::transport::HttpResponse;
use serde::Deserialize;
use std::fmt;

const FORBIDDEN_ADVICE: &str =
    "Was a valid API key provided for an organization & application you have access to?";

/// Status line of a response, with recovery advice where some is known
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    /// Status code
    pub code: u16,
    /// Reason phrase
    pub text: String,
}

impl StatusMessage {
    /// Creates a status message
    pub fn new(code: u16, text: impl Into<String>) -> Self {
        Self {
            code,
            text: text.into(),
        }
    }

    /// Builds the status message of a response
    pub fn from_response(response: &HttpResponse) -> Self {
        Self::new(response.status, response.status_text.clone())
    }

    /// Advice for recovering from this status
    pub fn advice(&self) -> Option<&'static str> {
        match self.code {
            403 => Some(FORBIDDEN_ADVICE),
            _ => None,
        }
    }

    /// Returns true if [`advice`](Self::advice) has something to say
    pub fn has_advice(&self) -> bool {
        self.advice().is_some()
    }
}

impl fmt::Display for StatusMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)?;
        if let Some(advice) = self.advice() {
            write!(f, " - {advice}")?;
        }
        Ok(())
    }
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Describes a failed response for the console.
///
/// The status line comes first, then the raw body when `verbose`, then the
/// server's `error` message if the body is JSON carrying one.
pub fn describe_failure(response: &HttpResponse, verbose: bool) -> String {
    let mut lines = vec![StatusMessage::from_response(response).to_string()];
    if verbose {
        lines.push(response.text());
    }
    match response.json::<ErrorBody>() {
        Ok(ErrorBody { error: Some(error) }) => lines.push(error),
        Ok(_) => {}
        Err(_) => lines.push("Could not complete request.".to_string()),
    }
    lines.join("\n")
}
