//! Failure normalisation
//!
//! Every failed request is described as a [`RawFailure`] and run through a
//! fixed, ordered rule table. The first rule that matches decides the
//! [`ApiError`] handed to the caller.

use std::error::Error as StdError;
use std::io;

use reqwest::StatusCode;
use serde_json::Value;

/// Normalised request failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ApiError {
    #[error("NETWORK_ERROR")]
    Network,
    #[error("CORS_ERROR")]
    Cors,
    #[error("CONNECTION_ERROR")]
    ConnectionRefused,
    #[error("TIMEOUT_ERROR")]
    Timeout,
    #[error("UNAUTHORIZED")]
    Unauthorized { message: Option<String> },
    #[error("FORBIDDEN")]
    Forbidden { message: Option<String> },
    #[error("NOT_FOUND")]
    NotFound { message: Option<String> },
    #[error("VALIDATION_ERROR")]
    Validation { message: Option<String> },
    #[error("RATE_LIMIT_ERROR")]
    RateLimited { message: Option<String> },
    #[error("SERVER_ERROR")]
    Server { message: Option<String> },
    #[error("{}", http_label(.status, .message))]
    Http { status: u16, message: Option<String> },
    #[error("{0}")]
    Unknown(String),
}

fn http_label(status: &u16, message: &Option<String>) -> String {
    match message {
        Some(message) => message.clone(),
        None => format!("HTTP_{status}_ERROR"),
    }
}

impl ApiError {
    /// Stable label callers switch on, e.g. `NOT_FOUND`
    pub fn code(&self) -> String {
        match self {
            ApiError::Http { status, .. } => format!("HTTP_{status}_ERROR"),
            ApiError::Unknown(_) => "UNKNOWN_ERROR".to_string(),
            other => other.to_string(),
        }
    }

    /// Message supplied by the backend in the response body, if any
    pub fn message(&self) -> Option<&str> {
        match self {
            ApiError::Unauthorized { message }
            | ApiError::Forbidden { message }
            | ApiError::NotFound { message }
            | ApiError::Validation { message }
            | ApiError::RateLimited { message }
            | ApiError::Server { message }
            | ApiError::Http { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Unauthorized { .. } => Some(401),
            ApiError::Forbidden { .. } => Some(403),
            ApiError::NotFound { .. } => Some(404),
            ApiError::Validation { .. } => Some(422),
            ApiError::RateLimited { .. } => Some(429),
            ApiError::Server { .. } => Some(500),
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The backend could not be reached at all
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ApiError::Network | ApiError::Cors)
    }

    pub fn is_unauthorized(&self) -> bool {
        matches!(self, ApiError::Unauthorized { .. })
    }

    pub(crate) fn invalid_body(err: serde_json::Error) -> Self {
        ApiError::Unknown(format!("invalid response body: {err}"))
    }
}

/// What is known about a failed request before normalisation
#[derive(Debug, Clone, Default)]
pub struct RawFailure {
    /// HTTP status, when a response arrived
    pub status: Option<u16>,
    /// `message` field of a JSON error body
    pub body_message: Option<String>,
    pub connect: bool,
    pub refused: bool,
    pub timed_out: bool,
    /// Error text and its source chain, without the request URL
    pub text: String,
}

impl RawFailure {
    /// Failure raised before a usable response was read
    pub fn from_transport(err: &reqwest::Error) -> Self {
        // the URL is caller data and must not feed the text rules
        let mut text = match err.url() {
            Some(url) => err.to_string().replace(&format!(" for url ({url})"), ""),
            None => err.to_string(),
        };
        let mut refused = false;
        let mut source = err.source();
        while let Some(cause) = source {
            if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                refused |= io_err.kind() == io::ErrorKind::ConnectionRefused;
            }
            text.push_str(": ");
            text.push_str(&cause.to_string());
            source = cause.source();
        }
        refused |= text.to_lowercase().contains("connection refused");

        Self {
            status: err.status().map(|s| s.as_u16()),
            body_message: None,
            connect: err.is_connect(),
            refused,
            timed_out: err.is_timeout(),
            text,
        }
    }

    /// Non-success response
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let body_message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("message").and_then(Value::as_str).map(str::to_owned))
            .filter(|m| !m.is_empty());

        Self {
            status: Some(status.as_u16()),
            body_message,
            text: format!("HTTP {status}"),
            ..Self::default()
        }
    }

    fn mentions(&self, needle: &str) -> bool {
        self.text.to_lowercase().contains(needle)
    }

    fn has_status(&self, status: u16) -> bool {
        self.status == Some(status)
    }
}

struct Rule {
    matches: fn(&RawFailure) -> bool,
    build: fn(&RawFailure) -> ApiError,
}

const RULES: &[Rule] = &[
    Rule {
        matches: |f| {
            f.status.is_none()
                && ((f.connect && !f.refused && !f.timed_out) || f.mentions("network error"))
        },
        build: |_| ApiError::Network,
    },
    Rule {
        matches: |f| f.status.is_none() && f.mentions("cors"),
        build: |_| ApiError::Cors,
    },
    Rule {
        matches: |f| f.status.is_none() && f.refused,
        build: |_| ApiError::ConnectionRefused,
    },
    Rule {
        matches: |f| {
            f.status.is_none()
                && (f.timed_out || f.mentions("timeout") || f.mentions("timed out"))
        },
        build: |_| ApiError::Timeout,
    },
    Rule {
        matches: |f| f.has_status(401),
        build: |f| ApiError::Unauthorized { message: f.body_message.clone() },
    },
    Rule {
        matches: |f| f.has_status(403),
        build: |f| ApiError::Forbidden { message: f.body_message.clone() },
    },
    Rule {
        matches: |f| f.has_status(404),
        build: |f| ApiError::NotFound { message: f.body_message.clone() },
    },
    Rule {
        matches: |f| f.has_status(422),
        build: |f| ApiError::Validation { message: f.body_message.clone() },
    },
    Rule {
        matches: |f| f.has_status(429),
        build: |f| ApiError::RateLimited { message: f.body_message.clone() },
    },
    Rule {
        matches: |f| f.has_status(500),
        build: |f| ApiError::Server { message: f.body_message.clone() },
    },
    Rule {
        matches: |f| f.status.is_some(),
        build: |f| ApiError::Http {
            status: f.status.unwrap_or_default(),
            message: f.body_message.clone(),
        },
    },
];

/// Map a raw failure to its normalised kind; first matching rule wins
pub fn normalize(failure: &RawFailure) -> ApiError {
    RULES
        .iter()
        .find(|rule| (rule.matches)(failure))
        .map(|rule| (rule.build)(failure))
        .unwrap_or_else(|| {
            if failure.text.is_empty() {
                ApiError::Unknown("UNKNOWN_ERROR".to_string())
            } else {
                ApiError::Unknown(failure.text.clone())
            }
        })
}
