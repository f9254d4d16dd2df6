//! Wire errors
//!
//! Bayeux servers report failures as `"<code>:<csv-params>:<description>"`.
//! [`ProtocolError::parse`] turns that into a structured value; strings that
//! do not follow the format keep their raw text with no code.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct ProtocolError {
    pub code: Option<u16>,
    pub params: Vec<String>,
    pub message: String,
}

impl ProtocolError {
    pub fn new(code: u16, params: &[&str], message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            params: params.iter().map(|p| p.to_string()).collect(),
            message: message.into(),
        }
    }

    pub fn unparsed(raw: impl Into<String>) -> Self {
        Self {
            code: None,
            params: Vec::new(),
            message: raw.into(),
        }
    }

    pub fn parse(raw: &str) -> Self {
        Self::try_parse(raw).unwrap_or_else(|| Self::unparsed(raw))
    }

    fn try_parse(raw: &str) -> Option<Self> {
        let (code, rest) = raw.split_once(':')?;
        if code.len() != 3 || !code.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let (params, message) = rest.split_once(':')?;
        let params = if params.is_empty() {
            Vec::new()
        } else {
            params.split(',').map(str::to_string).collect()
        };
        Some(Self {
            code: code.parse().ok(),
            params,
            message: message.to_string(),
        })
    }

    pub fn version_mismatch(params: &[&str]) -> Self {
        Self::new(300, params, "Version mismatch")
    }

    pub fn conntype_mismatch(params: &[&str]) -> Self {
        Self::new(301, params, "Connection types not supported")
    }

    pub fn ext_mismatch(params: &[&str]) -> Self {
        Self::new(302, params, "Extension mismatch")
    }

    pub fn bad_request(params: &[&str]) -> Self {
        Self::new(400, params, "Bad request")
    }

    pub fn client_unknown(params: &[&str]) -> Self {
        Self::new(401, params, "Unknown client")
    }

    pub fn parameter_missing(params: &[&str]) -> Self {
        Self::new(402, params, "Missing required parameter")
    }

    pub fn channel_forbidden(params: &[&str]) -> Self {
        Self::new(403, params, "Forbidden channel")
    }

    pub fn channel_unknown(params: &[&str]) -> Self {
        Self::new(404, params, "Unknown channel")
    }

    pub fn channel_invalid(params: &[&str]) -> Self {
        Self::new(405, params, "Invalid channel")
    }

    pub fn ext_unknown(params: &[&str]) -> Self {
        Self::new(406, params, "Unknown extension")
    }

    pub fn publish_failed(params: &[&str]) -> Self {
        Self::new(407, params, "Failed to publish")
    }

    pub fn server_error(params: &[&str]) -> Self {
        Self::new(500, params, "Internal server error")
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{code}:{}:{}", self.params.join(","), self.message),
            None => f.write_str(&self.message),
        }
    }
}
