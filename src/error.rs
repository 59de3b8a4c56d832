use thiserror::Error;

/// Failure of a single HTTP request made through the host.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("http status {code}")]
    Status { code: u16, body: String },
    #[error("invalid response body: {0}")]
    Decode(String),
}

impl FetchError {
    /// Upstream error code carried in a JSON error body (`{"ok":false,"error":"..."}`).
    pub fn api_code(&self) -> Option<String> {
        match self {
            FetchError::Status { body, .. } => serde_json::from_str::<serde_json::Value>(body)
                .ok()
                .and_then(|v| v["error"].as_str().map(str::to_string)),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Read(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Rejected user input. Shown inline, never forwarded to the data layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("'{0}' is not a valid price")]
    BadNumber(String),
    #[error("price must be zero or positive")]
    Negative,
    #[error("high alert must be above low alert")]
    Inverted,
    #[error("'{0}' is not a valid symbol")]
    BadSymbol(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_code_reads_json_error_body() {
        let err = FetchError::Status {
            code: 401,
            body: r#"{"ok":false,"error":"stocks_api_key_missing"}"#.to_string(),
        };
        assert_eq!(err.api_code().as_deref(), Some("stocks_api_key_missing"));
        assert_eq!(FetchError::Transport("refused".into()).api_code(), None);
    }
}
