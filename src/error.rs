use reqwest::StatusCode;

#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("{service} request failed: {message}")]
    Transport {
        service: &'static str,
        message: String,
    },
    #[error("bad {service} response: {status}: {body}")]
    Status {
        service: &'static str,
        status: StatusCode,
        body: String,
    },
    #[error("couldn't decode {service} response: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },
    #[error("lagoon database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("empty groups response from Keycloak. Permissions issue?")]
    EmptyGroups,
    #[error("invalid index name: {0}")]
    InvalidIndexName(String),
    #[error("invalid attributes on group {group}: {message}")]
    GroupAttribute { group: String, message: String },
    #[error("couldn't encode JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("operation cancelled")]
    Cancelled,
}

impl SyncError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn transport(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Transport {
            service,
            message: err.to_string(),
        }
    }

    pub fn status(service: &'static str, status: StatusCode, body: impl Into<String>) -> Self {
        Self::Status {
            service,
            status,
            body: body.into(),
        }
    }

    pub fn decode(service: &'static str, err: impl std::fmt::Display) -> Self {
        Self::Decode {
            service,
            message: err.to_string(),
        }
    }

    pub fn group_attribute(group: &str, message: impl Into<String>) -> Self {
        Self::GroupAttribute {
            group: group.to_string(),
            message: message.into(),
        }
    }
}
