use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("model '{model}' unavailable: {message}")]
    ModelUnavailable { model: String, message: String },

    #[error("model '{model}' timed out after {timeout_secs}s")]
    ModelTimeout { model: String, timeout_secs: u64 },

    #[error("model '{model}' returned a malformed response: {message}")]
    MalformedResponse { model: String, message: String },

    #[error("only {got} of the required {required} model responses arrived")]
    InsufficientModels { got: usize, required: usize },

    #[error("vehicle registry unavailable: {0}")]
    ValidationUnavailable(String),

    #[error("request deadline exceeded")]
    RequestTimeout,

    #[error("Environment variable error: {0}")]
    Env(#[from] std::env::VarError),
}

pub type Result<T> = std::result::Result<T, ExtractError>;
