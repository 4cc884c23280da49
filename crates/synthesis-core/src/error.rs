use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },

    #[error("Timed out fetching {url}")]
    Timeout { url: String },

    #[error("HTTP client error: {0}")]
    Client(String),
}

/// The page is not the one we know how to read. Individual bad rows never
/// produce this; they are skipped and counted.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("Container `{0}` not found, page structure changed")]
    MissingContainer(String),

    #[error("Invalid selector `{selector}`: {message}")]
    Selector { selector: String, message: String },
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Messaging API rejected request ({status}): {description}")]
    Api { status: u16, description: String },

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Failure of one pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Delivery(#[from] DeliveryError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
