use thiserror::Error;

#[derive(Debug, Error)]
pub enum BookError {
    #[error("operation canceled")]
    Canceled,
    #[error("book has been disposed")]
    Disposed,
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to load pages: {0}")]
    Supplier(String),
}

pub type BookResult<T> = std::result::Result<T, BookError>;
