use thiserror::Error;

#[derive(Debug, Error)]
pub enum PkgbuildError {
    #[error("Unterminated quote starting on line {line}")]
    UnterminatedQuote { line: usize },

    #[error("Unterminated array '{name}' starting on line {line}")]
    UnterminatedArray { name: String, line: usize },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
