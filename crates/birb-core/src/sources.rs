//! Stream catalog fetch with priority fallthrough.
//!
//! Each configured source is tried in order; the first one that yields a
//! parseable feed wins.  A failing source is logged and skipped.  When
//! every source fails the result is an empty list, never an error.

use std::path::PathBuf;
use std::time::Duration;

use birb_proto::feed::{load_feed_file, parse_feed_str};
use birb_proto::protocol::StreamDescriptor;
use tracing::{error, info, warn};

/// Where the stream list comes from.  `fetch` is blocking and runs on a
/// pool worker.
pub trait Catalog: Send + Sync {
    fn fetch(&self) -> Vec<StreamDescriptor>;
}

#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("could not read {path}: {reason}")]
    File { path: PathBuf, reason: String },
    #[error("malformed feed: {0}")]
    Malformed(String),
}

/// One configured source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    Http(String),
    File(PathBuf),
}

impl Source {
    /// `http(s)://` is remote, `file://` and anything else is a local path.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.starts_with("http://") || raw.starts_with("https://") {
            Source::Http(raw.to_string())
        } else if let Some(path) = raw.strip_prefix("file://") {
            Source::File(PathBuf::from(path))
        } else {
            Source::File(PathBuf::from(raw))
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::Http(url) => write!(f, "{}", url),
            Source::File(path) => write!(f, "file://{}", path.display()),
        }
    }
}

pub struct SourceList {
    sources: Vec<Source>,
    timeout: Duration,
}

impl SourceList {
    pub fn new(raw: &[String], timeout: Duration) -> Self {
        Self {
            sources: raw.iter().map(|s| Source::parse(s)).collect(),
            timeout,
        }
    }

    fn fetch_one(&self, source: &Source) -> Result<Vec<StreamDescriptor>, SourceError> {
        match source {
            Source::Http(url) => {
                let client = reqwest::blocking::Client::builder()
                    .timeout(self.timeout)
                    .build()?;
                let response = client.get(url).send()?.error_for_status()?;
                let text = response.text()?;
                parse_feed_str(&text).map_err(|e| SourceError::Malformed(e.to_string()))
            }
            Source::File(path) => {
                if !path.exists() {
                    return Err(SourceError::File {
                        path: path.clone(),
                        reason: "not found".to_string(),
                    });
                }
                load_feed_file(path).map_err(|e| SourceError::File {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

impl Catalog for SourceList {
    fn fetch(&self) -> Vec<StreamDescriptor> {
        for source in &self.sources {
            match self.fetch_one(source) {
                Ok(streams) => {
                    info!("Loaded {} streams from {}", streams.len(), source);
                    return streams;
                }
                Err(e) => warn!("could not get stream data from {}: {}", source, e),
            }
        }
        error!("could not get stream data from any source");
        Vec::new()
    }
}
