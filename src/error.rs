//! Error taxonomy shared by the cache engine and the server loop.

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The client datagram has no usable header or question.
    #[error("malformed query: {0}")]
    MalformedQuery(&'static str),

    /// The upstream reply cannot be walked or does not answer the question.
    #[error("malformed response: {0}")]
    MalformedResponse(&'static str),

    #[error("upstream {addr} unavailable: {source}")]
    UpstreamUnavailable {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("cache persistence failed for {}: {source}", path.display())]
    Persistence {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub(crate) fn persistence(path: impl Into<PathBuf>, source: impl Into<io::Error>) -> Self {
        Error::Persistence {
            path: path.into(),
            source: source.into(),
        }
    }

    /// True when a persistence failure only means there was nothing to load.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::Persistence { source, .. } if source.kind() == io::ErrorKind::NotFound
        )
    }
}
