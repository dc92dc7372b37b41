use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue IO error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to encode failure record: {0}")]
    Encode(#[from] serde_json::Error),
}

impl QueueError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        QueueError::Io {
            path: path.into(),
            source,
        }
    }
}
