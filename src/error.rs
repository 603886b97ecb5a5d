use std::io;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("operation not allowed while {0}")]
    InvalidState(&'static str),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("nothing to save, the frame buffer is empty")]
    EmptyBuffer,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl Error {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}
