//! Crate-wide error taxonomy
//!
//! Leaf modules (vint, mkv, ring buffer, rtp, net) define their own narrow
//! error enums and never log at error severity themselves — only the upload
//! session and facade translate leaf errors into state transitions and logs.

use thiserror::Error;

use crate::config::ConfigError;
use crate::mkv::MkvError;
use crate::net::NetError;
use crate::ring_buffer::RingBufferError;
use crate::rtp::RtpError;
use crate::stream::StreamError;
use crate::upload::UploadError;
use crate::vint::VintError;

/// Crate-wide error, composed from each component's leaf error type.
#[derive(Error, Debug)]
pub enum KvsError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of memory")]
    OutOfMemory,

    #[error(transparent)]
    Vint(#[from] VintError),

    #[error(transparent)]
    Mkv(#[from] MkvError),

    #[error(transparent)]
    RingBuffer(#[from] RingBufferError),

    #[error(transparent)]
    Rtp(#[from] RtpError),

    #[error(transparent)]
    Net(#[from] NetError),

    #[error(transparent)]
    Upload(#[from] UploadError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

pub type KvsResult<T> = Result<T, KvsError>;
