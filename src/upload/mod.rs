//! Upload pipeline: SigV4 signing, KVS REST resolution, fragment-ACK
//! parsing, credential refresh, and the session state machine that ties
//! them together.

pub mod ack;
pub mod credentials;
pub mod endpoint;
pub mod session;
pub mod sigv4;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum UploadError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error(transparent)]
    Net(#[from] crate::net::NetError),
    #[error("KVS returned HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },
    #[error("credential refresh failed: {0}")]
    Auth(String),
    #[error("fragment ACK reported a fatal error: {0}")]
    SessionFatal(String),
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

pub use session::{UploadSession, UploadSessionState};
