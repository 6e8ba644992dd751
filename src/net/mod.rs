//! Net transport: a `SecureChannel` trait abstracting the mutual-TLS byte
//! pipe the upload session runs over, and a minimal HTTP response parser.

pub mod http;
pub mod secure_channel;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("TLS handshake failed: {0}")]
    TlsHandshake(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("send failed: {0}")]
    Send(String),
    #[error("recv failed: {0}")]
    Recv(String),
    #[error("operation timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("malformed HTTP response framing: {0}")]
    HttpParse(String),
    #[error("channel already disconnected")]
    Disconnected,
}

pub use http::HttpResponseParser;
pub use secure_channel::{SecureChannel, TlsSecureChannel};
#[cfg(test)]
pub use secure_channel::InMemorySecureChannel;
