//! `SecureChannel`: the TLS/mutual-TLS byte pipe the upload session and
//! credential refresh run over. The concurrency model is OS-thread +
//! blocking I/O, so this is a synchronous `rustls` client over
//! `std::net::TcpStream` rather than an async transport.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use super::NetError;

/// Platform-provided secure byte channel. Implementations may be real TLS
/// sockets or, for tests, an in-process duplex pipe.
pub trait SecureChannel: Send {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), NetError>;

    fn connect_mutual_tls(
        &mut self,
        host: &str,
        port: u16,
        root_ca: &[u8],
        cert: &[u8],
        private_key: &[u8],
    ) -> Result<(), NetError>;

    fn send(&mut self, data: &[u8]) -> Result<usize, NetError>;
    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError>;
    fn disconnect(&mut self);
    fn set_recv_timeout_ms(&mut self, timeout_ms: u64);
    fn set_send_timeout_ms(&mut self, timeout_ms: u64);
    fn is_readable(&self) -> bool;
}

fn load_root_store(root_ca_pem: &[u8]) -> Result<RootCertStore, NetError> {
    let mut store = RootCertStore::empty();
    let certs: Vec<CertificateDer> = rustls_pemfile::certs(&mut &root_ca_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| NetError::TlsHandshake(format!("invalid root CA PEM: {e}")))?;
    for cert in certs {
        store
            .add(cert)
            .map_err(|e| NetError::TlsHandshake(format!("invalid root CA cert: {e}")))?;
    }
    Ok(store)
}

fn load_cert_chain(cert_pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, NetError> {
    rustls_pemfile::certs(&mut &cert_pem[..])
        .collect::<Result<_, _>>()
        .map_err(|e| NetError::TlsHandshake(format!("invalid client cert PEM: {e}")))
}

fn load_private_key(key_pem: &[u8]) -> Result<PrivateKeyDer<'static>, NetError> {
    rustls_pemfile::private_key(&mut &key_pem[..])
        .map_err(|e| NetError::TlsHandshake(format!("invalid client key PEM: {e}")))?
        .ok_or_else(|| NetError::TlsHandshake("no private key found in PEM".into()))
}

/// Default `SecureChannel`, backed by blocking `rustls` over `TcpStream`.
pub struct TlsSecureChannel {
    stream: Option<StreamOwned<ClientConnection, TcpStream>>,
    recv_timeout: Duration,
    send_timeout: Duration,
}

impl Default for TlsSecureChannel {
    fn default() -> Self {
        TlsSecureChannel {
            stream: None,
            recv_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
        }
    }
}

impl TlsSecureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn connect_with_config(&mut self, host: &str, port: u16, config: ClientConfig) -> Result<(), NetError> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| NetError::Connect(format!("invalid server name {host}: {e}")))?;
        let conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| NetError::TlsHandshake(e.to_string()))?;

        let tcp = TcpStream::connect((host, port)).map_err(|e| NetError::Connect(e.to_string()))?;
        tcp.set_read_timeout(Some(self.recv_timeout)).ok();
        tcp.set_write_timeout(Some(self.send_timeout)).ok();

        self.stream = Some(StreamOwned::new(conn, tcp));
        Ok(())
    }
}

impl SecureChannel for TlsSecureChannel {
    fn connect(&mut self, host: &str, port: u16) -> Result<(), NetError> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        let config = ClientConfig::builder().with_root_certificates(roots).with_no_client_auth();
        self.connect_with_config(host, port, config)
    }

    fn connect_mutual_tls(
        &mut self,
        host: &str,
        port: u16,
        root_ca: &[u8],
        cert: &[u8],
        private_key: &[u8],
    ) -> Result<(), NetError> {
        let roots = load_root_store(root_ca)?;
        let chain = load_cert_chain(cert)?;
        let key = load_private_key(private_key)?;

        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_client_auth_cert(chain, key)
            .map_err(|e| NetError::TlsHandshake(format!("client auth cert rejected: {e}")))?;
        self.connect_with_config(host, port, config)
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, NetError> {
        let stream = self.stream.as_mut().ok_or(NetError::Disconnected)?;
        stream.write(data).map_err(|e| NetError::Send(e.to_string()))
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        let stream = self.stream.as_mut().ok_or(NetError::Disconnected)?;
        match stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock || e.kind() == std::io::ErrorKind::TimedOut => {
                Err(NetError::Timeout(self.recv_timeout))
            }
            Err(e) => Err(NetError::Recv(e.to_string())),
        }
    }

    fn disconnect(&mut self) {
        self.stream = None;
    }

    fn set_recv_timeout_ms(&mut self, timeout_ms: u64) {
        self.recv_timeout = Duration::from_millis(timeout_ms);
        if let Some(stream) = &self.stream {
            stream.get_ref().set_read_timeout(Some(self.recv_timeout)).ok();
        }
    }

    fn set_send_timeout_ms(&mut self, timeout_ms: u64) {
        self.send_timeout = Duration::from_millis(timeout_ms);
        if let Some(stream) = &self.stream {
            stream.get_ref().set_write_timeout(Some(self.send_timeout)).ok();
        }
    }

    fn is_readable(&self) -> bool {
        self.stream.is_some()
    }
}

/// In-process duplex byte pipe standing in for a real socket, so upload
/// session state-machine tests never open a TCP connection.
#[cfg(test)]
pub struct InMemorySecureChannel {
    pub connected: bool,
    pub sent: Vec<u8>,
    pub to_recv: std::collections::VecDeque<u8>,
}

#[cfg(test)]
impl Default for InMemorySecureChannel {
    fn default() -> Self {
        InMemorySecureChannel { connected: false, sent: Vec::new(), to_recv: Default::default() }
    }
}

#[cfg(test)]
impl InMemorySecureChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&mut self, bytes: &[u8]) {
        self.to_recv.extend(bytes.iter().copied());
    }
}

#[cfg(test)]
impl SecureChannel for InMemorySecureChannel {
    fn connect(&mut self, _host: &str, _port: u16) -> Result<(), NetError> {
        self.connected = true;
        Ok(())
    }

    fn connect_mutual_tls(
        &mut self,
        _host: &str,
        _port: u16,
        _root_ca: &[u8],
        _cert: &[u8],
        _private_key: &[u8],
    ) -> Result<(), NetError> {
        self.connected = true;
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<usize, NetError> {
        if !self.connected {
            return Err(NetError::Disconnected);
        }
        self.sent.extend_from_slice(data);
        Ok(data.len())
    }

    fn recv(&mut self, buf: &mut [u8]) -> Result<usize, NetError> {
        if !self.connected {
            return Err(NetError::Disconnected);
        }
        let mut n = 0;
        while n < buf.len() {
            match self.to_recv.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn set_recv_timeout_ms(&mut self, _timeout_ms: u64) {}
    fn set_send_timeout_ms(&mut self, _timeout_ms: u64) {}
    fn is_readable(&self) -> bool {
        self.connected && !self.to_recv.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_memory_channel_round_trips_bytes() {
        let mut channel = InMemorySecureChannel::new();
        channel.connect("kinesisvideo.us-east-1.amazonaws.com", 443).unwrap();
        channel.queue_response(b"hello");
        channel.send(b"request").unwrap();
        assert_eq!(channel.sent, b"request");

        let mut buf = [0u8; 5];
        let n = channel.recv(&mut buf).unwrap();
        assert_eq!(n, 5);
        assert_eq!(&buf, b"hello");
    }

    #[test]
    fn send_before_connect_is_disconnected_error() {
        let mut channel = InMemorySecureChannel::new();
        assert!(matches!(channel.send(b"x"), Err(NetError::Disconnected)));
    }
}
