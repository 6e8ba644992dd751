//! Credential refresh: either static long-lived keys, or a short-lived
//! triple obtained via an IoT role-alias exchange, mirroring
//! `IotCredentialRequest_t`/`IotCredentialToken_t` in the embedded SDK.
//! Re-architected per the "mutable global credential state" design note:
//! refresh is a method on a session-scoped value, not a setter on a
//! static facade.

use serde::Deserialize;

use crate::net::SecureChannel;
use crate::port::Clock;

use super::UploadError;

#[derive(Debug, Clone)]
pub struct Credentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

#[derive(Debug, Clone)]
pub struct IotCredentialRequest {
    pub credential_host: String,
    pub role_alias: String,
    pub thing_name: String,
    pub root_ca: Vec<u8>,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

#[derive(Debug, Deserialize)]
struct IotCredentialResponseBody {
    credentials: IotCredentialResponseInner,
}

#[derive(Debug, Deserialize)]
struct IotCredentialResponseInner {
    #[serde(rename = "accessKeyId")]
    access_key_id: String,
    #[serde(rename = "secretAccessKey")]
    secret_access_key: String,
    #[serde(rename = "sessionToken")]
    session_token: String,
}

/// Where the session's AWS credentials come from.
pub enum CredentialSource {
    Static { access_key_id: String, secret_access_key: String },
    Iot(IotCredentialRequest),
}

impl CredentialSource {
    /// Obtains the (possibly short-lived) credentials to sign the next
    /// session open with. For `Static`, this is a cheap clone; for `Iot`,
    /// it performs a mutually-authenticated HTTPS GET to
    /// `<host>/role-aliases/<roleAlias>/credentials`.
    pub fn refresh(
        &self,
        channel: &mut dyn SecureChannel,
        clock: &dyn Clock,
    ) -> Result<Credentials, UploadError> {
        match self {
            CredentialSource::Static { access_key_id, secret_access_key } => Ok(Credentials {
                access_key_id: access_key_id.clone(),
                secret_access_key: secret_access_key.clone(),
                session_token: None,
            }),
            CredentialSource::Iot(req) => fetch_iot_credentials(req, channel, clock),
        }
    }
}

fn fetch_iot_credentials(
    req: &IotCredentialRequest,
    channel: &mut dyn SecureChannel,
    clock: &dyn Clock,
) -> Result<Credentials, UploadError> {
    channel
        .connect_mutual_tls(&req.credential_host, 443, &req.root_ca, &req.certificate, &req.private_key)
        .map_err(|e| UploadError::Auth(format!("IoT credential TLS handshake failed: {e}")))?;

    let path = format!("/role-aliases/{}/credentials", req.role_alias);
    let request = format!(
        "GET {path} HTTP/1.1\r\nHost: {host}\r\nx-amzn-iot-thingname: {thing}\r\nConnection: close\r\n\r\n",
        host = req.credential_host,
        thing = req.thing_name,
    );

    channel.send(request.as_bytes()).map_err(UploadError::Net)?;
    let _ = clock.now_ms();

    let mut buf = Vec::new();
    let mut chunk = [0u8; 2048];
    loop {
        let n = channel.recv(&mut chunk).map_err(UploadError::Net)?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let parser = crate::net::HttpResponseParser::new();
    let parsed = match parser.parse(&buf).map_err(UploadError::Net)? {
        crate::net::http::ParseOutcome::Complete(resp) => resp,
        crate::net::http::ParseOutcome::Incomplete => {
            return Err(UploadError::Auth("IoT credential response was truncated".into()))
        }
    };

    if parsed.status != 200 {
        return Err(UploadError::HttpStatus {
            status: parsed.status,
            body: String::from_utf8_lossy(&parsed.body).into_owned(),
        });
    }

    let body: IotCredentialResponseBody = serde_json::from_slice(&parsed.body)?;
    Ok(Credentials {
        access_key_id: body.credentials.access_key_id,
        secret_access_key: body.credentials.secret_access_key,
        session_token: Some(body.credentials.session_token),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::InMemorySecureChannel;
    use crate::port::SystemClock;

    #[test]
    fn static_credentials_refresh_without_network() {
        let source = CredentialSource::Static {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
        };
        let mut channel = InMemorySecureChannel::new();
        let creds = source.refresh(&mut channel, &SystemClock).unwrap();
        assert_eq!(creds.access_key_id, "AKIDEXAMPLE");
        assert!(creds.session_token.is_none());
    }

    #[test]
    fn iot_credentials_parsed_from_response_body() {
        let req = IotCredentialRequest {
            credential_host: "credentials.iot.us-east-1.amazonaws.com".into(),
            role_alias: "KvsCameraIoTRoleAlias".into(),
            thing_name: "my-camera".into(),
            root_ca: b"root-ca-pem".to_vec(),
            certificate: b"cert-pem".to_vec(),
            private_key: b"key-pem".to_vec(),
        };
        let mut channel = InMemorySecureChannel::new();
        let body = br#"{"credentials":{"accessKeyId":"AKID","secretAccessKey":"SECRET","sessionToken":"TOKEN","expiration":"2026-01-01T00:00:00Z"}}"#;
        let response = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}",
            body.len(),
            std::str::from_utf8(body).unwrap()
        );
        channel.queue_response(response.as_bytes());

        let source = CredentialSource::Iot(req);
        let creds = source.refresh(&mut channel, &SystemClock).unwrap();
        assert_eq!(creds.access_key_id, "AKID");
        assert_eq!(creds.session_token.as_deref(), Some("TOKEN"));
    }
}
