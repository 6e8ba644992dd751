//! KVS control-plane REST calls: `DescribeStream`, `CreateStream`,
//! `GetDataEndpoint`. Each is a signed JSON POST over the `SecureChannel`,
//! modeled as typed request/response structs rather than the original's
//! dotted-path JSON helpers.

use serde::{Deserialize, Serialize};

use crate::net::http::ParseOutcome;
use crate::net::{HttpResponseParser, SecureChannel};
use crate::port::Clock;

use super::credentials::Credentials;
use super::sigv4::{sha256_hex, SigV4Signer};
use super::UploadError;

fn send_signed_json_request(
    channel: &mut dyn SecureChannel,
    signer: &SigV4Signer,
    credentials: &Credentials,
    clock: &dyn Clock,
    host: &str,
    path: &str,
    target: &str,
    body: &[u8],
) -> Result<Vec<u8>, UploadError> {
    let timestamp = clock.iso_time();
    let date = &timestamp[0..8];
    let payload_hash = sha256_hex(body);

    let mut headers = vec![
        ("host".to_string(), host.to_string()),
        ("x-amz-date".to_string(), timestamp.clone()),
        ("x-amz-target".to_string(), target.to_string()),
        ("content-type".to_string(), "application/x-amz-json-1.1".to_string()),
        ("content-length".to_string(), body.len().to_string()),
    ];
    if let Some(token) = &credentials.session_token {
        headers.push(("x-amz-security-token".to_string(), token.clone()));
    }

    let authorization =
        signer.authorization_header("POST", path, "", &headers, &payload_hash, &timestamp, date);

    let mut request = format!("POST {path} HTTP/1.1\r\n");
    for (name, value) in &headers {
        request.push_str(&format!("{name}: {value}\r\n"));
    }
    request.push_str(&format!("Authorization: {authorization}\r\n\r\n"));

    channel.send(request.as_bytes())?;
    channel.send(body)?;

    let parser = HttpResponseParser::new();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let ParseOutcome::Complete(resp) = parser.parse(&buf)? {
            if resp.status != 200 {
                return Err(UploadError::HttpStatus {
                    status: resp.status,
                    body: String::from_utf8_lossy(&resp.body).into_owned(),
                });
            }
            return Ok(resp.body);
        }
        let n = channel.recv(&mut chunk)?;
        if n == 0 {
            return Err(UploadError::Net(crate::net::NetError::Disconnected));
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

#[derive(Debug, Serialize)]
struct DescribeStreamRequest<'a> {
    #[serde(rename = "StreamName")]
    stream_name: &'a str,
}

#[derive(Debug, Deserialize)]
pub struct StreamInfo {
    #[serde(rename = "StreamARN")]
    pub stream_arn: String,
    #[serde(rename = "Status")]
    pub status: String,
}

#[derive(Debug, Deserialize)]
struct DescribeStreamResponse {
    #[serde(rename = "StreamInfo")]
    stream_info: StreamInfo,
}

pub fn describe_stream(
    channel: &mut dyn SecureChannel,
    signer: &SigV4Signer,
    credentials: &Credentials,
    clock: &dyn Clock,
    host: &str,
    stream_name: &str,
) -> Result<StreamInfo, UploadError> {
    let body = serde_json::to_vec(&DescribeStreamRequest { stream_name })?;
    let resp = send_signed_json_request(
        channel,
        signer,
        credentials,
        clock,
        host,
        "/describeStream",
        "KinesisVideo_20170910.DescribeStream",
        &body,
    )?;
    let parsed: DescribeStreamResponse = serde_json::from_slice(&resp)?;
    Ok(parsed.stream_info)
}

#[derive(Debug, Serialize)]
struct CreateStreamRequest<'a> {
    #[serde(rename = "StreamName")]
    stream_name: &'a str,
    #[serde(rename = "DataRetentionInHours")]
    data_retention_in_hours: u32,
}

#[derive(Debug, Deserialize)]
struct CreateStreamResponse {
    #[serde(rename = "StreamARN")]
    #[allow(dead_code)]
    stream_arn: String,
}

pub fn create_stream(
    channel: &mut dyn SecureChannel,
    signer: &SigV4Signer,
    credentials: &Credentials,
    clock: &dyn Clock,
    host: &str,
    stream_name: &str,
    data_retention_in_hours: u32,
) -> Result<(), UploadError> {
    let body = serde_json::to_vec(&CreateStreamRequest { stream_name, data_retention_in_hours })?;
    send_signed_json_request(
        channel,
        signer,
        credentials,
        clock,
        host,
        "/createStream",
        "KinesisVideo_20170910.CreateStream",
        &body,
    )?;
    Ok(())
}

#[derive(Debug, Serialize)]
struct GetDataEndpointRequest<'a> {
    #[serde(rename = "StreamName")]
    stream_name: &'a str,
    #[serde(rename = "APIName")]
    api_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct GetDataEndpointResponse {
    #[serde(rename = "DataEndpoint")]
    data_endpoint: String,
}

pub fn get_data_endpoint(
    channel: &mut dyn SecureChannel,
    signer: &SigV4Signer,
    credentials: &Credentials,
    clock: &dyn Clock,
    host: &str,
    stream_name: &str,
) -> Result<String, UploadError> {
    let body =
        serde_json::to_vec(&GetDataEndpointRequest { stream_name, api_name: "PUT_MEDIA" })?;
    let resp = send_signed_json_request(
        channel,
        signer,
        credentials,
        clock,
        host,
        "/getDataEndpoint",
        "KinesisVideo_20170910.GetDataEndpoint",
        &body,
    )?;
    let parsed: GetDataEndpointResponse = serde_json::from_slice(&resp)?;
    Ok(parsed.data_endpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::InMemorySecureChannel;
    use crate::port::SystemClock;

    fn signer() -> SigV4Signer {
        SigV4Signer {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: "us-east-1".into(),
            service: "kinesisvideo".into(),
        }
    }

    fn credentials() -> Credentials {
        Credentials { access_key_id: "AKIDEXAMPLE".into(), secret_access_key: "secret".into(), session_token: None }
    }

    #[test]
    fn describe_stream_parses_200_response() {
        let mut channel = InMemorySecureChannel::new();
        channel.connect("kinesisvideo.us-east-1.amazonaws.com", 443).unwrap();
        let body = br#"{"StreamInfo":{"StreamARN":"arn:aws:kinesisvideo:us-east-1:1:stream/s/1","Status":"ACTIVE"}}"#;
        let response =
            format!("HTTP/1.1 200 OK\r\nContent-Length: {}\r\n\r\n{}", body.len(), std::str::from_utf8(body).unwrap());
        channel.queue_response(response.as_bytes());

        let info = describe_stream(
            &mut channel,
            &signer(),
            &credentials(),
            &SystemClock,
            "kinesisvideo.us-east-1.amazonaws.com",
            "my-stream",
        )
        .unwrap();
        assert_eq!(info.status, "ACTIVE");
    }

    #[test]
    fn non_200_surfaces_as_http_status_error() {
        let mut channel = InMemorySecureChannel::new();
        channel.connect("kinesisvideo.us-east-1.amazonaws.com", 443).unwrap();
        let body = br#"{"message":"not found"}"#;
        let response =
            format!("HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\n\r\n{}", body.len(), std::str::from_utf8(body).unwrap());
        channel.queue_response(response.as_bytes());

        let err = describe_stream(
            &mut channel,
            &signer(),
            &credentials(),
            &SystemClock,
            "kinesisvideo.us-east-1.amazonaws.com",
            "missing-stream",
        )
        .unwrap_err();
        assert!(matches!(err, UploadError::HttpStatus { status: 404, .. }));
    }
}
