//! Minimal HTTP/1.1 response parser: status line + headers + body framing.
//!
//! A thin adapter, not a general HTTP library — grounded in the embedded
//! SDK's incremental-buffer-grow-and-reparse loop (`Http_recvHttpRsp`),
//! expressed here as a small state machine over an accumulating buffer
//! instead of pulling in `hyper`/`h1` for a single-purpose response reader.

use std::collections::HashMap;

use super::NetError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseOutcome {
    /// Not enough bytes buffered yet to determine status/headers/body.
    Incomplete,
    /// A complete, framed response.
    Complete(ParsedResponse),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Byte offset into the input buffer immediately after this response —
    /// callers pipelining chunked event streams resume parsing from here.
    pub consumed: usize,
}

/// Parses HTTP responses out of an accumulating byte buffer. Each call to
/// [`HttpResponseParser::parse`] is independent and stateless; the session
/// keeps re-growing its receive buffer and re-parsing, exactly as the
/// embedded SDK's `BUFFER_enlarge`-then-`llhttp_execute` loop does.
#[derive(Default)]
pub struct HttpResponseParser;

impl HttpResponseParser {
    pub fn new() -> Self {
        HttpResponseParser
    }

    pub fn parse(&self, buf: &[u8]) -> Result<ParseOutcome, NetError> {
        let text_end = match find_header_terminator(buf) {
            Some(pos) => pos,
            None => return Ok(ParseOutcome::Incomplete),
        };

        let header_text = std::str::from_utf8(&buf[..text_end])
            .map_err(|e| NetError::HttpParse(format!("non-UTF-8 header block: {e}")))?;
        let mut lines = header_text.split("\r\n");

        let status_line = lines.next().ok_or_else(|| NetError::HttpParse("empty response".into()))?;
        let status = parse_status_line(status_line)?;

        let mut headers = HashMap::new();
        for line in lines {
            if line.is_empty() {
                continue;
            }
            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| NetError::HttpParse(format!("malformed header line: {line}")))?;
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }

        let body_start = text_end + 4; // past the blank-line terminator

        // 100-continue carries no body and must be discarded by the caller
        // so it can re-parse once the real response arrives.
        if status / 100 == 1 {
            return Ok(ParseOutcome::Complete(ParsedResponse {
                status,
                headers,
                body: Vec::new(),
                consumed: body_start,
            }));
        }

        if let Some(length) = headers.get("content-length").and_then(|v| v.parse::<usize>().ok()) {
            if buf.len() < body_start + length {
                return Ok(ParseOutcome::Incomplete);
            }
            return Ok(ParseOutcome::Complete(ParsedResponse {
                status,
                headers,
                body: buf[body_start..body_start + length].to_vec(),
                consumed: body_start + length,
            }));
        }

        if headers.get("transfer-encoding").map(|v| v.eq_ignore_ascii_case("chunked")).unwrap_or(false) {
            return parse_chunked_body(buf, body_start, status, headers);
        }

        // No framing header: treat everything buffered so far as the body
        // (matches responses closed by connection termination).
        Ok(ParseOutcome::Complete(ParsedResponse {
            status,
            headers,
            body: buf[body_start..].to_vec(),
            consumed: buf.len(),
        }))
    }
}

fn find_header_terminator(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_status_line(line: &str) -> Result<u16, NetError> {
    let mut parts = line.split_whitespace();
    let _version = parts.next().ok_or_else(|| NetError::HttpParse("missing HTTP version".into()))?;
    let code = parts.next().ok_or_else(|| NetError::HttpParse("missing status code".into()))?;
    code.parse::<u16>().map_err(|e| NetError::HttpParse(format!("bad status code {code}: {e}")))
}

/// Decodes one or more chunked-transfer frames starting at `body_start`.
/// Used both for ordinary chunked bodies and for the `PUT_MEDIA` fragment-ACK
/// event stream, which the caller re-invokes as new chunks arrive.
fn parse_chunked_body(
    buf: &[u8],
    body_start: usize,
    status: u16,
    headers: HashMap<String, String>,
) -> Result<ParseOutcome, NetError> {
    let mut pos = body_start;
    let mut body = Vec::new();

    loop {
        let line_end = match buf[pos..].windows(2).position(|w| w == b"\r\n") {
            Some(rel) => pos + rel,
            None => return Ok(ParseOutcome::Incomplete),
        };
        let size_str = std::str::from_utf8(&buf[pos..line_end])
            .map_err(|e| NetError::HttpParse(format!("bad chunk size encoding: {e}")))?;
        let size_str = size_str.split(';').next().unwrap_or(size_str).trim();
        let chunk_len = usize::from_str_radix(size_str, 16)
            .map_err(|e| NetError::HttpParse(format!("bad chunk size {size_str}: {e}")))?;

        let chunk_data_start = line_end + 2;
        if chunk_len == 0 {
            let trailer_end = chunk_data_start + 2; // final CRLF after the zero-length chunk
            if buf.len() < trailer_end {
                return Ok(ParseOutcome::Incomplete);
            }
            return Ok(ParseOutcome::Complete(ParsedResponse { status, headers, body, consumed: trailer_end }));
        }

        let chunk_data_end = chunk_data_start + chunk_len;
        if buf.len() < chunk_data_end + 2 {
            return Ok(ParseOutcome::Incomplete);
        }
        body.extend_from_slice(&buf[chunk_data_start..chunk_data_end]);
        pos = chunk_data_end + 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_content_length_response() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: 5\r\n\r\nhello";
        let parser = HttpResponseParser::new();
        match parser.parse(raw).unwrap() {
            ParseOutcome::Complete(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(resp.body, b"hello");
                assert_eq!(resp.headers.get("content-type").unwrap(), "application/json");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_headers_returns_incomplete() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 5\r\n";
        let parser = HttpResponseParser::new();
        assert_eq!(parser.parse(raw).unwrap(), ParseOutcome::Incomplete);
    }

    #[test]
    fn parses_chunked_body() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n";
        let parser = HttpResponseParser::new();
        match parser.parse(raw).unwrap() {
            ParseOutcome::Complete(resp) => {
                assert_eq!(resp.status, 200);
                assert_eq!(resp.body, b"hello world");
            }
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn hundred_continue_has_no_body_and_is_discarded() {
        let raw = b"HTTP/1.1 100 Continue\r\n\r\n";
        let parser = HttpResponseParser::new();
        match parser.parse(raw).unwrap() {
            ParseOutcome::Complete(resp) => assert_eq!(resp.status, 100),
            ParseOutcome::Incomplete => panic!("expected complete parse"),
        }
    }

    #[test]
    fn incomplete_chunked_body_waits_for_more_bytes() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhel";
        let parser = HttpResponseParser::new();
        assert_eq!(parser.parse(raw).unwrap(), ParseOutcome::Incomplete);
    }
}
