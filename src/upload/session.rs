//! The upload session state machine: `Idle -> Describing -> Creating? ->
//! ResolvingEndpoint -> Connecting -> Uploading -> (Draining|Error) -> Idle`.
//! One `do_work` call performs the work for the current state and advances
//! it; the worker thread is expected to loop `open/do_work/close`
//! indefinitely, mirroring the streamer task's run loop.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::net::http::ParseOutcome;
use crate::net::{HttpResponseParser, NetError, SecureChannel};
use crate::port::Clock;
use crate::stream::StreamAssembler;

use super::ack::{self, FragmentAckEvent, FragmentEventType};
use super::credentials::{CredentialSource, Credentials};
use super::endpoint;
use super::sigv4::{self, SigV4Signer, STREAMING_ALGORITHM};
use super::UploadError;

const CONTROL_PLANE_PORT: u16 = 443;
const BACKOFF: Duration = Duration::from_millis(100);
const EMPTY_TRACK_SLEEP: Duration = Duration::from_millis(50);
const DEFAULT_DATA_RETENTION_HOURS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadSessionState {
    Idle,
    Describing,
    Creating,
    ResolvingEndpoint,
    Connecting,
    Uploading,
    Draining,
    Error,
}

/// Drives the KVS control-plane resolution, the chunked `PUT_MEDIA` upload,
/// and fragment-ACK bookkeeping for one stream. Not `Sync`: intended to run
/// on a single dedicated network-worker thread, per the OS-thread
/// concurrency model.
pub struct UploadSession {
    host: String,
    region: String,
    service: String,
    stream_name: String,
    data_retention_hours: u32,
    credential_source: CredentialSource,
    channel: Box<dyn SecureChannel>,
    clock: Box<dyn Clock>,

    state: UploadSessionState,
    credentials: Option<Credentials>,
    signer: Option<SigV4Signer>,
    data_endpoint: Option<String>,
    timestamp: String,
    date: String,
    prev_chunk_signature: String,
    header_sent: bool,
    ack_recv_buf: Vec<u8>,
    pending_acks: VecDeque<FragmentAckEvent>,

    terminate: Arc<AtomicBool>,
    frames_sent: Arc<AtomicU64>,
    bytes_sent: Arc<AtomicU64>,
    acks_received: Arc<AtomicU64>,
}

impl UploadSession {
    pub fn new(
        host: impl Into<String>,
        region: impl Into<String>,
        service: impl Into<String>,
        stream_name: impl Into<String>,
        credential_source: CredentialSource,
        channel: Box<dyn SecureChannel>,
        clock: Box<dyn Clock>,
    ) -> Self {
        UploadSession {
            host: host.into(),
            region: region.into(),
            service: service.into(),
            stream_name: stream_name.into(),
            data_retention_hours: DEFAULT_DATA_RETENTION_HOURS,
            credential_source,
            channel,
            clock,
            state: UploadSessionState::Idle,
            credentials: None,
            signer: None,
            data_endpoint: None,
            timestamp: String::new(),
            date: String::new(),
            prev_chunk_signature: String::new(),
            header_sent: false,
            ack_recv_buf: Vec::new(),
            pending_acks: VecDeque::new(),
            terminate: Arc::new(AtomicBool::new(false)),
            frames_sent: Arc::new(AtomicU64::new(0)),
            bytes_sent: Arc::new(AtomicU64::new(0)),
            acks_received: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn with_data_retention_hours(mut self, hours: u32) -> Self {
        self.data_retention_hours = hours;
        self
    }

    pub fn state(&self) -> UploadSessionState {
        self.state
    }

    /// Equivalent to the facade's `open()`: resets the termination flag so
    /// a session previously closed can be reused.
    pub fn open(&mut self) {
        self.terminate.store(false, Ordering::SeqCst);
        if self.state == UploadSessionState::Idle {
            info!(stream = %self.stream_name, "upload session opening");
        }
    }

    /// Equivalent to the facade's `close()`: the worker observes this flag
    /// at the next `do_work` call and transitions through Draining to Idle.
    pub fn close(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
    }

    pub fn frames_sent(&self) -> u64 {
        self.frames_sent.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Pops the next buffered fragment-ACK event, if any have arrived.
    pub fn read_fragment_ack(&mut self) -> Option<FragmentAckEvent> {
        self.pending_acks.pop_front()
    }

    fn transition(&mut self, next: UploadSessionState) {
        debug!(from = ?self.state, to = ?next, "upload session transition");
        self.state = next;
    }

    /// Performs the work for the current state and advances it by exactly
    /// one step. Returns `Ok(true)` if a frame was sent on the wire this
    /// call. Transient failures (network, 5xx, malformed framing) are
    /// absorbed into an `Error -> Idle` backoff and reported as `Ok(false)`;
    /// permanent failures (`Auth`, non-retryable 4xx, a fatal fragment ACK)
    /// are returned to the caller, who may choose to close the session.
    pub fn do_work(&mut self, stream: &mut StreamAssembler) -> Result<bool, UploadError> {
        if self.terminate.load(Ordering::SeqCst) && !matches!(self.state, UploadSessionState::Idle | UploadSessionState::Draining) {
            self.transition(UploadSessionState::Draining);
        }

        match self.state {
            UploadSessionState::Idle => self.step_idle(),
            UploadSessionState::Describing => self.step_describing(),
            UploadSessionState::Creating => self.step_creating(),
            UploadSessionState::ResolvingEndpoint => self.step_resolving_endpoint(),
            UploadSessionState::Connecting => self.step_connecting(),
            UploadSessionState::Uploading => self.step_uploading(stream),
            UploadSessionState::Draining => self.step_draining(),
            UploadSessionState::Error => self.step_error(),
        }
    }

    fn step_idle(&mut self) -> Result<bool, UploadError> {
        if self.terminate.load(Ordering::SeqCst) {
            return Ok(false);
        }
        let credentials = self.credential_source.refresh(self.channel.as_mut(), self.clock.as_ref())?;
        self.signer = Some(SigV4Signer {
            access_key_id: credentials.access_key_id.clone(),
            secret_access_key: credentials.secret_access_key.clone(),
            session_token: credentials.session_token.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
        });
        self.credentials = Some(credentials);
        self.transition(UploadSessionState::Describing);
        Ok(false)
    }

    fn ensure_control_plane_connected(&mut self) -> Result<(), UploadError> {
        self.channel.disconnect();
        self.channel.connect(&self.host, CONTROL_PLANE_PORT)?;
        Ok(())
    }

    fn step_describing(&mut self) -> Result<bool, UploadError> {
        if let Err(e) = self.ensure_control_plane_connected() {
            warn!(error = %e, "describeStream connect failed, backing off");
            self.transition(UploadSessionState::Error);
            return Ok(false);
        }

        let (signer, credentials) = (self.signer.as_ref().unwrap(), self.credentials.as_ref().unwrap());
        match endpoint::describe_stream(
            self.channel.as_mut(),
            signer,
            credentials,
            self.clock.as_ref(),
            &self.host,
            &self.stream_name,
        ) {
            Ok(info) => {
                info!(stream = %self.stream_name, status = %info.status, "stream described");
                self.transition(UploadSessionState::ResolvingEndpoint);
                Ok(false)
            }
            Err(UploadError::HttpStatus { status, .. }) if (400..500).contains(&status) => {
                info!(stream = %self.stream_name, "stream not found, creating");
                self.transition(UploadSessionState::Creating);
                Ok(false)
            }
            Err(e) => {
                error!(error = %e, "describeStream failed");
                self.transition(UploadSessionState::Error);
                Ok(false)
            }
        }
    }

    fn step_creating(&mut self) -> Result<bool, UploadError> {
        if let Err(e) = self.ensure_control_plane_connected() {
            warn!(error = %e, "createStream connect failed, backing off");
            self.transition(UploadSessionState::Error);
            return Ok(false);
        }

        let (signer, credentials) = (self.signer.as_ref().unwrap(), self.credentials.as_ref().unwrap());
        match endpoint::create_stream(
            self.channel.as_mut(),
            signer,
            credentials,
            self.clock.as_ref(),
            &self.host,
            &self.stream_name,
            self.data_retention_hours,
        ) {
            Ok(()) => {
                info!(stream = %self.stream_name, "stream created");
                self.transition(UploadSessionState::ResolvingEndpoint);
            }
            Err(e) => {
                error!(error = %e, "createStream failed");
                self.transition(UploadSessionState::Error);
            }
        }
        Ok(false)
    }

    fn step_resolving_endpoint(&mut self) -> Result<bool, UploadError> {
        if let Err(e) = self.ensure_control_plane_connected() {
            warn!(error = %e, "getDataEndpoint connect failed, backing off");
            self.transition(UploadSessionState::Error);
            return Ok(false);
        }

        let (signer, credentials) = (self.signer.as_ref().unwrap(), self.credentials.as_ref().unwrap());
        match endpoint::get_data_endpoint(
            self.channel.as_mut(),
            signer,
            credentials,
            self.clock.as_ref(),
            &self.host,
            &self.stream_name,
        ) {
            Ok(endpoint) => {
                info!(endpoint = %endpoint, "data endpoint resolved");
                self.data_endpoint = Some(endpoint);
                self.transition(UploadSessionState::Connecting);
            }
            Err(e) => {
                error!(error = %e, "getDataEndpoint failed");
                self.transition(UploadSessionState::Error);
            }
        }
        Ok(false)
    }

    fn step_connecting(&mut self) -> Result<bool, UploadError> {
        let endpoint = self.data_endpoint.clone().expect("endpoint resolved before Connecting");
        let signer = self.signer.as_ref().unwrap().clone_for_session();
        let credentials = self.credentials.as_ref().unwrap().clone();

        self.channel.disconnect();
        if let Err(e) = self.channel.connect(&endpoint, 443) {
            warn!(error = %e, "PUT_MEDIA connect failed, backing off");
            self.transition(UploadSessionState::Error);
            return Ok(false);
        }

        self.timestamp = self.clock.iso_time();
        self.date = self.timestamp[0..8].to_string();

        let path = "/putMedia".to_string();
        let mut headers = vec![
            ("host".to_string(), endpoint.clone()),
            ("x-amz-date".to_string(), self.timestamp.clone()),
            ("x-amzn-stream-name".to_string(), self.stream_name.clone()),
            ("x-amzn-fragment-acknowledgment-required".to_string(), "1".to_string()),
            ("x-amzn-producer-start-timestamp".to_string(), format!("{}", self.clock.now_ms() as f64 / 1000.0)),
            ("transfer-encoding".to_string(), "chunked".to_string()),
            ("x-amz-content-sha256".to_string(), STREAMING_ALGORITHM.to_string()),
        ];
        if let Some(token) = &credentials.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }

        let authorization = signer.authorization_header(
            "POST",
            &path,
            "",
            &headers,
            STREAMING_ALGORITHM,
            &self.timestamp,
            &self.date,
        );
        self.prev_chunk_signature = seed_signature(&signer, &path, &headers, &self.timestamp, &self.date);

        let mut request = format!("POST {path} HTTP/1.1\r\n");
        for (name, value) in &headers {
            request.push_str(&format!("{name}: {value}\r\n"));
        }
        request.push_str(&format!("Authorization: {authorization}\r\n\r\n"));

        if let Err(e) = self.channel.send(request.as_bytes()) {
            warn!(error = %e, "PUT_MEDIA header send failed, backing off");
            self.transition(UploadSessionState::Error);
            return Ok(false);
        }

        self.header_sent = false;
        self.ack_recv_buf.clear();
        self.signer = Some(signer);
        self.transition(UploadSessionState::Uploading);
        Ok(false)
    }

    fn send_chunk(&mut self, data: &[u8]) -> Result<(), NetError> {
        let secret = &self.credentials.as_ref().unwrap().secret_access_key;
        let signature = sigv4::sign_chunk(
            secret,
            &self.date,
            &self.region,
            &self.service,
            &self.timestamp,
            &self.prev_chunk_signature,
            data,
        );
        let mut framed = format!("{:x};chunk-signature={}\r\n", data.len(), signature).into_bytes();
        framed.extend_from_slice(data);
        framed.extend_from_slice(b"\r\n");
        self.channel.send(&framed)?;
        self.prev_chunk_signature = signature;
        Ok(())
    }

    fn send_final_chunk(&mut self) -> Result<(), NetError> {
        let secret = &self.credentials.as_ref().unwrap().secret_access_key;
        let signature = sigv4::sign_chunk(
            secret,
            &self.date,
            &self.region,
            &self.service,
            &self.timestamp,
            &self.prev_chunk_signature,
            &[],
        );
        let framed = format!("0;chunk-signature={signature}\r\n\r\n");
        self.channel.send(framed.as_bytes())?;
        self.prev_chunk_signature = signature;
        Ok(())
    }

    fn step_uploading(&mut self, stream: &mut StreamAssembler) -> Result<bool, UploadError> {
        if !self.header_sent {
            let header = stream.stream_get_mkv_ebml_seg_hdr().to_vec();
            if let Err(e) = self.send_chunk(&header) {
                warn!(error = %e, "failed sending MKV header chunk, draining");
                self.transition(UploadSessionState::Draining);
                return Ok(false);
            }
            let discarded = stream.flush_to_next_cluster();
            if discarded > 0 {
                debug!(discarded, "flushed stale frames before first cluster");
            }
            self.header_sent = true;
        }

        self.drain_acks();

        if stream.stream_is_empty() {
            thread::sleep(EMPTY_TRACK_SLEEP);
            return Ok(false);
        }

        let frame = stream.stream_pop().expect("checked non-empty above");
        let mut chunk = frame.prefix;
        chunk.extend_from_slice(&frame.data);
        let chunk_len = chunk.len() as u64;

        match self.send_chunk(&chunk) {
            Ok(()) => {
                self.frames_sent.fetch_add(1, Ordering::Relaxed);
                self.bytes_sent.fetch_add(chunk_len, Ordering::Relaxed);
                if self.frames_sent.load(Ordering::Relaxed) % 100 == 0 {
                    info!(frames = self.frames_sent(), bytes = self.bytes_sent(), "upload progress");
                }
                Ok(true)
            }
            Err(e) => {
                warn!(error = %e, "frame send failed, draining");
                self.transition(UploadSessionState::Draining);
                Ok(false)
            }
        }
    }

    /// Best-effort, non-blocking ACK poll: only consumes bytes already
    /// buffered by the transport, never blocks waiting for more.
    fn drain_acks(&mut self) {
        if !self.channel.is_readable() {
            return;
        }
        let mut buf = [0u8; 4096];
        match self.channel.recv(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(n) => self.ack_recv_buf.extend_from_slice(&buf[..n]),
        }

        match ack::parse_fragment_acks(&self.ack_recv_buf) {
            Ok(events) if !events.is_empty() => {
                self.ack_recv_buf.clear();
                for event in events {
                    self.acks_received.fetch_add(1, Ordering::Relaxed);
                    if event.event_type == FragmentEventType::Error {
                        error!(error_id = ?event.error_id, "fragment ACK reported error");
                    }
                    self.pending_acks.push_back(event);
                }
            }
            // Incomplete trailing JSON object: keep buffering.
            Ok(_) => {}
            Err(e) => debug!(error = %e, "discarding malformed fragment-ack bytes"),
        }
    }

    fn step_draining(&mut self) -> Result<bool, UploadError> {
        if self.header_sent {
            let _ = self.send_final_chunk();
        }
        self.drain_acks();
        self.channel.disconnect();
        self.header_sent = false;
        self.ack_recv_buf.clear();

        let fatal = self.pending_acks.iter().find(|e| e.event_type == FragmentEventType::Error).cloned();
        self.transition(UploadSessionState::Idle);

        if let Some(event) = fatal {
            return Err(UploadError::SessionFatal(event.error_id.unwrap_or_default()));
        }
        Ok(false)
    }

    fn step_error(&mut self) -> Result<bool, UploadError> {
        thread::sleep(BACKOFF);
        self.channel.disconnect();
        self.header_sent = false;
        self.transition(UploadSessionState::Idle);
        Ok(false)
    }
}

impl Drop for UploadSession {
    fn drop(&mut self) {
        self.terminate.store(true, Ordering::SeqCst);
        info!(
            stream = %self.stream_name,
            frames = self.frames_sent(),
            bytes = self.bytes_sent(),
            acks = self.acks_received.load(Ordering::Relaxed),
            "upload session closed"
        );
    }
}

/// Computes the seed (request-level) signature used as the key input for
/// the first body chunk's `sign_chunk` call, per the chunked-signing spec.
fn seed_signature(signer: &SigV4Signer, path: &str, headers: &[(String, String)], timestamp: &str, date: &str) -> String {
    let (canonical_headers, signed_headers) = sigv4::canonicalize_headers(headers);
    let creq = sigv4::canonical_request("POST", path, "", &canonical_headers, &signed_headers, STREAMING_ALGORITHM);
    let sts = sigv4::string_to_sign(timestamp, date, &signer.region, &signer.service, &creq);
    sigv4::sign(&signer.secret_access_key, date, &signer.region, &signer.service, &sts)
}

impl SigV4Signer {
    fn clone_for_session(&self) -> Self {
        SigV4Signer {
            access_key_id: self.access_key_id.clone(),
            secret_access_key: self.secret_access_key.clone(),
            session_token: self.session_token.clone(),
            region: self.region.clone(),
            service: self.service.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkv::{MkvTrackInfo, TrackKind, VideoTrackInfo};
    use crate::net::InMemorySecureChannel;
    use crate::port::SystemClock;
    use crate::stream::{FrameInput, StreamAssembler};
    use bytes::Bytes;

    fn video_track() -> MkvTrackInfo {
        MkvTrackInfo {
            kind: TrackKind::Video,
            name: "video".into(),
            codec_id: "V_MPEG4/ISO/AVC".into(),
            codec_private: vec![0x01, 0x64, 0x00, 0x1F],
            video: Some(VideoTrackInfo { width: 640, height: 480 }),
            audio: None,
        }
    }

    fn new_session() -> UploadSession {
        UploadSession::new(
            "kinesisvideo.us-east-1.amazonaws.com",
            "us-east-1",
            "kinesisvideo",
            "my-stream",
            CredentialSource::Static { access_key_id: "AKID".into(), secret_access_key: "secret".into() },
            Box::new(InMemorySecureChannel::new()),
            Box::new(SystemClock),
        )
    }

    #[test]
    fn starts_idle_and_advances_to_describing() {
        let mut session = new_session();
        assert_eq!(session.state(), UploadSessionState::Idle);
        let mut stream = StreamAssembler::stream_create(video_track(), None).unwrap();
        session.do_work(&mut stream).unwrap();
        assert_eq!(session.state(), UploadSessionState::Describing);
    }

    #[test]
    fn close_drains_an_in_progress_session_back_to_idle() {
        let mut session = new_session();
        let mut stream = StreamAssembler::stream_create(video_track(), None).unwrap();
        session.do_work(&mut stream).unwrap(); // -> Describing
        session.close();
        session.do_work(&mut stream).unwrap(); // observes terminate -> Draining -> Idle
        assert_eq!(session.state(), UploadSessionState::Idle);
    }

    #[test]
    fn read_fragment_ack_returns_none_when_queue_empty() {
        let mut session = new_session();
        assert!(session.read_fragment_ack().is_none());
    }

    #[test]
    fn seed_signature_is_stable_for_identical_inputs() {
        let signer = SigV4Signer {
            access_key_id: "AKID".into(),
            secret_access_key: "secret".into(),
            session_token: None,
            region: "us-east-1".into(),
            service: "kinesisvideo".into(),
        };
        let headers = vec![("host".to_string(), "example.com".to_string())];
        let a = seed_signature(&signer, "/putMedia", &headers, "20150830T123600Z", "20150830");
        let b = seed_signature(&signer, "/putMedia", &headers, "20150830T123600Z", "20150830");
        assert_eq!(a, b);
    }

    #[test]
    fn empty_stream_sleeps_briefly_without_error() {
        let mut stream = StreamAssembler::stream_create(video_track(), None).unwrap();
        stream
            .stream_add_data_frame(FrameInput::new(Bytes::from(vec![1]), 0, TrackKind::Video, true))
            .unwrap();
        // Draining the single frame should leave it empty for the sleep path.
        stream.stream_pop();
        assert!(stream.stream_is_empty());
    }
}
