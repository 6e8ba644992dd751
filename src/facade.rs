//! `KvsApp`: the high-level facade samples and the WebRTC bridge drive
//! directly — `create`/`setoption`/`open`/`doWork`/`addFrame`/`close`.
//! Wraps a [`StreamAssembler`], an optional ring buffer for the
//! `RingBuffer` stream policy, and an [`UploadSession`].

use std::io;

use bytes::Bytes;
use tracing::{info, warn};

use crate::error::KvsError;
use crate::mkv::{MkvTrackInfo, TrackKind};
use crate::net::TlsSecureChannel;
use crate::port::{Clock, SystemClock};
use crate::ring_buffer::{DropFramePolicy, FrameDestructor, FrameRingBuffer};
use crate::stream::{FrameInput, StreamAssembler};
use crate::upload::credentials::{CredentialSource, IotCredentialRequest};
use crate::upload::session::{UploadSession, UploadSessionState};
use crate::upload::UploadError;

/// Mirrors the enumerated `setoption` keys from the external interface:
/// `AWS_ACCESS_KEY_ID`, `IOT_*`, `KVS_VIDEO_TRACK_INFO`, `STREAM_POLICY`, etc.
pub enum KvsOption {
    AwsAccessKeyId(String),
    AwsSecretAccessKey(String),
    IotCredentialHost(String),
    IotRoleAlias(String),
    IotThingName(String),
    IotX509RootCa(Vec<u8>),
    IotX509Cert(Vec<u8>),
    IotX509Key(Vec<u8>),
    VideoTrackInfo(MkvTrackInfo),
    AudioTrackInfo(MkvTrackInfo),
    StreamPolicy(StreamPolicy),
    StreamPolicyRingBufferMemLimit(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPolicy {
    None,
    RingBuffer,
}

/// What the caller should do after a `do_work` call, mirroring the C
/// facade's `doWork() -> 0 | nonzero` return convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkOutcome {
    Continue,
    Restart,
}

#[derive(Default)]
struct IotOptionsBuilder {
    credential_host: Option<String>,
    role_alias: Option<String>,
    thing_name: Option<String>,
    root_ca: Option<Vec<u8>>,
    cert: Option<Vec<u8>>,
    key: Option<Vec<u8>>,
}

impl IotOptionsBuilder {
    fn is_empty(&self) -> bool {
        self.credential_host.is_none()
            && self.role_alias.is_none()
            && self.thing_name.is_none()
            && self.root_ca.is_none()
            && self.cert.is_none()
            && self.key.is_none()
    }

    fn build(&self) -> Result<IotCredentialRequest, KvsError> {
        Ok(IotCredentialRequest {
            credential_host: self
                .credential_host
                .clone()
                .ok_or_else(|| KvsError::InvalidArgument("IOT_CREDENTIAL_HOST not set".into()))?,
            role_alias: self.role_alias.clone().ok_or_else(|| KvsError::InvalidArgument("IOT_ROLE_ALIAS not set".into()))?,
            thing_name: self.thing_name.clone().ok_or_else(|| KvsError::InvalidArgument("IOT_THING_NAME not set".into()))?,
            root_ca: self.root_ca.clone().ok_or_else(|| KvsError::InvalidArgument("IOT_X509_ROOTCA not set".into()))?,
            certificate: self.cert.clone().ok_or_else(|| KvsError::InvalidArgument("IOT_X509_CERT not set".into()))?,
            private_key: self.key.clone().ok_or_else(|| KvsError::InvalidArgument("IOT_X509_KEY not set".into()))?,
        })
    }
}

/// High-level producer facade: owns the stream assembler, optional ring
/// buffer, and the upload session, and is the only type samples and the
/// WebRTC bridge talk to directly.
pub struct KvsApp {
    host: String,
    region: String,
    service: String,
    stream_name: String,

    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    iot: IotOptionsBuilder,
    video_track_info: Option<MkvTrackInfo>,
    audio_track_info: Option<MkvTrackInfo>,
    stream_policy: StreamPolicy,
    ring_buffer_mem_limit_bytes: usize,

    ring_buffer: Option<FrameRingBuffer>,
    stream: Option<StreamAssembler>,
    session: Option<UploadSession>,
}

impl KvsApp {
    pub fn create(host: impl Into<String>, region: impl Into<String>, service: impl Into<String>, stream_name: impl Into<String>) -> Self {
        KvsApp {
            host: host.into(),
            region: region.into(),
            service: service.into(),
            stream_name: stream_name.into(),
            access_key_id: None,
            secret_access_key: None,
            iot: IotOptionsBuilder::default(),
            video_track_info: None,
            audio_track_info: None,
            stream_policy: StreamPolicy::None,
            ring_buffer_mem_limit_bytes: 16 * 1024 * 1024,
            ring_buffer: None,
            stream: None,
            session: None,
        }
    }

    pub fn setoption(&mut self, option: KvsOption) -> Result<(), KvsError> {
        match option {
            KvsOption::AwsAccessKeyId(v) => self.access_key_id = Some(v),
            KvsOption::AwsSecretAccessKey(v) => self.secret_access_key = Some(v),
            KvsOption::IotCredentialHost(v) => self.iot.credential_host = Some(v),
            KvsOption::IotRoleAlias(v) => self.iot.role_alias = Some(v),
            KvsOption::IotThingName(v) => self.iot.thing_name = Some(v),
            KvsOption::IotX509RootCa(v) => self.iot.root_ca = Some(v),
            KvsOption::IotX509Cert(v) => self.iot.cert = Some(v),
            KvsOption::IotX509Key(v) => self.iot.key = Some(v),
            KvsOption::VideoTrackInfo(v) => self.video_track_info = Some(v),
            KvsOption::AudioTrackInfo(v) => self.audio_track_info = Some(v),
            KvsOption::StreamPolicy(v) => self.stream_policy = v,
            KvsOption::StreamPolicyRingBufferMemLimit(v) => self.ring_buffer_mem_limit_bytes = v,
        }
        Ok(())
    }

    fn credential_source(&self) -> Result<CredentialSource, KvsError> {
        if !self.iot.is_empty() {
            return Ok(CredentialSource::Iot(self.iot.build()?));
        }
        let access_key_id = self.access_key_id.clone().ok_or_else(|| KvsError::InvalidArgument("AWS_ACCESS_KEY_ID not set".into()))?;
        let secret_access_key =
            self.secret_access_key.clone().ok_or_else(|| KvsError::InvalidArgument("AWS_SECRET_ACCESS_KEY not set".into()))?;
        Ok(CredentialSource::Static { access_key_id, secret_access_key })
    }

    /// Builds the stream assembler and upload session, and opens the
    /// session. Equivalent to the C facade's `open()`.
    pub fn open(&mut self) -> Result<(), KvsError> {
        let video = self
            .video_track_info
            .clone()
            .ok_or_else(|| KvsError::InvalidArgument("KVS_VIDEO_TRACK_INFO not set".into()))?;
        let audio = self.audio_track_info.clone();
        let stream = StreamAssembler::stream_create(video, audio)?;

        if self.stream_policy == StreamPolicy::RingBuffer {
            let capacity = (self.ring_buffer_mem_limit_bytes / 4096).max(1);
            let ring = FrameRingBuffer::create(capacity)?;
            ring.set_drop_frame_policy(DropFramePolicy::DropOldest { max_bytes: self.ring_buffer_mem_limit_bytes });
            self.ring_buffer = Some(ring);
        }

        let credential_source = self.credential_source()?;
        let channel: Box<dyn crate::net::SecureChannel> = Box::new(TlsSecureChannel::new());
        let clock: Box<dyn Clock> = Box::new(SystemClock);
        let mut session = UploadSession::new(self.host.clone(), self.region.clone(), self.service.clone(), self.stream_name.clone(), credential_source, channel, clock);
        session.open();

        self.stream = Some(stream);
        self.session = Some(session);
        info!(stream = %self.stream_name, "KvsApp opened");
        Ok(())
    }

    /// Advances the upload session's state machine by one step. The caller
    /// is expected to loop `open/do_work/close` indefinitely; `Restart`
    /// means the caller should `close()` and `open()` again.
    pub fn do_work(&mut self) -> Result<WorkOutcome, KvsError> {
        let session = self.session.as_mut().ok_or_else(|| KvsError::InvalidArgument("session not open".into()))?;
        let stream = self.stream.as_mut().ok_or_else(|| KvsError::InvalidArgument("session not open".into()))?;

        match session.do_work(stream) {
            Ok(_) => Ok(WorkOutcome::Continue),
            Err(UploadError::Auth(msg)) => Err(KvsError::Upload(UploadError::Auth(msg))),
            Err(UploadError::HttpStatus { status, body }) if (400..500).contains(&status) && status != 404 => {
                Err(KvsError::Upload(UploadError::HttpStatus { status, body }))
            }
            Err(e) => {
                warn!(error = %e, "upload session restarting");
                Ok(WorkOutcome::Restart)
            }
        }
    }

    /// Enqueues a frame with no release callback. Returns immediately on
    /// error without consuming `data` — the caller retains ownership.
    pub fn add_frame(&mut self, data: Bytes, ts_ms: u64, track: TrackKind, key_frame: bool) -> Result<(), KvsError> {
        self.add_frame_with_callbacks(data, ts_ms, track, key_frame, FrameDestructor::None)
    }

    /// Enqueues a frame with an optional destructor invoked once the
    /// underlying bytes are released by the ring buffer (eviction or
    /// dequeue), mirroring the `{onTerminate, onToBeSent}` callback pair.
    pub fn add_frame_with_callbacks(
        &mut self,
        data: Bytes,
        ts_ms: u64,
        track: TrackKind,
        key_frame: bool,
        on_terminate: FrameDestructor,
    ) -> Result<(), KvsError> {
        if data.is_empty() {
            return Err(KvsError::InvalidArgument("frame data is empty".into()));
        }

        if let Some(ring) = &self.ring_buffer {
            let key = ring.enqueue(data.clone(), on_terminate)?;
            if ring.get_frame(&key).is_err() {
                // Evicted by the drop policy before it could be forwarded.
                return Ok(());
            }
        }

        let stream = self.stream.as_mut().ok_or_else(|| KvsError::InvalidArgument("session not open".into()))?;
        let frame = FrameInput::new(data, ts_ms, track, key_frame);
        stream.stream_add_data_frame(frame)?;
        Ok(())
    }

    pub fn read_fragment_ack(&mut self) -> Option<crate::upload::ack::FragmentAckEvent> {
        self.session.as_mut().and_then(|s| s.read_fragment_ack())
    }

    pub fn state(&self) -> Option<UploadSessionState> {
        self.session.as_ref().map(|s| s.state())
    }

    /// Closes the current session but keeps the facade reusable for a
    /// subsequent `open()`.
    pub fn close(&mut self) {
        if let Some(session) = &mut self.session {
            session.close();
        }
    }

    /// Tears the facade down entirely; a fresh `open()` rebuilds everything.
    pub fn terminate(&mut self) {
        self.close();
        self.session = None;
        self.stream = None;
        self.ring_buffer = None;
    }
}

/// Loads a PEM/cert/key file for the `IOT_X509_*` options, a thin
/// convenience wrapper since the facade otherwise takes raw bytes.
pub fn read_pem_file(path: &str) -> Result<Vec<u8>, io::Error> {
    std::fs::read(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mkv::VideoTrackInfo;

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

    #[test]
    fn open_without_credentials_fails() {
        let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "my-stream");
        app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
        assert!(app.open().is_err());
    }

    #[test]
    fn open_without_video_track_fails() {
        let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "my-stream");
        app.setoption(KvsOption::AwsAccessKeyId("AKID".into())).unwrap();
        app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
        assert!(app.open().is_err());
    }

    #[test]
    fn open_succeeds_with_static_credentials_and_video_track() {
        let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "my-stream");
        app.setoption(KvsOption::AwsAccessKeyId("AKID".into())).unwrap();
        app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
        app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
        app.open().unwrap();
        assert_eq!(app.state(), Some(UploadSessionState::Idle));
    }

    #[test]
    fn add_frame_before_open_errors() {
        let mut app = KvsApp::create("h", "us-east-1", "kinesisvideo", "s");
        let err = app.add_frame(Bytes::from(vec![1, 2, 3]), 0, TrackKind::Video, true).unwrap_err();
        assert!(matches!(err, KvsError::InvalidArgument(_)));
    }

    #[test]
    fn add_frame_rejects_empty_payload() {
        let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "my-stream");
        app.setoption(KvsOption::AwsAccessKeyId("AKID".into())).unwrap();
        app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
        app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
        app.open().unwrap();
        let err = app.add_frame(Bytes::new(), 0, TrackKind::Video, true).unwrap_err();
        assert!(matches!(err, KvsError::InvalidArgument(_)));
    }

    #[test]
    fn add_frame_after_open_is_forwarded_to_stream() {
        let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "my-stream");
        app.setoption(KvsOption::AwsAccessKeyId("AKID".into())).unwrap();
        app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
        app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
        app.open().unwrap();
        app.add_frame(Bytes::from(vec![1, 2, 3]), 0, TrackKind::Video, true).unwrap();
    }
}
