//! IoT-scale producer client core for Amazon Kinesis Video Streams.
//!
//! Ingests H.264/AAC/G.711 frames and muxes them into a continuous MKV
//! byte stream, uploaded over a SigV4-signed chunked HTTPS `PUT_MEDIA`
//! request. Provides the MKV generator, a bounded frame ring buffer, the
//! stream assembler and upload session state machine, an RTP reassembler
//! for the WebRTC bridge path, and the `KvsApp` facade tying them together.
//!
//! # Example
//!
//! ```no_run
//! use kvs_producer_core::facade::{KvsApp, KvsOption};
//! use kvs_producer_core::mkv::{MkvTrackInfo, TrackKind, VideoTrackInfo};
//!
//! let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "my-stream");
//! app.setoption(KvsOption::AwsAccessKeyId("AKID".into())).unwrap();
//! app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
//! app.setoption(KvsOption::VideoTrackInfo(MkvTrackInfo {
//!     kind: TrackKind::Video,
//!     name: "video".into(),
//!     codec_id: "V_MPEG4/ISO/AVC".into(),
//!     codec_private: vec![0x01, 0x64, 0x00, 0x1F],
//!     video: Some(VideoTrackInfo { width: 1920, height: 1080 }),
//!     audio: None,
//! })).unwrap();
//! app.open().unwrap();
//! ```

pub mod config;
pub mod error;
pub mod facade;
pub mod mkv;
pub mod net;
pub mod port;
pub mod ring_buffer;
pub mod rtp;
pub mod stream;
pub mod upload;
pub mod vint;

pub use error::{KvsError, KvsResult};
pub use facade::{KvsApp, KvsOption, WorkOutcome};
