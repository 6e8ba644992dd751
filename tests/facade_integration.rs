//! Black-box tests against `KvsApp`: open/add_frame/close never touch the
//! network (only `do_work` does), so these exercise real wiring between the
//! facade, the ring buffer, and the stream assembler without a live endpoint.

use bytes::Bytes;
use kvs_producer_core::facade::{KvsApp, KvsOption, StreamPolicy};
use kvs_producer_core::mkv::{MkvTrackInfo, TrackKind, VideoTrackInfo};
use kvs_producer_core::upload::session::UploadSessionState;

fn video_track() -> MkvTrackInfo {
    MkvTrackInfo {
        kind: TrackKind::Video,
        name: "video".into(),
        codec_id: "V_MPEG4/ISO/AVC".into(),
        codec_private: vec![0x01, 0x64, 0x00, 0x1F],
        video: Some(VideoTrackInfo { width: 1280, height: 720 }),
        audio: None,
    }
}

fn opened_app() -> KvsApp {
    let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "integration-stream");
    app.setoption(KvsOption::AwsAccessKeyId("AKIDEXAMPLE".into())).unwrap();
    app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
    app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
    app.open().unwrap();
    app
}

#[test]
fn opened_session_starts_idle_and_accepts_frames() {
    let mut app = opened_app();
    assert_eq!(app.state(), Some(UploadSessionState::Idle));
    app.add_frame(Bytes::from(vec![1, 2, 3, 4]), 0, TrackKind::Video, true).unwrap();
    app.add_frame(Bytes::from(vec![5, 6]), 33, TrackKind::Video, false).unwrap();
}

#[test]
fn unknown_audio_track_is_rejected_when_no_audio_configured() {
    let mut app = opened_app();
    let err = app.add_frame(Bytes::from(vec![1]), 0, TrackKind::Audio, false).unwrap_err();
    assert!(err.to_string().contains("Audio") || err.to_string().contains("track"));
}

#[test]
fn ring_buffer_policy_silently_absorbs_frames_under_pathological_mem_limit() {
    let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "ring-buffer-stream");
    app.setoption(KvsOption::AwsAccessKeyId("AKIDEXAMPLE".into())).unwrap();
    app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
    app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
    app.setoption(KvsOption::StreamPolicy(StreamPolicy::RingBuffer)).unwrap();
    // A single byte of headroom guarantees every frame self-evicts before
    // the facade can forward it to the stream assembler.
    app.setoption(KvsOption::StreamPolicyRingBufferMemLimit(1)).unwrap();
    app.open().unwrap();

    for i in 0..50u64 {
        app.add_frame(Bytes::from(vec![0xAB; 1024]), i * 33, TrackKind::Video, i == 0).unwrap();
    }
}

#[test]
fn ring_buffer_policy_forwards_frames_under_generous_mem_limit() {
    let mut app = KvsApp::create("kinesisvideo.us-east-1.amazonaws.com", "us-east-1", "kinesisvideo", "ring-buffer-stream");
    app.setoption(KvsOption::AwsAccessKeyId("AKIDEXAMPLE".into())).unwrap();
    app.setoption(KvsOption::AwsSecretAccessKey("secret".into())).unwrap();
    app.setoption(KvsOption::VideoTrackInfo(video_track())).unwrap();
    app.setoption(KvsOption::StreamPolicy(StreamPolicy::RingBuffer)).unwrap();
    app.setoption(KvsOption::StreamPolicyRingBufferMemLimit(16 * 1024 * 1024)).unwrap();
    app.open().unwrap();

    app.add_frame(Bytes::from(vec![0xAB; 1024]), 0, TrackKind::Video, true).unwrap();
}

#[test]
fn close_then_reopen_resets_state_to_idle() {
    let mut app = opened_app();
    app.close();
    app.terminate();
    app.open().unwrap();
    assert_eq!(app.state(), Some(UploadSessionState::Idle));
}
