//! Bridges an RTP/H.264 stream (e.g. from a WebRTC signaling peer) into
//! KVS: a UDP listener thread feeds packets into the reassembler, and the
//! network worker thread drains completed frames into the upload session.

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::net::UdpSocket;
use std::sync::mpsc;
use std::thread;

use anyhow::Result;
use bytes::Bytes;
use clap::Parser;
use kvs_producer_core::config::{Config, CredentialsConfig};
use kvs_producer_core::facade::{KvsApp, KvsOption, WorkOutcome};
use kvs_producer_core::mkv::{MkvTrackInfo, TrackKind, VideoTrackInfo};
use kvs_producer_core::rtp::{RtpPacket, RtpReassembler};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kvs-rtp-bridge")]
#[command(about = "Bridges an incoming RTP/H.264 stream into Kinesis Video Streams")]
#[command(version)]
struct Cli {
    /// Path to the producer configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Local UDP port to listen for RTP packets on.
    #[arg(long, default_value_t = 5000)]
    listen_port: u16,

    /// Pre-built H.264 codec-private-data, hex-encoded (AVCDecoderConfigurationRecord).
    #[arg(long)]
    codec_private_hex: String,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

fn hex_decode(s: &str) -> Result<Vec<u8>> {
    Ok(hex::decode(s)?)
}

/// Receives RTP packets on a UDP socket and pushes them into the
/// reassembler, forwarding each completed access unit to the main thread.
fn rtp_listener_thread(socket: UdpSocket, tx: mpsc::Sender<(Bytes, u64)>) {
    let mut reassembler = RtpReassembler::new();
    let mut buf = [0u8; 2048];
    loop {
        let n = match socket.recv(&mut buf) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "RTP socket recv failed, stopping listener");
                return;
            }
        };
        let packet = match RtpPacket::parse(Bytes::copy_from_slice(&buf[..n])) {
            Ok(p) => p,
            Err(e) => {
                warn!(error = %e, "dropping malformed RTP packet");
                continue;
            }
        };
        if let Err(e) = reassembler.push(&packet) {
            warn!(error = %e, "dropping unparseable RTP payload");
            continue;
        }
        while reassembler.is_frame_available() {
            if let Some(frame) = reassembler.take_frame() {
                if tx.send((frame.data, frame.timestamp_ms)).is_err() {
                    return;
                }
            }
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    let config = Config::load(&cli.config)?;
    let codec_private = hex_decode(&cli.codec_private_hex)?;

    let mut app = KvsApp::create(&config.stream.host, &config.stream.region, &config.stream.service, &config.stream.name);
    match &config.credentials {
        CredentialsConfig::Static { access_key_id, secret_access_key } => {
            app.setoption(KvsOption::AwsAccessKeyId(access_key_id.clone()))?;
            app.setoption(KvsOption::AwsSecretAccessKey(secret_access_key.clone()))?;
        }
        CredentialsConfig::Iot { credential_host, role_alias, thing_name, root_ca_path, cert_path, key_path } => {
            app.setoption(KvsOption::IotCredentialHost(credential_host.clone()))?;
            app.setoption(KvsOption::IotRoleAlias(role_alias.clone()))?;
            app.setoption(KvsOption::IotThingName(thing_name.clone()))?;
            app.setoption(KvsOption::IotX509RootCa(std::fs::read(root_ca_path)?))?;
            app.setoption(KvsOption::IotX509Cert(std::fs::read(cert_path)?))?;
            app.setoption(KvsOption::IotX509Key(std::fs::read(key_path)?))?;
        }
    }
    app.setoption(KvsOption::VideoTrackInfo(MkvTrackInfo {
        kind: TrackKind::Video,
        name: "video".into(),
        codec_id: "V_MPEG4/ISO/AVC".into(),
        codec_private,
        video: Some(VideoTrackInfo { width: config.video_track.width, height: config.video_track.height }),
        audio: None,
    }))?;

    if config.ring_buffer.policy == kvs_producer_core::config::StreamPolicy::RingBuffer {
        app.setoption(KvsOption::StreamPolicy(kvs_producer_core::facade::StreamPolicy::RingBuffer))?;
        app.setoption(KvsOption::StreamPolicyRingBufferMemLimit(config.ring_buffer.mem_limit_bytes))?;
    }

    app.open()?;

    let socket = UdpSocket::bind(("0.0.0.0", cli.listen_port))?;
    info!(port = cli.listen_port, "listening for RTP packets");

    let (tx, rx) = mpsc::channel::<(Bytes, u64)>();
    thread::spawn(move || rtp_listener_thread(socket, tx));

    let mut key_frame_seen = false;
    loop {
        while let Ok((data, ts_ms)) = rx.try_recv() {
            let nal_type = data.get(4).map(|b| b & 0x1F).unwrap_or(0);
            let key_frame = nal_type == 5;
            key_frame_seen |= key_frame;
            if !key_frame_seen {
                continue; // wait for the first IDR, like flush_to_next_cluster on the wire side.
            }
            if let Err(e) = app.add_frame(data, ts_ms, TrackKind::Video, key_frame) {
                error!(error = %e, "failed to enqueue reassembled frame");
            }
        }

        match app.do_work() {
            Ok(WorkOutcome::Continue) => {}
            Ok(WorkOutcome::Restart) => {
                info!("upload session restarting");
                app.close();
                app.open()?;
            }
            Err(e) => {
                error!(error = %e, "fatal upload error, shutting down");
                break;
            }
        }
        while let Some(ack) = app.read_fragment_ack() {
            info!(event = ?ack.event_type, timecode = ?ack.fragment_timecode, "fragment ack");
        }
    }

    app.terminate();
    Ok(())
}
