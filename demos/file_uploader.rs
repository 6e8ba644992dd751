//! Reads an Annex-B H.264 elementary stream from disk and uploads it to
//! KVS through the `KvsApp` facade, pacing frames at a fixed frame rate.

#[cfg(feature = "jemalloc")]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use kvs_producer_core::config::{Config, CredentialsConfig};
use kvs_producer_core::facade::{KvsApp, KvsOption, WorkOutcome};
use kvs_producer_core::mkv::annexb::{find_sps_pps_avcc, split_annexb_nals};
use kvs_producer_core::mkv::codec_private::build_h264_codec_private_data;
use kvs_producer_core::mkv::{MkvTrackInfo, TrackKind, VideoTrackInfo};
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "kvs-file-uploader")]
#[command(about = "Uploads an Annex-B H.264 file to Kinesis Video Streams")]
#[command(version)]
struct Cli {
    /// Path to the producer configuration file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Path to the Annex-B H.264 elementary stream to upload.
    #[arg(long)]
    h264: String,

    /// Frame rate used to pace synthesized timestamps.
    #[arg(long, default_value_t = 25)]
    fps: u32,

    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,
}

/// A single access unit: the non-VCL NALs that precede it (SPS/PPS/SEI/AUD)
/// plus exactly one VCL NAL, all still Annex-B delimited.
struct AccessUnit {
    avcc: Vec<u8>,
    key_frame: bool,
}

/// Groups Annex-B NALs into access units, closing each unit at the next VCL
/// NAL (type 1 non-IDR or type 5 IDR), matching how most H.264 elementary
/// streams interleave parameter sets ahead of their first slice.
fn group_access_units(buf: &[u8]) -> Result<Vec<AccessUnit>> {
    let ranges = split_annexb_nals(buf)?;
    let mut units = Vec::new();
    let mut pending: Vec<u8> = Vec::new();

    for range in ranges {
        let nal = &buf[range.start..range.end];
        let nal_type = nal[0] & 0x1F;
        let len = (nal.len() as u32).to_be_bytes();
        pending.extend_from_slice(&len);
        pending.extend_from_slice(nal);

        if nal_type == 1 || nal_type == 5 {
            units.push(AccessUnit { avcc: std::mem::take(&mut pending), key_frame: nal_type == 5 });
        }
    }
    Ok(units)
}

fn video_track_info(h264_bytes: &[u8], width: u16, height: u16) -> Result<MkvTrackInfo> {
    let avcc = kvs_producer_core::mkv::annexb::annexb_to_avcc(h264_bytes)?;
    let (sps, pps) = find_sps_pps_avcc(&avcc).context("file contains no SPS/PPS NAL")?;
    let codec_private = build_h264_codec_private_data(&sps, &pps)?;
    Ok(MkvTrackInfo {
        kind: TrackKind::Video,
        name: "video".into(),
        codec_id: "V_MPEG4/ISO/AVC".into(),
        codec_private,
        video: Some(VideoTrackInfo { width, height }),
        audio: None,
    })
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    fmt().with_env_filter(filter).with_target(false).init();

    info!(config_path = %cli.config, "loading configuration");
    let config = Config::load(&cli.config)?;

    let h264_bytes = std::fs::read(&cli.h264).with_context(|| format!("reading {}", cli.h264))?;
    let units = group_access_units(&h264_bytes)?;
    info!(frames = units.len(), "parsed access units from input file");

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

    let video = video_track_info(&h264_bytes, config.video_track.width, config.video_track.height)?;
    app.setoption(KvsOption::VideoTrackInfo(video))?;

    if config.ring_buffer.policy == kvs_producer_core::config::StreamPolicy::RingBuffer {
        app.setoption(KvsOption::StreamPolicy(kvs_producer_core::facade::StreamPolicy::RingBuffer))?;
        app.setoption(KvsOption::StreamPolicyRingBufferMemLimit(config.ring_buffer.mem_limit_bytes))?;
    }

    app.open()?;

    let frame_interval_ms = 1000 / cli.fps.max(1) as u64;

    for (i, unit) in units.iter().enumerate() {
        let ts_ms = i as u64 * frame_interval_ms;
        if let Err(e) = app.add_frame(Bytes::from(unit.avcc.clone()), ts_ms, TrackKind::Video, unit.key_frame) {
            error!(error = %e, frame = i, "failed to enqueue frame");
        }
    }

    info!("starting upload loop, press Ctrl+C to stop");
    loop {
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
