//! Configuration for the KVS producer: stream identity, credential source,
//! track descriptions, ring-buffer policy, and transport timeouts.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete producer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub credentials: CredentialsConfig,
    pub video_track: VideoTrackConfig,
    #[serde(default)]
    pub audio_track: Option<AudioTrackConfig>,
    #[serde(default)]
    pub ring_buffer: RingBufferConfig,
    #[serde(default)]
    pub net: NetConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    pub name: String,
    #[serde(default = "default_region")]
    pub region: String,
    #[serde(default = "default_service")]
    pub service: String,
    pub host: String,
    #[serde(default = "default_data_retention_hours")]
    pub data_retention_hours: u32,
}

fn default_region() -> String {
    "us-east-1".to_string()
}
fn default_service() -> String {
    "kinesisvideo".to_string()
}
fn default_data_retention_hours() -> u32 {
    2
}

/// Where the session's AWS credentials come from, mirroring the facade's
/// `AWS_ACCESS_KEY_ID`/`IOT_*` `setoption` keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialsConfig {
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    Iot {
        credential_host: String,
        role_alias: String,
        thing_name: String,
        root_ca_path: String,
        cert_path: String,
        key_path: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTrackConfig {
    pub width: u16,
    pub height: u16,
    #[serde(default = "default_video_codec_id")]
    pub codec_id: String,
}

fn default_video_codec_id() -> String {
    "V_MPEG4/ISO/AVC".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioTrackConfig {
    pub sample_rate: u32,
    #[serde(default = "default_channels")]
    pub channels: u16,
    #[serde(default = "default_bit_depth")]
    pub bit_depth: u16,
    #[serde(default = "default_audio_codec_id")]
    pub codec_id: String,
}

fn default_channels() -> u16 {
    2
}
fn default_bit_depth() -> u16 {
    16
}
fn default_audio_codec_id() -> String {
    "A_AAC".to_string()
}

/// Maps to the facade's `STREAM_POLICY` / `STREAM_POLICY_RING_BUFFER_MEM_LIMIT`
/// option pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamPolicy {
    None,
    RingBuffer,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        StreamPolicy::None
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RingBufferConfig {
    #[serde(default)]
    pub policy: StreamPolicy,
    #[serde(default = "default_ring_buffer_mem_limit")]
    pub mem_limit_bytes: usize,
    #[serde(default = "default_ring_buffer_capacity")]
    pub capacity: usize,
}

fn default_ring_buffer_mem_limit() -> usize {
    16 * 1024 * 1024
}
fn default_ring_buffer_capacity() -> usize {
    256
}

impl Default for RingBufferConfig {
    fn default() -> Self {
        RingBufferConfig {
            policy: StreamPolicy::default(),
            mem_limit_bytes: default_ring_buffer_mem_limit(),
            capacity: default_ring_buffer_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetConfig {
    #[serde(default = "default_timeout_ms")]
    pub recv_timeout_ms: u64,
    #[serde(default = "default_timeout_ms")]
    pub send_timeout_ms: u64,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl Default for NetConfig {
    fn default() -> Self {
        NetConfig { recv_timeout_ms: default_timeout_ms(), send_timeout_ms: default_timeout_ms() }
    }
}

impl Config {
    /// Loads configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Loads configuration from a TOML string.
    pub fn from_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Saves configuration to a TOML file.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.stream.name.is_empty() {
            return Err(ConfigError::Invalid("stream.name must not be empty".into()));
        }
        if self.stream.host.is_empty() {
            return Err(ConfigError::Invalid("stream.host must not be empty".into()));
        }
        if self.video_track.width == 0 || self.video_track.height == 0 {
            return Err(ConfigError::Invalid("video_track width/height must be > 0".into()));
        }
        if let Some(audio) = &self.audio_track {
            if audio.sample_rate == 0 {
                return Err(ConfigError::Invalid("audio_track.sample_rate must be > 0".into()));
            }
        }
        if self.ring_buffer.policy == StreamPolicy::RingBuffer && self.ring_buffer.mem_limit_bytes == 0 {
            return Err(ConfigError::Invalid(
                "ring_buffer.mem_limit_bytes must be > 0 when policy = ring_buffer".into(),
            ));
        }
        if self.ring_buffer.capacity == 0 {
            return Err(ConfigError::Invalid("ring_buffer.capacity must be > 0".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_static_config_parses() {
        let toml = r#"
[stream]
name = "my-stream"
host = "kinesisvideo.us-east-1.amazonaws.com"

[credentials]
type = "static"
access_key_id = "AKID"
secret_access_key = "secret"

[video_track]
width = 1920
height = 1080
        "#;
        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.stream.region, "us-east-1");
        assert_eq!(config.ring_buffer.policy, StreamPolicy::None);
        assert!(config.audio_track.is_none());
    }

    #[test]
    fn iot_credentials_and_ring_buffer_policy_parse() {
        let toml = r#"
[stream]
name = "my-stream"
host = "kinesisvideo.us-east-1.amazonaws.com"

[credentials]
type = "iot"
credential_host = "credentials.iot.us-east-1.amazonaws.com"
role_alias = "KvsCameraIoTRoleAlias"
thing_name = "my-camera"
root_ca_path = "/etc/kvs/root-ca.pem"
cert_path = "/etc/kvs/cert.pem"
key_path = "/etc/kvs/key.pem"

[video_track]
width = 640
height = 480

[audio_track]
sample_rate = 48000

[ring_buffer]
policy = "ring_buffer"
mem_limit_bytes = 1048576
        "#;
        let config = Config::from_str(toml).unwrap();
        assert!(matches!(config.credentials, CredentialsConfig::Iot { .. }));
        assert_eq!(config.ring_buffer.policy, StreamPolicy::RingBuffer);
        assert_eq!(config.audio_track.unwrap().channels, 2);
    }

    #[test]
    fn empty_stream_name_is_rejected() {
        let toml = r#"
[stream]
name = ""
host = "h"

[credentials]
type = "static"
access_key_id = "a"
secret_access_key = "b"

[video_track]
width = 640
height = 480
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn ring_buffer_policy_without_mem_limit_is_rejected() {
        let toml = r#"
[stream]
name = "s"
host = "h"

[credentials]
type = "static"
access_key_id = "a"
secret_access_key = "b"

[video_track]
width = 640
height = 480

[ring_buffer]
policy = "ring_buffer"
mem_limit_bytes = 0
        "#;
        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn roundtrip_preserves_fields() {
        let toml = r#"
[stream]
name = "s"
host = "h"

[credentials]
type = "static"
access_key_id = "a"
secret_access_key = "b"

[video_track]
width = 640
height = 480
        "#;
        let config = Config::from_str(toml).unwrap();
        let serialized = toml::to_string(&config).unwrap();
        let reparsed = Config::from_str(&serialized).unwrap();
        assert_eq!(reparsed.stream.name, config.stream.name);
    }
}
