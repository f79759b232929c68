use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::capture::CaptureSettings;
use crate::publish::MqttSettings;

const DEFAULT_SOURCE: &str = "synthetic://bench";
const DEFAULT_WIDTH: u32 = 640;
const DEFAULT_HEIGHT: u32 = 480;
const DEFAULT_CHANNELS: u8 = 3;
const DEFAULT_CAPTURE_FPS: u32 = 10;
const DEFAULT_PUBLISH_FPS: u32 = 10;
const DEFAULT_SINK: &str = "log";
const DEFAULT_LOG_EVERY: u64 = 100;
const DEFAULT_MQTT_HOST: &str = "127.0.0.1";
const DEFAULT_MQTT_PORT: u16 = 1883;
const DEFAULT_MQTT_CLIENT_ID: &str = "camnode";
const DEFAULT_MQTT_TOPIC: &str = "camnode/cam0";

#[derive(Debug, Deserialize, Default)]
struct NodeConfigFile {
    camera: Option<CameraConfigFile>,
    publish: Option<PublishConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    source: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    channels: Option<u8>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct PublishConfigFile {
    sink: Option<String>,
    target_fps: Option<u32>,
    log_every: Option<u64>,
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    host: Option<String>,
    port: Option<u16>,
    client_id: Option<String>,
    topic: Option<String>,
}

/// Which output port the publish worker drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SinkKind {
    Log,
    Mqtt,
}

impl SinkKind {
    fn parse(value: &str) -> Result<Self> {
        match value {
            "log" => Ok(SinkKind::Log),
            "mqtt" => Ok(SinkKind::Mqtt),
            other => Err(anyhow!("unknown sink kind '{}' (expected log or mqtt)", other)),
        }
    }
}

/// Resolved node configuration.
///
/// Loaded from an optional JSON file named by `CAMNODE_CONFIG`, then
/// overridden by environment variables, then validated.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    pub camera: CaptureSettings,
    pub sink: SinkKind,
    pub publish_fps: u32,
    pub log_every: u64,
    pub mqtt: MqttSettings,
}

impl NodeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAMNODE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: NodeConfigFile) -> Result<Self> {
        let camera = CaptureSettings {
            source: file
                .camera
                .as_ref()
                .and_then(|camera| camera.source.clone())
                .unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
            width: file
                .camera
                .as_ref()
                .and_then(|camera| camera.width)
                .unwrap_or(DEFAULT_WIDTH),
            height: file
                .camera
                .as_ref()
                .and_then(|camera| camera.height)
                .unwrap_or(DEFAULT_HEIGHT),
            channels: file
                .camera
                .as_ref()
                .and_then(|camera| camera.channels)
                .unwrap_or(DEFAULT_CHANNELS),
            target_fps: file
                .camera
                .as_ref()
                .and_then(|camera| camera.target_fps)
                .unwrap_or(DEFAULT_CAPTURE_FPS),
        };
        let sink = SinkKind::parse(
            file.publish
                .as_ref()
                .and_then(|publish| publish.sink.as_deref())
                .unwrap_or(DEFAULT_SINK),
        )?;
        let publish_fps = file
            .publish
            .as_ref()
            .and_then(|publish| publish.target_fps)
            .unwrap_or(DEFAULT_PUBLISH_FPS);
        let log_every = file
            .publish
            .as_ref()
            .and_then(|publish| publish.log_every)
            .unwrap_or(DEFAULT_LOG_EVERY);
        let mqtt_file = file.publish.and_then(|publish| publish.mqtt);
        let mqtt = MqttSettings {
            host: mqtt_file
                .as_ref()
                .and_then(|mqtt| mqtt.host.clone())
                .unwrap_or_else(|| DEFAULT_MQTT_HOST.to_string()),
            port: mqtt_file
                .as_ref()
                .and_then(|mqtt| mqtt.port)
                .unwrap_or(DEFAULT_MQTT_PORT),
            client_id: mqtt_file
                .as_ref()
                .and_then(|mqtt| mqtt.client_id.clone())
                .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
            topic: mqtt_file
                .and_then(|mqtt| mqtt.topic)
                .unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
        };
        Ok(Self {
            camera,
            sink,
            publish_fps,
            log_every,
            mqtt,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(source) = std::env::var("CAMNODE_SOURCE") {
            if !source.trim().is_empty() {
                self.camera.source = source;
            }
        }
        if let Ok(fps) = std::env::var("CAMNODE_CAPTURE_FPS") {
            self.camera.target_fps = fps
                .parse()
                .map_err(|_| anyhow!("CAMNODE_CAPTURE_FPS must be an integer"))?;
        }
        if let Ok(fps) = std::env::var("CAMNODE_PUBLISH_FPS") {
            self.publish_fps = fps
                .parse()
                .map_err(|_| anyhow!("CAMNODE_PUBLISH_FPS must be an integer"))?;
        }
        if let Ok(sink) = std::env::var("CAMNODE_SINK") {
            if !sink.trim().is_empty() {
                self.sink = SinkKind::parse(&sink)?;
            }
        }
        if let Ok(addr) = std::env::var("CAMNODE_MQTT_ADDR") {
            if !addr.trim().is_empty() {
                let (host, port) = split_host_port(&addr)?;
                self.mqtt.host = host;
                self.mqtt.port = port;
            }
        }
        if let Ok(topic) = std::env::var("CAMNODE_TOPIC") {
            if !topic.trim().is_empty() {
                self.mqtt.topic = topic;
            }
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 || self.camera.channels == 0 {
            return Err(anyhow!("camera dimensions must be non-zero"));
        }
        if self.camera.target_fps == 0 {
            return Err(anyhow!("camera target_fps must be at least 1"));
        }
        if self.publish_fps == 0 {
            return Err(anyhow!("publish target_fps must be at least 1"));
        }
        if !self.camera.source.contains("://") {
            return Err(anyhow!(
                "camera source '{}' must carry a scheme, e.g. synthetic://bench",
                self.camera.source
            ));
        }
        self.log_every = self.log_every.max(1);
        if self.sink == SinkKind::Mqtt {
            if self.mqtt.host.trim().is_empty() {
                return Err(anyhow!("mqtt host must not be empty"));
            }
            if self.mqtt.port == 0 {
                return Err(anyhow!("mqtt port must be non-zero"));
            }
            if self.mqtt.topic.trim().is_empty() {
                return Err(anyhow!("mqtt topic must not be empty"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<NodeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_host_port(addr: &str) -> Result<(String, u16)> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("CAMNODE_MQTT_ADDR must look like host:port"))?;
    if host.is_empty() {
        return Err(anyhow!("CAMNODE_MQTT_ADDR must look like host:port"));
    }
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("CAMNODE_MQTT_ADDR port must be an integer"))?;
    Ok((host.to_string(), port))
}
