//! Frame publishing.
//!
//! [`FramePublisher`] is the output-port seam: connect once, then push
//! frames at it. Sinks provided here:
//!
//! - [`MemoryPublisher`]: retains what it saw, for tests and probes
//! - [`LogPublisher`]: periodic log lines, the default sink
//! - [`MqttPublisher`]: MQTT v5, frame metadata as JSON on
//!   `<topic>/meta` and the raw pixel payload on `<topic>/frame`
//!
//! [`PublishTask`] is the publishing worker body: each iteration it
//! consumes the latest frame from the shared slot (if one is pending) and
//! forwards it, paced to its own rate independent of the capture rate.

use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, Connection, Event, MqttOptions};
use serde::Serialize;

use crate::frame::{Frame, FrameSlot};
use crate::worker::{Task, WorkerContext};

/// Opaque output port for frames.
pub trait FramePublisher: Send {
    /// Establish whatever session the sink needs. Default: nothing.
    fn connect(&mut self) -> Result<()> {
        Ok(())
    }

    fn publish(&mut self, frame: &Frame) -> Result<()>;
}

// ----------------------------------------------------------------------------
// In-memory sink
// ----------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    sequences: Vec<u64>,
    last_frame: Option<Frame>,
}

/// Sink that retains published frames in memory.
///
/// Cloning shares the underlying storage, so a test can keep a handle
/// while the publisher itself moves into a worker.
#[derive(Clone, Default)]
pub struct MemoryPublisher {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn published_count(&self) -> usize {
        self.inner.lock().unwrap().sequences.len()
    }

    /// Sequence numbers in publication order.
    pub fn sequences(&self) -> Vec<u64> {
        self.inner.lock().unwrap().sequences.clone()
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.inner.lock().unwrap().last_frame.clone()
    }
}

impl FramePublisher for MemoryPublisher {
    fn publish(&mut self, frame: &Frame) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.sequences.push(frame.sequence);
        inner.last_frame = Some(frame.clone());
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Logging sink
// ----------------------------------------------------------------------------

/// Sink that reports frames to the log instead of a transport. One info
/// line every `summary_every` frames, the rest at debug.
pub struct LogPublisher {
    summary_every: u64,
    published: u64,
}

impl LogPublisher {
    pub fn new(summary_every: u64) -> Self {
        Self {
            summary_every: summary_every.max(1),
            published: 0,
        }
    }
}

impl FramePublisher for LogPublisher {
    fn publish(&mut self, frame: &Frame) -> Result<()> {
        self.published += 1;
        if self.published % self.summary_every == 0 {
            log::info!(
                "published {} frames, latest seq={} {}x{}x{} ({} bytes)",
                self.published,
                frame.sequence,
                frame.width,
                frame.height,
                frame.channels,
                frame.byte_len()
            );
        } else {
            log::debug!("published frame seq={}", frame.sequence);
        }
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// MQTT sink
// ----------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub client_id: String,
    pub host: String,
    pub port: u16,
    /// Base topic; metadata and payload go to `<topic>/meta` and
    /// `<topic>/frame`.
    pub topic: String,
}

/// Frame metadata payload for the `<topic>/meta` channel.
#[derive(Serialize)]
struct FrameMeta {
    sequence: u64,
    width: u32,
    height: u32,
    channels: u8,
    captured_epoch_s: f64,
    payload_bytes: usize,
}

struct MqttRuntime {
    client: Client,
    connection_handle: Option<JoinHandle<()>>,
}

impl MqttRuntime {
    fn new(client: Client, mut connection: Connection) -> Self {
        let handle = std::thread::spawn(move || {
            for event in connection.iter() {
                match event {
                    Ok(Event::Incoming(_)) | Ok(Event::Outgoing(_)) => {}
                    Err(e) => {
                        log::warn!("MQTT connection error: {}", e);
                        break;
                    }
                }
            }
        });

        Self {
            client,
            connection_handle: Some(handle),
        }
    }

    fn disconnect(mut self) {
        if let Err(e) = self.client.disconnect() {
            log::warn!("MQTT disconnect failed: {}", e);
        }
        if let Some(handle) = self.connection_handle.take() {
            let _ = handle.join();
        }
    }
}

/// Sink that forwards frames to an MQTT broker with QoS 1.
pub struct MqttPublisher {
    settings: MqttSettings,
    runtime: Option<MqttRuntime>,
}

impl MqttPublisher {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            runtime: None,
        }
    }
}

impl FramePublisher for MqttPublisher {
    fn connect(&mut self) -> Result<()> {
        let mut options = MqttOptions::new(
            self.settings.client_id.clone(),
            &self.settings.host,
            self.settings.port,
        );
        options.set_keep_alive(Duration::from_secs(60));
        options.set_clean_start(true);

        let (client, connection) = Client::new(options, 10);
        log::info!(
            "connected to MQTT broker {}:{} as {}",
            self.settings.host,
            self.settings.port,
            self.settings.client_id
        );
        self.runtime = Some(MqttRuntime::new(client, connection));
        Ok(())
    }

    fn publish(&mut self, frame: &Frame) -> Result<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| anyhow!("MQTT publisher is not connected"))?;

        let meta = FrameMeta {
            sequence: frame.sequence,
            width: frame.width,
            height: frame.height,
            channels: frame.channels,
            captured_epoch_s: frame.captured_epoch_s,
            payload_bytes: frame.byte_len(),
        };
        runtime.client.publish(
            format!("{}/meta", self.settings.topic),
            QoS::AtLeastOnce,
            false,
            serde_json::to_vec(&meta)?,
        )?;
        runtime.client.publish(
            format!("{}/frame", self.settings.topic),
            QoS::AtLeastOnce,
            false,
            frame.pixels.clone(),
        )?;
        Ok(())
    }
}

impl Drop for MqttPublisher {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.disconnect();
        }
    }
}

// ----------------------------------------------------------------------------
// Publishing worker body
// ----------------------------------------------------------------------------

/// Worker task that drains the shared slot into a sink.
///
/// A failed publish ends the loop (the sink session is gone); restarting
/// the worker reconnects through `initialise`.
pub struct PublishTask {
    sink: Box<dyn FramePublisher>,
    slot: Arc<FrameSlot>,
    publish_interval_ms: u64,
}

impl PublishTask {
    pub fn new(sink: Box<dyn FramePublisher>, slot: Arc<FrameSlot>, target_fps: u32) -> Self {
        let publish_interval_ms = if target_fps == 0 {
            0
        } else {
            u64::from(1000 / target_fps.max(1))
        };
        Self {
            sink,
            slot,
            publish_interval_ms,
        }
    }
}

impl Task for PublishTask {
    fn initialise(&mut self, _ctx: &WorkerContext) -> bool {
        match self.sink.connect() {
            Ok(()) => true,
            Err(e) => {
                log::error!("publish sink connect failed: {}", e);
                false
            }
        }
    }

    fn execute(&mut self, ctx: &WorkerContext) -> bool {
        let mut published = false;
        if let Some(frame) = self.slot.take_fresh() {
            if let Err(e) = self.sink.publish(&frame) {
                log::error!("frame publish failed, stopping publisher: {}", e);
                return false;
            }
            published = true;
        }

        if self.publish_interval_ms > 0 {
            ctx.sleep_to(self.publish_interval_ms);
        } else if !published {
            // Free-running with an empty slot must not busy-loop.
            ctx.sleep(1);
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(sequence: u64) -> Frame {
        Frame {
            pixels: vec![1, 2, 3],
            width: 1,
            height: 1,
            channels: 3,
            captured_epoch_s: 12.5,
            sequence,
        }
    }

    #[test]
    fn memory_publisher_records_in_order() -> Result<()> {
        let mut sink = MemoryPublisher::new();
        let handle = sink.clone();

        sink.publish(&frame(4))?;
        sink.publish(&frame(9))?;

        assert_eq!(handle.published_count(), 2);
        assert_eq!(handle.sequences(), vec![4, 9]);
        assert_eq!(handle.last_frame().map(|f| f.sequence), Some(9));
        Ok(())
    }

    #[test]
    fn log_publisher_accepts_frames() -> Result<()> {
        let mut sink = LogPublisher::new(2);
        for seq in 1..=5 {
            sink.publish(&frame(seq))?;
        }
        assert_eq!(sink.published, 5);
        Ok(())
    }

    #[test]
    fn mqtt_publish_requires_connect() {
        let mut sink = MqttPublisher::new(MqttSettings {
            client_id: "camnode-test".to_string(),
            host: "127.0.0.1".to_string(),
            port: 1883,
            topic: "camnode/cam0".to_string(),
        });
        assert!(sink.publish(&frame(1)).is_err());
    }

    #[test]
    fn frame_meta_serializes_expected_fields() -> Result<()> {
        let meta = FrameMeta {
            sequence: 42,
            width: 640,
            height: 480,
            channels: 3,
            captured_epoch_s: 1000.25,
            payload_bytes: 921_600,
        };
        let json: serde_json::Value = serde_json::from_slice(&serde_json::to_vec(&meta)?)?;
        assert_eq!(json["sequence"], 42);
        assert_eq!(json["width"], 640);
        assert_eq!(json["payload_bytes"], 921_600);
        Ok(())
    }
}
