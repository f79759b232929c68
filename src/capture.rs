//! Frame acquisition.
//!
//! [`CaptureDevice`] is the seam to the physical video source: open it,
//! read frames, close it. The node treats the device as opaque; the only
//! in-tree implementation is [`SyntheticCamera`], which generates a
//! deterministic test pattern with simulated sensor noise and occasional
//! scene changes so the pipeline runs with no hardware attached. Real
//! backends slot in behind the same trait.
//!
//! [`CaptureTask`] is the acquisition worker body: it opens the device
//! during initialise, then reads one frame per iteration into the shared
//! [`FrameSlot`] and paces itself to the configured frame rate.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{anyhow, Result};

use crate::frame::{Frame, FrameSlot};
use crate::worker::{Task, WorkerContext};

/// Configuration for a capture source.
#[derive(Clone, Debug)]
pub struct CaptureSettings {
    /// Source locator, e.g. "synthetic://bench".
    pub source: String,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    /// Target frame rate. Zero means free-running.
    pub target_fps: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            source: "synthetic://bench".to_string(),
            width: 640,
            height: 480,
            channels: 3,
            target_fps: 10,
        }
    }
}

/// Opaque video source.
pub trait CaptureDevice: Send {
    fn open(&mut self) -> Result<()>;
    fn is_open(&self) -> bool;
    fn read_frame(&mut self) -> Result<Frame>;
    fn close(&mut self);
}

/// Build a device for the configured source scheme.
pub fn open_device(settings: &CaptureSettings) -> Result<Box<dyn CaptureDevice>> {
    if settings.source.starts_with("synthetic://") {
        Ok(Box::new(SyntheticCamera::new(settings.clone())))
    } else {
        Err(anyhow!("unsupported capture source '{}'", settings.source))
    }
}

// ----------------------------------------------------------------------------
// Synthetic camera
// ----------------------------------------------------------------------------

/// Hardware-free capture device.
///
/// Produces a position/frame-count gradient, perturbed by one random noise
/// byte per frame, with the whole "scene" shifting every 50 frames to
/// imitate something happening in front of the lens.
pub struct SyntheticCamera {
    settings: CaptureSettings,
    open: bool,
    frame_count: u64,
    scene_state: u8,
}

impl SyntheticCamera {
    pub fn new(settings: CaptureSettings) -> Self {
        Self {
            settings,
            open: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    fn generate_pixels(&mut self) -> Vec<u8> {
        let pixel_count = self.settings.width as usize
            * self.settings.height as usize
            * usize::from(self.settings.channels);

        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let noise: u8 = rand::random();

        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            let base = (i as u64 + self.frame_count + u64::from(self.scene_state)) % 256;
            *pixel = (base as u8).wrapping_add(noise & 0x07);
        }
        pixels
    }
}

impl CaptureDevice for SyntheticCamera {
    fn open(&mut self) -> Result<()> {
        self.open = true;
        log::info!("capture source {} opened (synthetic)", self.settings.source);
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }

    fn read_frame(&mut self) -> Result<Frame> {
        if !self.open {
            return Err(anyhow!("capture source {} is not open", self.settings.source));
        }
        self.frame_count += 1;
        let captured_epoch_s = SystemTime::now()
            .duration_since(UNIX_EPOCH)?
            .as_secs_f64();
        Ok(Frame {
            pixels: self.generate_pixels(),
            width: self.settings.width,
            height: self.settings.height,
            channels: self.settings.channels,
            captured_epoch_s,
            sequence: self.frame_count,
        })
    }

    fn close(&mut self) {
        self.open = false;
    }
}

// ----------------------------------------------------------------------------
// Acquisition worker body
// ----------------------------------------------------------------------------

/// Worker task that pulls frames from a device into the shared slot.
///
/// A failed read ends the loop: a disconnected device is the designed
/// self-termination path, and the owner sees it as "not alive, no abort
/// requested".
pub struct CaptureTask {
    device: Box<dyn CaptureDevice>,
    slot: Arc<FrameSlot>,
    frame_interval_ms: u64,
}

impl CaptureTask {
    pub fn new(device: Box<dyn CaptureDevice>, slot: Arc<FrameSlot>, target_fps: u32) -> Self {
        let frame_interval_ms = if target_fps == 0 {
            0
        } else {
            u64::from(1000 / target_fps.max(1))
        };
        Self {
            device,
            slot,
            frame_interval_ms,
        }
    }
}

impl Task for CaptureTask {
    fn initialise(&mut self, _ctx: &WorkerContext) -> bool {
        if self.device.is_open() {
            return true;
        }
        match self.device.open() {
            Ok(()) => true,
            Err(e) => {
                log::error!("capture device open failed: {}", e);
                false
            }
        }
    }

    fn execute(&mut self, ctx: &WorkerContext) -> bool {
        let frame = match self.device.read_frame() {
            Ok(frame) => frame,
            Err(e) => {
                log::error!("frame read failed, stopping acquisition: {}", e);
                return false;
            }
        };
        self.slot.store(frame);

        if self.frame_interval_ms > 0 {
            ctx.sleep_to(self.frame_interval_ms);
        }
        true
    }
}

impl Drop for CaptureTask {
    fn drop(&mut self) {
        self.device.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bench_settings() -> CaptureSettings {
        CaptureSettings {
            source: "synthetic://test".to_string(),
            width: 8,
            height: 4,
            channels: 3,
            target_fps: 10,
        }
    }

    #[test]
    fn synthetic_camera_produces_sized_frames() -> Result<()> {
        let mut camera = SyntheticCamera::new(bench_settings());
        camera.open()?;

        let frame = camera.read_frame()?;
        assert_eq!(frame.width, 8);
        assert_eq!(frame.height, 4);
        assert_eq!(frame.byte_len(), frame.expected_len());
        Ok(())
    }

    #[test]
    fn synthetic_camera_sequences_increase() -> Result<()> {
        let mut camera = SyntheticCamera::new(bench_settings());
        camera.open()?;

        let first = camera.read_frame()?;
        let second = camera.read_frame()?;
        assert_eq!(first.sequence, 1);
        assert_eq!(second.sequence, 2);
        Ok(())
    }

    #[test]
    fn read_before_open_is_rejected() {
        let mut camera = SyntheticCamera::new(bench_settings());
        assert!(camera.read_frame().is_err());

        camera.open().unwrap();
        assert!(camera.is_open());
        camera.close();
        assert!(!camera.is_open());
        assert!(camera.read_frame().is_err());
    }

    #[test]
    fn unknown_source_scheme_is_rejected() {
        let settings = CaptureSettings {
            source: "rtsp://nope".to_string(),
            ..bench_settings()
        };
        assert!(open_device(&settings).is_err());
        assert!(open_device(&bench_settings()).is_ok());
    }
}
