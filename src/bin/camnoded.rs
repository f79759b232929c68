//! camnoded - camera node daemon
//!
//! This daemon:
//! 1. Opens the configured capture source
//! 2. Runs an acquisition worker filling the shared latest-frame slot
//! 3. Runs a publishing worker forwarding frames to the configured sink
//! 4. Logs pipeline health periodically from the main thread
//! 5. Stops both workers cleanly on Ctrl-C

use anyhow::Result;
use std::sync::{mpsc, Arc};
use std::time::Duration;

use camnode::{
    capture::{open_device, CaptureTask},
    config::{NodeConfig, SinkKind},
    frame::FrameSlot,
    publish::{FramePublisher, LogPublisher, MqttPublisher, PublishTask},
    worker::Worker,
};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cfg = NodeConfig::load()?;
    log::info!("camnoded {} starting", env!("CARGO_PKG_VERSION"));
    log::info!(
        "capture: {} at {} fps, {}x{}x{}",
        cfg.camera.source,
        cfg.camera.target_fps,
        cfg.camera.width,
        cfg.camera.height,
        cfg.camera.channels
    );
    log::info!("publish: {:?} sink at {} fps", cfg.sink, cfg.publish_fps);

    let slot = Arc::new(FrameSlot::new());

    let device = open_device(&cfg.camera)?;
    let mut acquisition = Worker::new(
        "acquisition",
        CaptureTask::new(device, slot.clone(), cfg.camera.target_fps),
    );

    let sink: Box<dyn FramePublisher> = match cfg.sink {
        SinkKind::Log => Box::new(LogPublisher::new(cfg.log_every)),
        SinkKind::Mqtt => Box::new(MqttPublisher::new(cfg.mqtt.clone())),
    };
    let mut publisher = Worker::new(
        "publish",
        PublishTask::new(sink, slot.clone(), cfg.publish_fps),
    );

    acquisition.start()?;
    publisher.start()?;

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .expect("error setting Ctrl-C handler");

    log::info!("camnoded running (Ctrl-C to stop)");
    loop {
        match rx.recv_timeout(HEALTH_LOG_INTERVAL) {
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                log::info!("shutdown signal received");
                break;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {
                log::info!(
                    "health: acquisition alive={} publish alive={} latest_seq={:?}",
                    acquisition.is_alive(),
                    publisher.is_alive(),
                    slot.latest_sequence()
                );
                // A worker that is dead without a stop request ended itself
                // (lost device, dead sink). The node is useless with half a
                // pipeline, so shut down.
                let acquisition_died = !acquisition.is_alive() && !acquisition.is_abort();
                let publisher_died = !publisher.is_alive() && !publisher.is_abort();
                if acquisition_died || publisher_died {
                    log::warn!(
                        "worker stopped on its own (acquisition={} publish={}), exiting",
                        acquisition_died,
                        publisher_died
                    );
                    break;
                }
            }
        }
    }

    // Producer first so the publisher can drain the final frame.
    acquisition.stop(true);
    publisher.stop(true);
    log::info!("camnoded stopped");
    Ok(())
}
