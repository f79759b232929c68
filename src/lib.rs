//! Threaded camera acquisition node.
//!
//! The node is built from small active objects: each background job is a
//! [`worker::Worker`] driving a [`worker::Task`] in a loop, with timed
//! sleeps, deadline-based pacing and a wait/signal pair layered over one
//! mutex/condition per worker.
//!
//! # Module Structure
//!
//! - `clock`: monotonic time points and the deadline math workers pace by
//! - `worker`: the active-object engine (start/stop/wait-for-exit,
//!   sleep/sleep_to/wait/signal, boolean initialise/execute hooks)
//! - `frame`: the `Frame` type and the latest-frame hand-off slot
//! - `capture`: capture-device seam, synthetic camera, acquisition task
//! - `publish`: output-port seam, log/memory/MQTT sinks, publishing task
//! - `config`: file + environment configuration for the daemon
//!
//! # Data flow
//!
//! The acquisition worker reads frames from its capture device into a
//! shared [`frame::FrameSlot`]; the publishing worker consumes the latest
//! frame from the slot and forwards it to its sink. Only the most recent
//! frame is ever pending: a fast producer overwrites, a slow consumer
//! skips.

pub mod capture;
pub mod clock;
pub mod config;
pub mod frame;
pub mod publish;
pub mod worker;

pub use capture::{open_device, CaptureDevice, CaptureSettings, CaptureTask, SyntheticCamera};
pub use clock::{now, within, TimePoint};
pub use config::{NodeConfig, SinkKind};
pub use frame::{Frame, FrameSlot};
pub use publish::{
    FramePublisher, LogPublisher, MemoryPublisher, MqttPublisher, MqttSettings, PublishTask,
};
pub use worker::{Task, Worker, WorkerContext};
