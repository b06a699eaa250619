// src/core/generator.rs

//! Isolated IPv4 enumerator.
//!
//! The generator runs on its own OS thread so that its production rate never
//! stalls the async scheduler. Addresses flow out over a bounded channel;
//! `{pause: bool}` control messages flow back in over a second channel.

use std::net::Ipv4Addr;
use std::sync::mpsc as std_mpsc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::core::models::Ipv4Range;
use crate::error::GeneratorError;

/// Start message handed to the worker thread.
#[derive(Debug, Clone, Copy)]
pub struct GeneratorStart {
    pub range: Ipv4Range,
    pub verbose: bool,
}

/// Inbound control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorControl {
    pub pause: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct GeneratorConfig {
    /// Delay between two emissions; bounds memory when the consumer is slow.
    pub emit_delay: Duration,
    /// How long a paused generator sleeps between checks for a resume.
    pub pause_poll: Duration,
    /// Addresses buffered between the thread and the consumer. Keep it well
    /// below the generation watermark, or the buffer outgrows the throttle.
    pub channel_capacity: usize,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            emit_delay: Duration::from_millis(1),
            pause_poll: Duration::from_secs(1),
            channel_capacity: 64,
        }
    }
}

/// Consumer-side handle of a running generator.
pub struct TargetGenerator {
    addresses: mpsc::Receiver<Ipv4Addr>,
    control: std_mpsc::Sender<GeneratorControl>,
    worker: Option<JoinHandle<()>>,
}

impl TargetGenerator {
    /// Spawns the worker thread and starts emitting `start.range` in ascending order.
    pub fn spawn(start: GeneratorStart, config: GeneratorConfig) -> Result<Self, GeneratorError> {
        Self::spawn_worker(config, move |addresses, control| {
            run_worker(start, config, addresses, control)
        })
    }

    /// Runs `worker` on the generator thread in place of the range enumerator.
    pub(crate) fn spawn_worker<W>(config: GeneratorConfig, worker: W) -> Result<Self, GeneratorError>
    where
        W: FnOnce(mpsc::Sender<Ipv4Addr>, std_mpsc::Receiver<GeneratorControl>) + Send + 'static,
    {
        let (address_tx, addresses) = mpsc::channel(config.channel_capacity.max(1));
        let (control, control_rx) = std_mpsc::channel();

        let worker = thread::Builder::new()
            .name("target-generator".into())
            .spawn(move || worker(address_tx, control_rx))
            .map_err(GeneratorError::Spawn)?;

        Ok(Self {
            addresses,
            control,
            worker: Some(worker),
        })
    }

    /// Next address, or `None` once the range is exhausted (or the worker died).
    pub async fn next(&mut self) -> Option<Ipv4Addr> {
        self.addresses.recv().await
    }

    pub fn set_paused(&self, pause: bool) -> Result<(), GeneratorError> {
        self.control
            .send(GeneratorControl { pause })
            .map_err(|_| GeneratorError::ControlClosed)
    }

    /// Waits for the worker thread and reports whether it ended cleanly.
    ///
    /// Call once [`next`](Self::next) returned `None`; a crashed worker also
    /// closes the channel, and this is where the crash surfaces.
    pub async fn join(mut self) -> Result<(), GeneratorError> {
        let Some(worker) = self.worker.take() else {
            return Ok(());
        };
        let joined = tokio::task::spawn_blocking(move || worker.join())
            .await
            .map_err(|e| GeneratorError::Crashed(e.to_string()))?;
        joined.map_err(|panic| GeneratorError::Crashed(panic_message(panic.as_ref())))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run_worker(
    start: GeneratorStart,
    config: GeneratorConfig,
    addresses: mpsc::Sender<Ipv4Addr>,
    control: std_mpsc::Receiver<GeneratorControl>,
) {
    let mut paused = false;
    debug!(from = %start.range.from, to = %start.range.to, "Generator started.");

    for addr in start.range.iter() {
        // Apply whatever control messages arrived since the last emission.
        loop {
            match control.try_recv() {
                Ok(msg) => {
                    if start.verbose {
                        info!(pause = msg.pause, "Throttling information received.");
                    }
                    paused = msg.pause;
                }
                Err(std_mpsc::TryRecvError::Empty) => break,
                Err(std_mpsc::TryRecvError::Disconnected) => return,
            }
        }

        while paused {
            if start.verbose {
                info!("Generation paused. Waiting for a resume event...");
            }
            match control.recv_timeout(config.pause_poll) {
                Ok(msg) => paused = msg.pause,
                Err(std_mpsc::RecvTimeoutError::Timeout) => {}
                Err(std_mpsc::RecvTimeoutError::Disconnected) => return,
            }
        }

        if !config.emit_delay.is_zero() {
            thread::sleep(config.emit_delay);
        }
        if addresses.blocking_send(addr).is_err() {
            debug!("Consumer dropped, stopping generator.");
            return;
        }
    }
    debug!("Generator exhausted its range.");
}
