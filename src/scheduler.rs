//! Background tick sources: one aligned to wall-clock seconds and an optional
//! fixed-period user timer. Both call into the same locked render path.

use std::{
    sync::mpsc::{self, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::Duration,
};

use chrono::{DateTime, Local, Timelike};

use crate::{error::Result, info};

/// Admits at most one render per wall-clock second.
#[derive(Debug, Default)]
pub struct SecondGate {
    last: Option<i64>,
}

impl SecondGate {
    pub fn admit(&mut self, second: i64) -> bool {
        if self.last == Some(second) {
            return false;
        }
        self.last = Some(second);
        true
    }
}

pub fn millis_until_next_second(now: DateTime<Local>) -> u64 {
    let sub = u64::from(now.nanosecond() % 1_000_000_000) / 1_000_000;
    (1000 - sub).max(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    SecondAligned,
    Every(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

pub struct TickScheduler {
    cadence: Cadence,
    name: &'static str,
    stop_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl TickScheduler {
    pub fn second_aligned() -> Self {
        Self::with_cadence("livepaper-tick", Cadence::SecondAligned)
    }

    pub fn every(period: Duration) -> Self {
        Self::with_cadence("livepaper-timer", Cadence::Every(period.max(Duration::from_millis(1))))
    }

    fn with_cadence(name: &'static str, cadence: Cadence) -> Self {
        Self {
            cadence,
            name,
            stop_tx: None,
            worker: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        if self.worker.is_some() {
            SchedulerState::Running
        } else {
            SchedulerState::Idle
        }
    }

    /// Start firing `render`. Returns `false` if already running.
    pub fn start<F>(&mut self, mut render: F) -> Result<bool>
    where
        F: FnMut(DateTime<Local>) + Send + 'static,
    {
        if self.worker.is_some() {
            return Ok(false);
        }

        let (tx, rx) = mpsc::channel::<()>();
        let cadence = self.cadence;
        let worker = thread::Builder::new().name(self.name.to_string()).spawn(move || {
            let mut gate = SecondGate::default();
            loop {
                let wait = match cadence {
                    Cadence::SecondAligned => Duration::from_millis(millis_until_next_second(Local::now())),
                    Cadence::Every(period) => period,
                };

                // Anything but a timeout means stop was requested or the
                // scheduler was dropped.
                match rx.recv_timeout(wait) {
                    Err(RecvTimeoutError::Timeout) => {}
                    _ => break,
                }

                let now = Local::now();
                if cadence == Cadence::SecondAligned && !gate.admit(now.timestamp()) {
                    continue;
                }
                render(now);
            }
        })?;

        info!("[LIVEPAPER][SCHEDULER] {} started ({:?})", self.name, self.cadence);
        self.stop_tx = Some(tx);
        self.worker = Some(worker);
        Ok(true)
    }

    /// Cancel future ticks and wait for an in-flight one. Safe to call any
    /// number of times, but not from inside the render callback.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
            info!("[LIVEPAPER][SCHEDULER] {} stopped", self.name);
        }
    }
}

impl Drop for TickScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
