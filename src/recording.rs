//! Capturing interactive play and replaying it in the background.

use std::collections::{BTreeMap, BTreeSet};
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, info, warn};

use crate::error::SynthError;
use crate::events::{NoteKind, RecordedEvent, transpose};
use crate::synth::SynthHandle;

/// Collects key presses while active. Timestamps are wall-clock seconds.
#[derive(Debug, Default)]
pub struct Recorder {
    active: bool,
    events: Vec<RecordedEvent>,
    /// Presses not yet released, per note. The same note can be down on
    /// the computer keyboard and on a controller at once.
    held: BTreeMap<u8, usize>,
}

/// A finished take. Every `On` is followed by a matching `Off`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Recording {
    events: Vec<RecordedEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayStep {
    /// Seconds to wait after the previous step.
    pub wait: f64,
    pub kind: NoteKind,
    pub note: u8,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begins a new take, discarding anything captured so far.
    pub fn start(&mut self, now: f64) {
        self.active = true;
        self.events.clear();
        self.held.clear();
        info!(at = now, "recording started");
    }

    pub fn note_on(&mut self, note: u8, now: f64) {
        if !self.active {
            return;
        }
        *self.held.entry(note).or_default() += 1;
        self.push(NoteKind::On, note, now);
    }

    pub fn note_off(&mut self, note: u8, now: f64) {
        if !self.active {
            return;
        }
        if let Some(count) = self.held.get_mut(&note) {
            *count -= 1;
            if *count == 0 {
                self.held.remove(&note);
            }
        }
        self.push(NoteKind::Off, note, now);
    }

    fn push(&mut self, kind: NoteKind, note: u8, timestamp: f64) {
        self.events.push(RecordedEvent {
            kind,
            note,
            timestamp,
        });
    }

    /// Ends the take, closing any note still held at `now`.
    pub fn stop(&mut self, now: f64) -> Recording {
        for (note, count) in std::mem::take(&mut self.held) {
            for _ in 0..count {
                self.push(NoteKind::Off, note, now);
            }
        }
        self.active = false;
        let events = std::mem::take(&mut self.events);
        info!(events = events.len(), "recording stopped");
        Recording { events }
    }
}

impl Recording {
    pub fn events(&self) -> &[RecordedEvent] {
        &self.events
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn duration(&self) -> f64 {
        match (self.events.first(), self.events.last()) {
            (Some(first), Some(last)) => last.timestamp - first.timestamp,
            _ => 0.0,
        }
    }

    /// Waits between consecutive events, scaled by `speed`. The first wait is 0.
    pub fn schedule(&self, speed: f64) -> Vec<ReplayStep> {
        let speed = if speed.is_finite() && speed > 0.0 {
            speed
        } else {
            1.0
        };
        let mut previous = self.events.first().map_or(0.0, |e| e.timestamp);
        self.events
            .iter()
            .map(|event| {
                let wait = ((event.timestamp - previous) / speed).max(0.0);
                previous = event.timestamp;
                ReplayStep {
                    wait,
                    kind: event.kind,
                    note: event.note,
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReplayOptions {
    pub speed: f64,
    /// Taken once when the replay starts.
    pub octave_shift: i32,
    pub channel: u8,
    pub velocity: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    Completed,
    Cancelled,
}

/// Control side of a running replay. Dropping it cancels the replay and
/// waits for the worker to silence its notes.
pub struct ReplayHandle {
    cancel_tx: Option<Sender<()>>,
    worker: Option<JoinHandle<Result<ReplayOutcome, SynthError>>>,
}

pub struct Replayer;

impl Replayer {
    pub fn spawn(recording: &Recording, options: ReplayOptions, synth: SynthHandle) -> ReplayHandle {
        let steps = recording.schedule(options.speed);
        let (cancel_tx, cancel_rx) = crossbeam::channel::bounded(1);

        info!(
            steps = steps.len(),
            speed = options.speed,
            octave_shift = options.octave_shift,
            "replay started"
        );
        let worker = std::thread::spawn(move || replay_thread(steps, options, synth, cancel_rx));

        ReplayHandle {
            cancel_tx: Some(cancel_tx),
            worker: Some(worker),
        }
    }
}

impl ReplayHandle {
    pub fn cancel(&self) {
        if let Some(tx) = &self.cancel_tx {
            let _ = tx.try_send(());
        }
    }

    pub fn is_finished(&self) -> bool {
        self.worker.as_ref().is_none_or(|w| w.is_finished())
    }

    /// Waits for the worker and reports how the replay ended.
    pub fn join(mut self) -> Result<ReplayOutcome, SynthError> {
        self.wait()
    }

    fn wait(&mut self) -> Result<ReplayOutcome, SynthError> {
        match self.worker.take() {
            Some(worker) => worker.join().map_err(|_| SynthError::ReplayPanicked)?,
            None => Ok(ReplayOutcome::Cancelled),
        }
    }
}

impl Drop for ReplayHandle {
    fn drop(&mut self) {
        // Disconnecting the channel wakes the worker.
        self.cancel_tx = None;
        if let Err(e) = self.wait() {
            warn!("replay ended with error: {}", e);
        }
    }
}

impl std::fmt::Debug for ReplayHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplayHandle")
            .field("finished", &self.is_finished())
            .finish()
    }
}

fn replay_thread(
    steps: Vec<ReplayStep>,
    options: ReplayOptions,
    synth: SynthHandle,
    cancel_rx: Receiver<()>,
) -> Result<ReplayOutcome, SynthError> {
    let mut sounding = BTreeSet::new();
    let result = play_steps(&steps, &options, &synth, &cancel_rx, &mut sounding);

    let mut released = Ok(());
    for &note in &sounding {
        if let Err(e) = synth.note_off(options.channel, note) {
            warn!(note, "replay note off failed: {}", e);
            if released.is_ok() {
                released = Err(e);
            }
        }
    }

    let outcome = result?;
    released?;
    info!(?outcome, "replay finished");
    Ok(outcome)
}

fn play_steps(
    steps: &[ReplayStep],
    options: &ReplayOptions,
    synth: &SynthHandle,
    cancel_rx: &Receiver<()>,
    sounding: &mut BTreeSet<u8>,
) -> Result<ReplayOutcome, SynthError> {
    for step in steps {
        let cancelled = if step.wait > 0.0 {
            match cancel_rx.recv_timeout(Duration::from_secs_f64(step.wait)) {
                Err(RecvTimeoutError::Timeout) => false,
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            }
        } else {
            !matches!(
                cancel_rx.try_recv(),
                Err(crossbeam::channel::TryRecvError::Empty)
            )
        };
        if cancelled {
            return Ok(ReplayOutcome::Cancelled);
        }

        let Some(note) = transpose(step.note, options.octave_shift) else {
            debug!(note = step.note, "replayed note out of range, skipped");
            continue;
        };
        match step.kind {
            NoteKind::On => {
                synth.note_on(options.channel, note, options.velocity)?;
                sounding.insert(note);
            }
            NoteKind::Off => {
                synth.note_off(options.channel, note)?;
                sounding.remove(&note);
            }
        }
    }
    Ok(ReplayOutcome::Completed)
}
