use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::display::NoteDisplay;
use crate::error::SynthError;
use crate::events::{PERCUSSION_CHANNEL, transpose};
use crate::recording::{Recorder, Recording, ReplayHandle, ReplayOptions, ReplayOutcome, Replayer};
use crate::synth::{CHANNELS, SynthHandle};
use crate::timing::{Clock, PauseReason, Transport, TransportOptions, TransportStatus};

/// Everything a session-scoped component needs, passed in at construction.
#[derive(Clone)]
pub struct SessionContext {
    pub synth: SynthHandle,
    pub clock: Arc<dyn Clock>,
    pub settings: Arc<Settings>,
}

impl SessionContext {
    pub fn new(synth: SynthHandle, clock: Arc<dyn Clock>, settings: Arc<Settings>) -> Self {
        Self {
            synth,
            clock,
            settings,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    OpenSong(PathBuf),
    StopPlayback,
    TogglePause,
    SeekForward,
    SeekBackward,
    SpeedUp,
    SpeedDown,
    OctaveUp,
    OctaveDown,
    ToggleLoop,
    ToggleRecording,
    Replay,
    AllNotesOff,
    BeginInstrumentChange,
    SelectInstrument(u8),
    CancelInstrumentChange,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStatus {
    pub transport: Option<TransportStatus>,
    pub song: Option<String>,
    pub octave_shift: i32,
    pub speed: f64,
    pub looping: bool,
    pub recording: bool,
    pub recorded_events: usize,
    pub replaying: bool,
    pub choosing_instrument: bool,
    pub instrument: Option<String>,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy)]
struct HeldKey {
    pitch: u8,
    last_seen: f64,
}

/// Routes user input to the transport, the recorder and the synth.
pub struct Session {
    ctx: SessionContext,
    transport: Option<Transport>,
    song: Option<String>,
    recorder: Recorder,
    recording: Recording,
    replay: Option<ReplayHandle>,
    octave_shift: i32,
    speed: f64,
    looping: bool,
    /// Computer keys, released after `release_ms` without a repeat unless
    /// the terminal reports releases itself.
    keys: BTreeMap<u8, HeldKey>,
    explicit_release: bool,
    /// Controller keys, released explicitly.
    controller: BTreeMap<u8, u8>,
    live_display: NoteDisplay,
    program: Option<u8>,
    choosing_instrument: bool,
    message: Option<String>,
}

impl Session {
    pub fn new(ctx: SessionContext) -> Self {
        let speed = ctx.settings.speed.default;
        let looping = ctx.settings.loop_by_default;
        Self {
            ctx,
            transport: None,
            song: None,
            recorder: Recorder::new(),
            recording: Recording::default(),
            replay: None,
            octave_shift: 0,
            speed,
            looping,
            keys: BTreeMap::new(),
            explicit_release: false,
            controller: BTreeMap::new(),
            live_display: NoteDisplay::new(),
            program: None,
            choosing_instrument: false,
            message: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.ctx.settings
    }

    pub fn transport(&self) -> Option<&Transport> {
        self.transport.as_ref()
    }

    pub fn recording(&self) -> &Recording {
        &self.recording
    }

    pub fn set_explicit_release(&mut self, explicit_release: bool) {
        self.explicit_release = explicit_release;
    }

    /// A song that has not stopped yet, or a replay still running.
    pub fn is_playing(&self) -> bool {
        self.transport
            .as_ref()
            .is_some_and(|t| !t.state().is_stopped())
            || self.replay.as_ref().is_some_and(|r| !r.is_finished())
    }

    /// Shows `message` in the status line.
    pub fn notify(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn handle(&mut self, command: Command) {
        debug!(?command, "command");
        let result = match command {
            Command::OpenSong(path) => {
                self.open_song(path);
                Ok(())
            }
            Command::StopPlayback => self.stop_playback(),
            Command::TogglePause => self.with_transport(|t| t.toggle_pause()),
            Command::SeekForward => {
                let step = self.ctx.settings.seek_step_secs;
                self.with_transport(|t| t.seek(step))
            }
            Command::SeekBackward => {
                let step = self.ctx.settings.seek_step_secs;
                self.with_transport(|t| t.seek(-step))
            }
            Command::SpeedUp => {
                self.change_speed(self.ctx.settings.speed.step);
                Ok(())
            }
            Command::SpeedDown => {
                self.change_speed(-self.ctx.settings.speed.step);
                Ok(())
            }
            Command::OctaveUp => self.change_octave(1),
            Command::OctaveDown => self.change_octave(-1),
            Command::ToggleLoop => {
                self.looping = !self.looping;
                if let Some(transport) = &mut self.transport {
                    transport.set_loop(self.looping);
                }
                self.message = Some(format!(
                    "Loop {}",
                    if self.looping { "on" } else { "off" }
                ));
                Ok(())
            }
            Command::ToggleRecording => {
                self.toggle_recording();
                Ok(())
            }
            Command::Replay => {
                self.start_replay();
                Ok(())
            }
            Command::AllNotesOff => self.all_notes_off(),
            Command::BeginInstrumentChange => {
                self.choosing_instrument = true;
                self.with_transport(|t| t.set_paused(PauseReason::InstrumentChange, true))
            }
            Command::SelectInstrument(program) => self.select_instrument(program),
            Command::CancelInstrumentChange => self.finish_instrument_change(),
        };

        if let Err(e) = result {
            self.synth_failed(e);
        }
    }

    fn with_transport(
        &mut self,
        f: impl FnOnce(&mut Transport) -> Result<(), SynthError>,
    ) -> Result<(), SynthError> {
        match &mut self.transport {
            Some(transport) => f(transport),
            None => Ok(()),
        }
    }

    fn open_song(&mut self, path: PathBuf) {
        let options = TransportOptions {
            speed: self.speed,
            octave_shift: self.octave_shift,
            looping: self.looping,
        };
        match Transport::open(&path, &self.ctx, options) {
            Ok(transport) => {
                if let Some(mut previous) = self.transport.take() {
                    if let Err(e) = previous.stop() {
                        warn!("failed to silence previous song: {}", e);
                    }
                }
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default();
                self.message = Some(format!("Playing {}", name));
                self.song = Some(name);
                self.transport = Some(transport);
                self.choosing_instrument = false;
            }
            Err(e) => {
                warn!("failed to load {}: {}", path.display(), e);
                self.message = Some(e.to_string());
            }
        }
    }

    fn stop_playback(&mut self) -> Result<(), SynthError> {
        self.cancel_replay();
        self.message = Some("Stopped".into());
        self.with_transport(|t| t.stop())
    }

    fn change_speed(&mut self, delta: f64) {
        let settings = &self.ctx.settings.speed;
        // Round to the step grid so repeated presses do not drift.
        let steps = ((self.speed + delta) / settings.step).round();
        self.speed = settings.clamp(steps * settings.step);
        if let Some(transport) = &mut self.transport {
            transport.set_speed(self.speed);
        }
        self.message = Some(format!("Speed {:.1}x", self.speed));
    }

    fn change_octave(&mut self, delta: i32) -> Result<(), SynthError> {
        self.octave_shift = self.ctx.settings.octave.clamp(self.octave_shift + delta);
        self.message = Some(format!("Octave {:+}", self.octave_shift));
        let octave_shift = self.octave_shift;
        self.with_transport(|t| t.set_pitch_offset(octave_shift))
    }

    fn toggle_recording(&mut self) {
        let now = self.ctx.clock.now();
        if self.recorder.is_active() {
            self.recording = self.recorder.stop(now);
            self.message = Some(format!("Recorded {} events", self.recording.len()));
        } else {
            self.cancel_replay();
            self.recorder.start(now);
            self.message = Some("Recording".into());
        }
    }

    fn start_replay(&mut self) {
        if self.recorder.is_active() {
            let now = self.ctx.clock.now();
            self.recording = self.recorder.stop(now);
        }
        self.cancel_replay();
        if self.recording.is_empty() {
            self.message = Some("Nothing recorded yet".into());
            return;
        }

        let live = &self.ctx.settings.live;
        let options = ReplayOptions {
            speed: self.speed,
            octave_shift: self.octave_shift,
            channel: live.channel,
            velocity: live.velocity,
        };
        self.replay = Some(Replayer::spawn(
            &self.recording,
            options,
            self.ctx.synth.clone(),
        ));
        self.message = Some("Replaying".into());
    }

    fn cancel_replay(&mut self) {
        if let Some(replay) = self.replay.take() {
            replay.cancel();
        }
    }

    fn all_notes_off(&mut self) -> Result<(), SynthError> {
        self.keys.clear();
        self.controller.clear();
        self.live_display.clear();
        self.ctx.synth.all_notes_off()
    }

    fn select_instrument(&mut self, program: u8) -> Result<(), SynthError> {
        for channel in (0..CHANNELS).filter(|c| *c != PERCUSSION_CHANNEL) {
            self.ctx.synth.program_change(channel, program)?;
        }
        self.program = Some(program);
        let name = self.instrument_name();
        info!(program, ?name, "instrument selected");
        self.message = name.map(|n| format!("Instrument: {}", n));
        self.finish_instrument_change()
    }

    fn finish_instrument_change(&mut self) -> Result<(), SynthError> {
        self.choosing_instrument = false;
        self.with_transport(|t| t.set_paused(PauseReason::InstrumentChange, false))
    }

    fn instrument_name(&self) -> Option<String> {
        let program = self.program?;
        self.ctx
            .settings
            .bank
            .select(program)
            .map(|i| i.name.clone())
    }

    /// A terminal key arrived, either a first press or an auto-repeat.
    pub fn key_down(&mut self, key: char, now: f64) {
        let Some(raw) = self.ctx.settings.note_for_key(key) else {
            return;
        };
        if let Some(held) = self.keys.get_mut(&raw) {
            held.last_seen = now;
            return;
        }
        if let Some(pitch) = self.live_note_on(raw, now) {
            self.keys.insert(
                raw,
                HeldKey {
                    pitch,
                    last_seen: now,
                },
            );
        }
    }

    /// Explicit release, for terminals that report it.
    pub fn key_up(&mut self, key: char, now: f64) {
        let Some(raw) = self.ctx.settings.note_for_key(key) else {
            return;
        };
        if let Some(held) = self.keys.remove(&raw) {
            self.live_note_off(raw, held.pitch, now);
        }
    }

    pub fn controller_note_on(&mut self, raw: u8, now: f64) {
        if self.controller.contains_key(&raw) {
            return;
        }
        if let Some(pitch) = self.live_note_on(raw, now) {
            self.controller.insert(raw, pitch);
        }
    }

    pub fn controller_note_off(&mut self, raw: u8, now: f64) {
        if let Some(pitch) = self.controller.remove(&raw) {
            self.live_note_off(raw, pitch, now);
        }
    }

    fn live_note_on(&mut self, raw: u8, now: f64) -> Option<u8> {
        let pitch = transpose(raw, self.octave_shift)?;
        let live = &self.ctx.settings.live;
        if let Err(e) = self.ctx.synth.note_on(live.channel, pitch, live.velocity) {
            self.synth_failed(e);
            return None;
        }
        debug!(raw, pitch, "live note on");
        self.live_display.insert(pitch);
        self.recorder.note_on(raw, now);
        Some(pitch)
    }

    fn live_note_off(&mut self, raw: u8, pitch: u8, now: f64) {
        self.live_display.remove(pitch);
        self.recorder.note_off(raw, now);
        if let Err(e) = self.ctx.synth.note_off(self.ctx.settings.live.channel, pitch) {
            self.synth_failed(e);
        }
    }

    /// One step of the main loop: releases idle keys, drives the transport
    /// and collects a finished replay.
    pub fn tick(&mut self) {
        let now = self.ctx.clock.now();
        let release_after = self.ctx.settings.live.release_ms as f64 / 1000.0;
        let expired: Vec<(u8, u8)> = self
            .keys
            .iter()
            .filter(|(_, held)| !self.explicit_release && now - held.last_seen > release_after)
            .map(|(raw, held)| (*raw, held.pitch))
            .collect();
        for (raw, pitch) in expired {
            self.keys.remove(&raw);
            self.live_note_off(raw, pitch, now);
        }

        if let Err(e) = self.with_transport(|t| t.advance()) {
            self.synth_failed(e);
        }

        if self.replay.as_ref().is_some_and(|r| r.is_finished()) {
            if let Some(replay) = self.replay.take() {
                match replay.join() {
                    Ok(ReplayOutcome::Completed) => {
                        self.message = Some("Replay finished".into());
                    }
                    Ok(ReplayOutcome::Cancelled) => {}
                    Err(e) => self.synth_failed(e),
                }
            }
        }
    }

    fn synth_failed(&mut self, e: SynthError) {
        error!("synth error: {}", e);
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.stop();
        }
        self.message = Some(format!("Synth error: {}", e));
    }

    /// Notes to light up: the song's and the ones played live.
    pub fn lit_notes(&self) -> BTreeSet<u8> {
        let mut notes: BTreeSet<u8> = (*self.live_display.reader().snapshot()).clone();
        if let Some(transport) = &self.transport {
            notes.extend(transport.display().snapshot().iter().copied());
        }
        notes
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            transport: self.transport.as_ref().map(|t| t.status()),
            song: self.song.clone(),
            octave_shift: self.octave_shift,
            speed: self.speed,
            looping: self.looping,
            recording: self.recorder.is_active(),
            recorded_events: self.recording.len(),
            replaying: self.replay.as_ref().is_some_and(|r| !r.is_finished()),
            choosing_instrument: self.choosing_instrument,
            instrument: self.instrument_name(),
            message: self.message.clone(),
        }
    }

    /// Silences everything before exit.
    pub fn shutdown(&mut self) {
        self.cancel_replay();
        if let Some(mut transport) = self.transport.take() {
            let _ = transport.stop();
        }
        if let Err(e) = self.all_notes_off() {
            warn!("failed to silence synth on exit: {}", e);
        }
    }
}
