//! Live playback of an [`EventSequence`] through a synth.
//!
//! The transport is polled once per UI tick. It dispatches every event whose
//! time has come according to its [`LogicalClock`] and keeps track of the
//! notes it left sounding, so that pause, seek, transposition and stop can
//! silence them.

use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::{EventSequence, LogicalClock};
use crate::config::Settings;
use crate::display::{DisplayReader, NoteDisplay};
use crate::error::{LoadError, SynthError};
use crate::events::{Event, PERCUSSION_CHANNEL, transpose};
use crate::session::SessionContext;
use crate::song::Song;
use crate::synth::SynthHandle;
use crate::timing::Clock;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    User,
    InstrumentChange,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Stopped,
    Playing,
    /// Playing again after at least one automatic restart.
    Looping,
    Paused(PauseReason),
}

impl TransportState {
    pub fn is_playing(&self) -> bool {
        matches!(self, TransportState::Playing | TransportState::Looping)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, TransportState::Paused(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, TransportState::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransportOptions {
    pub speed: f64,
    pub octave_shift: i32,
    pub looping: bool,
}

impl TransportOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            speed: settings.speed.default,
            octave_shift: 0,
            looping: settings.loop_by_default,
        }
    }
}

/// What the presentation layer shows each tick.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportStatus {
    pub state: TransportState,
    pub elapsed: f64,
    pub total: f64,
    pub speed: f64,
    pub octave_shift: i32,
    pub looping: bool,
    pub cursor: usize,
    pub events: usize,
}

pub struct Transport {
    sequence: EventSequence,
    cursor: usize,
    /// (channel, raw note) pairs we sent a note-on for.
    sounding: BTreeSet<(u8, u8)>,
    display: NoteDisplay,
    clock: LogicalClock,
    wall: Arc<dyn Clock>,
    synth: SynthHandle,
    settings: Arc<Settings>,
    octave_shift: i32,
    looping: bool,
    has_looped: bool,
    user_paused: bool,
    instrument_paused: bool,
    stopped: bool,
    interrupted: bool,
}

impl Transport {
    /// Starts playing `sequence` immediately, cursor at the first event.
    pub fn new(sequence: EventSequence, ctx: &SessionContext, options: TransportOptions) -> Self {
        let settings = ctx.settings.clone();
        let speed = settings.speed.clamp(options.speed);
        let octave_shift = settings.octave.clamp(options.octave_shift);
        let now = ctx.clock.now();

        Self {
            sequence,
            cursor: 0,
            sounding: BTreeSet::new(),
            display: NoteDisplay::new(),
            clock: LogicalClock::new(now, speed),
            wall: ctx.clock.clone(),
            synth: ctx.synth.clone(),
            settings,
            octave_shift,
            looping: options.looping,
            has_looped: false,
            user_paused: false,
            instrument_paused: false,
            stopped: false,
            interrupted: false,
        }
    }

    /// Decodes the song at `path`. Nothing is constructed when that fails.
    pub fn open(
        path: &Path,
        ctx: &SessionContext,
        options: TransportOptions,
    ) -> Result<Self, LoadError> {
        let song = Song::load(path)?;
        let sequence = song.to_sequence();
        info!(
            "loaded {:?}: {} events, {:.1}s",
            song.name,
            sequence.len(),
            sequence.total_duration()
        );
        Ok(Self::new(sequence, ctx, options))
    }

    pub fn state(&self) -> TransportState {
        if self.stopped {
            TransportState::Stopped
        } else if self.user_paused {
            TransportState::Paused(PauseReason::User)
        } else if self.instrument_paused {
            TransportState::Paused(PauseReason::InstrumentChange)
        } else if self.has_looped {
            TransportState::Looping
        } else {
            TransportState::Playing
        }
    }

    pub fn status(&self) -> TransportStatus {
        TransportStatus {
            state: self.state(),
            elapsed: self.current_logical_time(),
            total: self.sequence.total_duration(),
            speed: self.clock.speed(),
            octave_shift: self.octave_shift,
            looping: self.looping,
            cursor: self.cursor,
            events: self.sequence.len(),
        }
    }

    pub fn current_logical_time(&self) -> f64 {
        self.clock.logical_time(self.wall.now())
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn sequence(&self) -> &EventSequence {
        &self.sequence
    }

    pub fn sounding_notes(&self) -> &BTreeSet<(u8, u8)> {
        &self.sounding
    }

    pub fn display(&self) -> DisplayReader {
        self.display.reader()
    }

    pub fn speed(&self) -> f64 {
        self.clock.speed()
    }

    pub fn pitch_offset(&self) -> i32 {
        self.octave_shift
    }

    pub fn is_looping(&self) -> bool {
        self.looping
    }

    /// Dispatches every event that is due. Does nothing unless playing.
    pub fn advance(&mut self) -> Result<(), SynthError> {
        if !self.state().is_playing() {
            return Ok(());
        }

        let logical_time = self.current_logical_time();
        while let Some(timed) = self.sequence.get(self.cursor) {
            if timed.time > logical_time {
                break;
            }
            let event = timed.event;
            self.cursor += 1;
            self.dispatch(event)?;
        }

        if self.cursor >= self.sequence.len() && self.sounding.is_empty() {
            if self.looping && !self.interrupted && !self.sequence.is_empty() {
                self.cursor = 0;
                self.clock.restart(self.wall.now());
                self.has_looped = true;
                info!("song finished, looping back to start");
            } else {
                self.stopped = true;
                info!("song finished");
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, event: Event) -> Result<(), SynthError> {
        match event {
            Event::NoteOn {
                channel,
                note,
                velocity,
            } if velocity > 0 => {
                let Some(sounding) = transpose(note, self.octave_shift) else {
                    debug!(channel, note, "transposed note out of range, skipped");
                    return Ok(());
                };
                self.synth.note_on(channel, sounding, velocity)?;
                if self.sounding.insert((channel, note)) {
                    self.display.insert(sounding);
                }
                debug!(channel, note = sounding, velocity, "note on");
            }
            Event::NoteOn { channel, note, .. } | Event::NoteOff { channel, note } => {
                let Some(sounding) = transpose(note, self.octave_shift) else {
                    return Ok(());
                };
                self.synth.note_off(channel, sounding)?;
                if self.sounding.remove(&(channel, note)) {
                    self.display.remove(sounding);
                }
                debug!(channel, note = sounding, "note off");
            }
            Event::ProgramChange { channel, program } => {
                if channel == PERCUSSION_CHANNEL {
                    debug!(program, "program change on percussion channel ignored");
                } else {
                    self.synth.program_change(channel, program)?;
                    debug!(channel, program, "program change");
                }
            }
            Event::Ignored => {}
        }
        Ok(())
    }

    /// Sends note-off for everything we left sounding, using the shift it
    /// was started with. A failed note-off does not skip the rest; the first
    /// error is returned once every note has been tried.
    fn release_all(&mut self) -> Result<(), SynthError> {
        let sounding = std::mem::take(&mut self.sounding);
        self.display.clear();
        let mut first_error = None;
        for (channel, note) in sounding {
            let Some(pitch) = transpose(note, self.octave_shift) else {
                continue;
            };
            if let Err(e) = self.synth.note_off(channel, pitch) {
                warn!(channel, pitch, "note off failed: {}", e);
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Changes transposition. Held notes are cut, not moved to the new pitch.
    pub fn set_pitch_offset(&mut self, octave_shift: i32) -> Result<(), SynthError> {
        let octave_shift = self.settings.octave.clamp(octave_shift);
        if octave_shift == self.octave_shift {
            return Ok(());
        }
        self.release_all()?;
        self.octave_shift = octave_shift;
        info!(octave_shift, "octave shift changed");
        Ok(())
    }

    pub fn set_speed(&mut self, speed: f64) {
        let speed = self.settings.speed.clamp(speed);
        self.clock.set_speed(self.wall.now(), speed);
        info!("playback speed {:.1}x", speed);
    }

    pub fn set_loop(&mut self, looping: bool) {
        self.looping = looping;
    }

    /// Jumps `delta` seconds of song time, clamped to the song.
    pub fn seek(&mut self, delta: f64) -> Result<(), SynthError> {
        if self.stopped || !delta.is_finite() {
            return Ok(());
        }
        let now = self.wall.now();
        let total = self.sequence.total_duration();
        let target = (self.clock.logical_time(now) + delta).clamp(0.0, total);

        self.release_all()?;
        self.cursor = self.sequence.first_after(target);
        self.clock.seek_to(now, target);
        debug!(target, cursor = self.cursor, "seek");
        Ok(())
    }

    pub fn toggle_pause(&mut self) -> Result<(), SynthError> {
        let paused = !self.user_paused;
        self.set_paused(PauseReason::User, paused)
    }

    pub fn toggle_instrument_pause(&mut self) -> Result<(), SynthError> {
        let paused = !self.instrument_paused;
        self.set_paused(PauseReason::InstrumentChange, paused)
    }

    /// The clock stays frozen while either reason holds.
    pub fn set_paused(&mut self, reason: PauseReason, paused: bool) -> Result<(), SynthError> {
        if self.stopped {
            return Ok(());
        }
        let flag = match reason {
            PauseReason::User => &mut self.user_paused,
            PauseReason::InstrumentChange => &mut self.instrument_paused,
        };
        if *flag == paused {
            return Ok(());
        }
        *flag = paused;

        let now = self.wall.now();
        if paused {
            self.clock.freeze(now);
            info!(?reason, "paused");
            self.release_all()
        } else {
            if !self.user_paused && !self.instrument_paused {
                self.clock.thaw(now);
                info!(?reason, "resumed");
            }
            Ok(())
        }
    }

    /// Silences everything and stops for good. Calling it again does nothing.
    pub fn stop(&mut self) -> Result<(), SynthError> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        self.interrupted = true;
        info!("playback stopped");
        self.release_all()
    }
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("state", &self.state())
            .field("cursor", &self.cursor)
            .field("events", &self.sequence.len())
            .field("sounding", &self.sounding)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::{CommandLog, SynthCommand};
    use crate::timing::ManualClock;

    const EPS: f64 = 1e-9;

    fn on(channel: u8, note: u8) -> Event {
        Event::NoteOn {
            channel,
            note,
            velocity: 100,
        }
    }

    fn off(channel: u8, note: u8) -> Event {
        Event::NoteOff { channel, note }
    }

    struct Rig {
        clock: ManualClock,
        log: CommandLog,
        ctx: SessionContext,
    }

    fn rig() -> Rig {
        let clock = ManualClock::new();
        let log = CommandLog::new();
        let ctx = SessionContext::new(
            SynthHandle::new(log.clone()),
            Arc::new(clock.clone()),
            Arc::new(Settings::default()),
        );
        Rig { clock, log, ctx }
    }

    fn transport(rig: &Rig, events: Vec<(f64, Event)>) -> Transport {
        let options = TransportOptions {
            speed: 1.0,
            octave_shift: 0,
            looping: false,
        };
        Transport::new(EventSequence::build(events), &rig.ctx, options)
    }

    #[test]
    fn test_starts_playing() {
        let rig = rig();
        let t = transport(&rig, vec![(0.0, on(0, 60))]);
        assert_eq!(t.state(), TransportState::Playing);
        assert_eq!(t.cursor(), 0);
    }

    #[test]
    fn test_never_dispatches_early() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.5, on(0, 60)), (0.5, off(0, 60))]);

        rig.clock.advance(0.49);
        t.advance().unwrap();
        assert!(rig.log.commands().is_empty());

        rig.clock.advance(0.01);
        t.advance().unwrap();
        assert_eq!(t.cursor(), 1);
    }

    #[test]
    fn test_velocity_zero_releases() {
        let rig = rig();
        let mut t = transport(
            &rig,
            vec![
                (0.0, on(2, 60)),
                (
                    0.1,
                    Event::NoteOn {
                        channel: 2,
                        note: 60,
                        velocity: 0,
                    },
                ),
            ],
        );
        rig.clock.advance(0.2);
        t.advance().unwrap();
        assert!(t.sounding_notes().is_empty());
        assert_eq!(
            rig.log.commands()[1],
            SynthCommand::NoteOff {
                channel: 2,
                note: 60
            }
        );
    }

    #[test]
    fn test_percussion_program_change_not_forwarded() {
        let rig = rig();
        let mut t = transport(
            &rig,
            vec![
                (
                    0.0,
                    Event::ProgramChange {
                        channel: 9,
                        program: 5,
                    },
                ),
                (
                    0.0,
                    Event::ProgramChange {
                        channel: 1,
                        program: 5,
                    },
                ),
                (0.0, Event::Ignored),
            ],
        );
        t.advance().unwrap();
        assert_eq!(
            rig.log.commands(),
            vec![SynthCommand::ProgramChange {
                channel: 1,
                program: 5
            }]
        );
    }

    #[test]
    fn test_waits_for_held_note_before_finishing() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.0, on(0, 60)), (2.0, off(0, 60))]);

        rig.clock.advance(1.0);
        t.advance().unwrap();
        assert_eq!(t.state(), TransportState::Playing);

        rig.clock.advance(1.0);
        t.advance().unwrap();
        assert_eq!(t.state(), TransportState::Stopped);
    }

    #[test]
    fn test_empty_song_stops_even_when_looping() {
        let rig = rig();
        let mut t = transport(&rig, Vec::new());
        t.set_loop(true);
        t.advance().unwrap();
        assert_eq!(t.state(), TransportState::Stopped);
    }

    #[test]
    fn test_octave_shift_applied() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.0, on(0, 60))]);
        t.set_pitch_offset(-1).unwrap();
        t.advance().unwrap();
        assert_eq!(
            rig.log.commands(),
            vec![SynthCommand::NoteOn {
                channel: 0,
                note: 48,
                velocity: 100
            }]
        );
        assert!(t.display().snapshot().contains(&48));
        assert!(t.sounding_notes().contains(&(0, 60)));
    }

    #[test]
    fn test_out_of_range_transposition_skipped() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.0, on(0, 125)), (0.1, off(0, 125))]);
        t.set_pitch_offset(1).unwrap();
        rig.clock.advance(0.2);
        t.advance().unwrap();
        assert!(rig.log.commands().is_empty());
        assert_eq!(t.state(), TransportState::Stopped);
    }

    #[test]
    fn test_octave_shift_is_clamped() {
        let rig = rig();
        let mut t = transport(&rig, Vec::new());
        t.set_pitch_offset(99).unwrap();
        assert_eq!(t.pitch_offset(), 4);
    }

    #[test]
    fn test_speed_is_clamped_and_continuous() {
        let rig = rig();
        let mut t = transport(&rig, vec![(10.0, on(0, 60))]);
        rig.clock.advance(2.0);
        let before = t.current_logical_time();
        t.set_speed(0.0);
        assert!((t.current_logical_time() - before).abs() < EPS);
        assert_eq!(t.speed(), 0.1);
    }

    #[test]
    fn test_both_pause_reasons_must_clear() {
        let rig = rig();
        let mut t = transport(&rig, vec![(5.0, on(0, 60))]);
        rig.clock.advance(1.0);

        t.toggle_pause().unwrap();
        t.toggle_instrument_pause().unwrap();
        assert_eq!(t.state(), TransportState::Paused(PauseReason::User));

        rig.clock.advance(3.0);
        t.toggle_pause().unwrap();
        assert_eq!(
            t.state(),
            TransportState::Paused(PauseReason::InstrumentChange)
        );
        assert!((t.current_logical_time() - 1.0).abs() < EPS);

        rig.clock.advance(3.0);
        t.toggle_instrument_pause().unwrap();
        assert_eq!(t.state(), TransportState::Playing);
        assert!((t.current_logical_time() - 1.0).abs() < EPS);
    }

    #[test]
    fn test_pause_releases_held_notes() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.0, on(0, 60)), (5.0, off(0, 60))]);
        t.advance().unwrap();
        assert_eq!(t.sounding_notes().len(), 1);

        t.toggle_pause().unwrap();
        assert!(t.sounding_notes().is_empty());
        assert!(t.display().snapshot().is_empty());

        t.toggle_pause().unwrap();
        t.advance().unwrap();
        let note_ons = rig
            .log
            .commands()
            .iter()
            .filter(|c| matches!(c, SynthCommand::NoteOn { .. }))
            .count();
        assert_eq!(note_ons, 1);
    }

    #[test]
    fn test_advance_while_paused_is_noop() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.1, on(0, 60))]);
        t.toggle_pause().unwrap();
        rig.clock.advance(1.0);
        t.advance().unwrap();
        assert_eq!(t.cursor(), 0);
    }

    #[test]
    fn test_synth_error_propagates() {
        let rig = rig();
        let mut t = transport(&rig, vec![(0.0, on(0, 60))]);
        rig.log.set_failing(true);
        assert!(matches!(t.advance(), Err(SynthError::StreamClosed)));
    }

    #[test]
    fn test_open_missing_file_fails() {
        let rig = rig();
        let result = Transport::open(
            Path::new("/definitely/not/here.mid"),
            &rig.ctx,
            TransportOptions::from_settings(&Settings::default()),
        );
        assert!(matches!(result, Err(LoadError::Io { .. })));
    }

    #[test]
    fn test_open_out_of_range_song_fails() {
        let rig = rig();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wide.ron");
        std::fs::write(
            &path,
            "(name: \"wide\", events: [(event: NoteOn(channel: 20, note: 60, velocity: 90))])",
        )
        .unwrap();

        let result = Transport::open(
            &path,
            &rig.ctx,
            TransportOptions::from_settings(&Settings::default()),
        );
        assert!(matches!(result, Err(LoadError::InvalidEvent { .. })));
        assert!(rig.log.commands().is_empty());
    }

    /// Rejects the note-off for one pitch, records everything else.
    struct Flaky {
        reject: u8,
        offs: Arc<parking_lot::Mutex<Vec<u8>>>,
    }

    impl crate::synth::SynthAdapter for Flaky {
        fn note_on(&mut self, _: u8, _: u8, _: u8) -> Result<(), SynthError> {
            Ok(())
        }

        fn note_off(&mut self, _: u8, note: u8) -> Result<(), SynthError> {
            if note == self.reject {
                return Err(SynthError::QueueFull);
            }
            self.offs.lock().push(note);
            Ok(())
        }

        fn program_change(&mut self, _: u8, _: u8) -> Result<(), SynthError> {
            Ok(())
        }
    }

    #[test]
    fn test_stop_releases_remaining_notes_after_failure() {
        let clock = ManualClock::new();
        let offs = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let ctx = SessionContext::new(
            SynthHandle::new(Flaky {
                reject: 64,
                offs: offs.clone(),
            }),
            Arc::new(clock.clone()),
            Arc::new(Settings::default()),
        );
        let chord = vec![(0.0, on(0, 60)), (0.0, on(0, 64)), (0.0, on(0, 67))];
        let options = TransportOptions {
            speed: 1.0,
            octave_shift: 0,
            looping: false,
        };
        let mut t = Transport::new(EventSequence::build(chord), &ctx, options);
        t.advance().unwrap();
        assert_eq!(t.sounding_notes().len(), 3);

        assert!(matches!(t.stop(), Err(SynthError::QueueFull)));
        assert_eq!(*offs.lock(), vec![60, 67]);
        assert!(t.sounding_notes().is_empty());
        assert_eq!(t.state(), TransportState::Stopped);
    }
}
