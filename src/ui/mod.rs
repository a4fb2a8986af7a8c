//! Terminal front end.
//!
//! Reads [`SessionStatus`] and the lit notes once per tick and redraws the
//! whole screen. It never touches playback state itself.

mod keyboard;
mod picker;

pub use keyboard::{HIGHEST_NOTE, LOWEST_NOTE, chord_label, is_black_key, note_name, note_strip};
pub use picker::{Picker, PickerOutcome};

use std::collections::BTreeSet;
use std::io::{self, Stdout, Write};

use crossterm::{
    cursor::{Hide, MoveTo, Show},
    event::{KeyboardEnhancementFlags, PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags},
    execute, queue,
    style::{Color, Print, ResetColor, SetForegroundColor},
    terminal::{self, Clear, ClearType, EnterAlternateScreen, LeaveAlternateScreen},
};
use tracing::{debug, warn};

use crate::session::SessionStatus;
use crate::timing::TransportState;

const HELP: &[&str] = &[
    "z..m , . / q..p =   play notes        [ ]  octave down/up",
    "R  record / stop    P  replay take    Space  all notes off",
    "1  open song        2  instrument     3  loop on/off",
    "Enter  pause        Left/Right  seek  Up/Down  speed",
    "S  stop playback    Q  stop, or quit when idle    Esc  quit",
];

pub struct View<'a> {
    pub status: &'a SessionStatus,
    pub lit: &'a BTreeSet<u8>,
    pub picker: Option<&'a Picker>,
}

/// Owns the terminal while alive: raw mode, alternate screen, hidden cursor.
pub struct Screen {
    out: Stdout,
    enhanced: bool,
}

impl Screen {
    pub fn enter() -> io::Result<Self> {
        let mut out = io::stdout();
        terminal::enable_raw_mode()?;
        execute!(out, EnterAlternateScreen, Hide)?;

        // Key release events, where the terminal can report them.
        let enhanced = matches!(terminal::supports_keyboard_enhancement(), Ok(true));
        if enhanced {
            execute!(
                out,
                PushKeyboardEnhancementFlags(KeyboardEnhancementFlags::REPORT_EVENT_TYPES)
            )?;
        }
        debug!(enhanced, "terminal ready");
        Ok(Self { out, enhanced })
    }

    pub fn reports_key_release(&self) -> bool {
        self.enhanced
    }

    pub fn draw(&mut self, view: &View) -> io::Result<()> {
        let (width, height) = terminal::size()?;
        queue!(self.out, Clear(ClearType::All))?;

        let mut row = 0u16;
        for line in status_lines(view.status) {
            self.line(row, width, &line, Color::Cyan)?;
            row += 1;
        }
        row += 1;

        let color = if view.lit.is_empty() {
            Color::DarkGrey
        } else {
            Color::Green
        };
        self.line(row, width, &note_strip(view.lit), color)?;
        self.line(row + 1, width, &chord_label(view.lit), Color::White)?;
        row += 3;

        match view.picker {
            Some(picker) => {
                self.line(row, width, &picker.title, Color::Cyan)?;
                row += 1;
                for (idx, item) in picker.items.iter().enumerate() {
                    if row >= height.saturating_sub(1) {
                        break;
                    }
                    let (marker, color) = if idx == picker.selected() {
                        ("> ", Color::Green)
                    } else {
                        ("  ", Color::White)
                    };
                    self.line(row, width, &format!("{}{}", marker, item), color)?;
                    row += 1;
                }
                if picker.items.is_empty() {
                    self.line(row, width, "  (nothing found)", Color::DarkGrey)?;
                }
            }
            None => {
                for help in HELP {
                    self.line(row, width, help, Color::DarkGrey)?;
                    row += 1;
                }
            }
        }

        if let Some(message) = &view.status.message {
            self.line(height.saturating_sub(1), width, message, Color::Yellow)?;
        }

        queue!(self.out, ResetColor)?;
        self.out.flush()
    }

    fn line(&mut self, row: u16, width: u16, text: &str, color: Color) -> io::Result<()> {
        let text: String = text.chars().take(width as usize).collect();
        queue!(
            self.out,
            MoveTo(0, row),
            SetForegroundColor(color),
            Print(text)
        )
    }
}

impl Drop for Screen {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(self.out, PopKeyboardEnhancementFlags);
        }
        let _ = execute!(self.out, ResetColor, Show, LeaveAlternateScreen);
        if let Err(e) = terminal::disable_raw_mode() {
            warn!("failed to restore terminal: {}", e);
        }
    }
}

fn clock(seconds: f64) -> String {
    let seconds = seconds.max(0.0) as u64;
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Header lines describing playback, recording and the current instrument.
pub fn status_lines(status: &SessionStatus) -> Vec<String> {
    let mut lines = Vec::with_capacity(3);

    let song = status.song.as_deref().unwrap_or("no song");
    let state = match status.transport.as_ref().map(|t| t.state) {
        None => "idle".to_string(),
        Some(TransportState::Stopped) => "stopped".to_string(),
        Some(TransportState::Playing) => "playing".to_string(),
        Some(TransportState::Looping) => "looping".to_string(),
        Some(TransportState::Paused(reason)) => format!("paused ({:?})", reason),
    };
    lines.push(format!("pianola  {}  [{}]", song, state));

    let progress = match &status.transport {
        Some(t) => format!("{} / {}", clock(t.elapsed), clock(t.total)),
        None => "--:-- / --:--".to_string(),
    };
    lines.push(format!(
        "{}  speed {:.1}x  octave {:+}  loop {}",
        progress,
        status.speed,
        status.octave_shift,
        if status.looping { "on" } else { "off" }
    ));

    let mut flags = Vec::new();
    if status.recording {
        flags.push("REC".to_string());
    } else if status.recorded_events > 0 {
        flags.push(format!("take: {} events", status.recorded_events));
    }
    if status.replaying {
        flags.push("replaying".to_string());
    }
    if status.choosing_instrument {
        flags.push("choosing instrument".to_string());
    } else if let Some(instrument) = &status.instrument {
        flags.push(format!("instrument: {}", instrument));
    }
    lines.push(flags.join("  "));
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timing::{PauseReason, TransportStatus};

    fn status() -> SessionStatus {
        SessionStatus {
            transport: None,
            song: None,
            octave_shift: 0,
            speed: 1.0,
            looping: false,
            recording: false,
            recorded_events: 0,
            replaying: false,
            choosing_instrument: false,
            instrument: None,
            message: None,
        }
    }

    #[test]
    fn test_idle_status() {
        let lines = status_lines(&status());
        assert_eq!(lines[0], "pianola  no song  [idle]");
        assert_eq!(lines[1], "--:-- / --:--  speed 1.0x  octave +0  loop off");
        assert_eq!(lines[2], "");
    }

    #[test]
    fn test_playing_status() {
        let mut status = status();
        status.song = Some("waltz.mid".into());
        status.octave_shift = -1;
        status.recording = true;
        status.instrument = Some("Organ".into());
        status.transport = Some(TransportStatus {
            state: TransportState::Paused(PauseReason::User),
            elapsed: 75.4,
            total: 130.0,
            speed: 1.0,
            octave_shift: -1,
            looping: false,
            cursor: 10,
            events: 40,
        });

        let lines = status_lines(&status);
        assert_eq!(lines[0], "pianola  waltz.mid  [paused (User)]");
        assert!(lines[1].starts_with("01:15 / 02:10"));
        assert!(lines[1].contains("octave -1"));
        assert_eq!(lines[2], "REC  instrument: Organ");
    }
}
