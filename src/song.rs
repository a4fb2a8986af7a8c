//! Song files: Standard MIDI Files and RON event lists.

use std::fs;
use std::path::{Path, PathBuf};

use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::LoadError;
use crate::events::Event;
use crate::timing::EventSequence;

/// 120 bpm, the SMF default until a tempo event says otherwise.
const DEFAULT_TEMPO_US: u32 = 500_000;

pub const SONG_EXTENSIONS: &[&str] = &["mid", "midi", "ron"];

/// A decoded song: events with the delay since the previous one, in seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    pub name: String,
    pub events: Vec<(f64, Event)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongFile {
    pub name: String,
    pub events: Vec<SongEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SongEntry {
    /// Missing delay means "together with the previous event".
    #[serde(default)]
    pub delay: Option<f64>,
    pub event: Event,
}

impl Song {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();

        match extension.as_str() {
            "mid" | "midi" => {
                let bytes = fs::read(path).map_err(|source| io_error(path, source))?;
                Self::from_smf_bytes(name, &bytes)
            }
            "ron" => {
                let text = fs::read_to_string(path).map_err(|source| io_error(path, source))?;
                let file: SongFile = ron::from_str(&text)?;
                Self::try_from(file)
            }
            _ => Err(LoadError::UnsupportedFormat(path.display().to_string())),
        }
    }

    /// Decodes a Standard MIDI File.
    ///
    /// Tracks are merged by absolute tick; events on the same tick keep track
    /// order. Tempo changes apply from their tick onwards. Format 2 files play
    /// their tracks one after another.
    pub fn from_smf_bytes(name: String, bytes: &[u8]) -> Result<Self, LoadError> {
        let smf = Smf::parse(bytes)?;

        let mut merged: Vec<(u64, TrackEventKind)> = Vec::new();
        let mut track_offset = 0u64;
        for track in &smf.tracks {
            let mut tick = track_offset;
            for event in track {
                tick += event.delta.as_int() as u64;
                merged.push((tick, event.kind));
            }
            if smf.header.format == Format::Sequential {
                track_offset = tick;
            }
        }
        merged.sort_by_key(|(tick, _)| *tick);

        let mut tempo_us = DEFAULT_TEMPO_US;
        let mut last_tick = 0u64;
        let mut events = Vec::with_capacity(merged.len());
        for (tick, kind) in merged {
            let ticks = (tick - last_tick) as f64;
            let delay = match smf.header.timing {
                Timing::Metrical(ppq) => {
                    ticks * tempo_us as f64 / 1_000_000.0 / ppq.as_int().max(1) as f64
                }
                Timing::Timecode(fps, subframes) => {
                    ticks / (fps.as_f32() as f64 * subframes.max(1) as f64)
                }
            };
            last_tick = tick;

            if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = kind {
                tempo_us = tempo.as_int();
            }
            events.push((delay, convert(kind)));
        }

        debug!(
            "decoded {} tracks, {} events from {:?}",
            smf.tracks.len(),
            events.len(),
            name
        );
        Ok(Self { name, events })
    }

    pub fn to_sequence(&self) -> EventSequence {
        EventSequence::build(self.events.iter().copied())
    }
}

impl TryFrom<SongFile> for Song {
    type Error = LoadError;

    /// Rejects events outside the MIDI ranges so they never reach the synth.
    fn try_from(file: SongFile) -> Result<Self, LoadError> {
        let events = file
            .events
            .into_iter()
            .enumerate()
            .map(|(index, entry)| {
                if entry.event.in_range() {
                    Ok((entry.delay.unwrap_or(0.0), entry.event))
                } else {
                    Err(LoadError::InvalidEvent {
                        index,
                        event: entry.event,
                    })
                }
            })
            .collect::<Result<_, _>>()?;
        Ok(Self {
            name: file.name,
            events,
        })
    }
}

fn convert(kind: TrackEventKind) -> Event {
    let TrackEventKind::Midi { channel, message } = kind else {
        return Event::Ignored;
    };
    let channel = channel.as_int();
    match message {
        MidiMessage::NoteOn { key, vel } => Event::NoteOn {
            channel,
            note: key.as_int(),
            velocity: vel.as_int(),
        },
        MidiMessage::NoteOff { key, .. } => Event::NoteOff {
            channel,
            note: key.as_int(),
        },
        MidiMessage::ProgramChange { program } => Event::ProgramChange {
            channel,
            program: program.as_int(),
        },
        _ => Event::Ignored,
    }
}

fn io_error(path: &Path, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Song files directly inside `dir`, sorted by name.
pub fn list_songs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut songs: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path
                    .extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| SONG_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        })
        .collect();
    songs.sort();
    Ok(songs)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Format 1, 480 ppq. Track 0 sets 240 bpm, track 1 holds C4 for one beat
    /// and changes program.
    fn two_track_smf() -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&[0, 0, 0, 6, 0, 1, 0, 2, 0x01, 0xE0]);

        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&[0, 0, 0, 11]);
        bytes.extend_from_slice(&[0x00, 0xFF, 0x51, 0x03, 0x03, 0xD0, 0x90]);
        bytes.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&[0, 0, 0, 16]);
        bytes.extend_from_slice(&[0x00, 0xC1, 0x05]);
        bytes.extend_from_slice(&[0x00, 0x91, 0x3C, 0x64]);
        bytes.extend_from_slice(&[0x83, 0x60, 0x81, 0x3C, 0x40]);
        bytes.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);
        bytes
    }

    #[test]
    fn test_smf_tracks_merged_with_tempo() {
        let song = Song::from_smf_bytes("demo".into(), &two_track_smf()).unwrap();
        let sequence = song.to_sequence();

        let playable: Vec<_> = sequence
            .events()
            .iter()
            .filter(|e| e.event != Event::Ignored)
            .collect();
        assert_eq!(playable.len(), 3);
        assert_eq!(
            playable[0].event,
            Event::ProgramChange {
                channel: 1,
                program: 5
            }
        );
        assert_eq!(
            playable[1].event,
            Event::NoteOn {
                channel: 1,
                note: 60,
                velocity: 100
            }
        );
        assert_eq!(playable[2].event, Event::NoteOff { channel: 1, note: 60 });
        assert!((playable[2].time - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_smf_default_tempo() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"MThd");
        bytes.extend_from_slice(&[0, 0, 0, 6, 0, 0, 0, 1, 0x01, 0xE0]);
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&[0, 0, 0, 13]);
        bytes.extend_from_slice(&[0x00, 0x90, 0x40, 0x50]);
        bytes.extend_from_slice(&[0x83, 0x60, 0x90, 0x40, 0x00]);
        bytes.extend_from_slice(&[0x00, 0xFF, 0x2F, 0x00]);

        let song = Song::from_smf_bytes("plain".into(), &bytes).unwrap();
        let sequence = song.to_sequence();
        assert!((sequence.total_duration() - 0.5).abs() < 1e-9);
        assert!(sequence.events()[1].event.is_note_off());
    }

    #[test]
    fn test_garbage_is_a_midi_error() {
        let result = Song::from_smf_bytes("junk".into(), b"not a midi file");
        assert!(matches!(result, Err(LoadError::Midi(_))));
    }

    #[test]
    fn test_ron_song() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scale.ron");
        fs::write(
            &path,
            r#"(
                name: "scale",
                events: [
                    (event: NoteOn(channel: 0, note: 60, velocity: 90)),
                    (delay: Some(0.5), event: NoteOff(channel: 0, note: 60)),
                    (delay: Some(-1.0), event: Ignored),
                ],
            )"#,
        )
        .unwrap();

        let song = Song::load(&path).unwrap();
        assert_eq!(song.name, "scale");
        let sequence = song.to_sequence();
        assert_eq!(sequence.len(), 3);
        assert_eq!(sequence.total_duration(), 0.5);
    }

    #[test]
    fn test_ron_song_rejects_out_of_range_events() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.ron");
        fs::write(
            &path,
            r#"(
                name: "bad",
                events: [
                    (event: NoteOn(channel: 0, note: 60, velocity: 90)),
                    (delay: Some(0.5), event: NoteOn(channel: 20, note: 60, velocity: 90)),
                ],
            )"#,
        )
        .unwrap();

        let result = Song::load(&path);
        assert!(matches!(
            result,
            Err(LoadError::InvalidEvent { index: 1, .. })
        ));
    }

    #[test]
    fn test_unknown_extension() {
        let result = Song::load(Path::new("song.wav"));
        assert!(matches!(result, Err(LoadError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_list_songs_filters_by_extension() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.mid", "a.RON", "notes.txt"] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        let songs = list_songs(dir.path()).unwrap();
        let names: Vec<_> = songs
            .iter()
            .filter_map(|p| p.file_name()?.to_str())
            .collect();
        assert_eq!(names, vec!["a.RON", "b.mid"]);
    }
}
