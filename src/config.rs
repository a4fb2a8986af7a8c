use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::synth::InstrumentBank;

pub const DEFAULT_SETTINGS_FILE: &str = "pianola.ron";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeedSettings {
    pub default: f64,
    pub step: f64,
    pub min: f64,
    pub max: f64,
}

impl SpeedSettings {
    pub fn clamp(&self, speed: f64) -> f64 {
        if speed.is_nan() {
            return self.default;
        }
        speed.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OctaveSettings {
    pub min: i32,
    pub max: i32,
}

impl OctaveSettings {
    pub fn clamp(&self, octave: i32) -> i32 {
        octave.clamp(self.min, self.max)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveSettings {
    /// Channel used for notes played from the keyboard and for replays.
    pub channel: u8,
    pub velocity: u8,
    /// Terminal keys repeat instead of reporting release; a key counts as
    /// released when no repeat arrived for this long.
    pub release_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tick_ms: u64,
    pub log_file: PathBuf,
    pub song_dir: PathBuf,
    pub speed: SpeedSettings,
    pub octave: OctaveSettings,
    pub seek_step_secs: f64,
    pub loop_by_default: bool,
    pub live: LiveSettings,
    pub keymap: Vec<(char, u8)>,
    pub bank: InstrumentBank,
    /// Substring of the MIDI input port to open. `None` disables MIDI input.
    pub midi_input: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tick_ms: 10,
            log_file: PathBuf::from("pianola.log"),
            song_dir: PathBuf::from("."),
            speed: SpeedSettings {
                default: 1.0,
                step: 0.1,
                min: 0.1,
                max: 4.0,
            },
            octave: OctaveSettings { min: -4, max: 4 },
            seek_step_secs: 5.0,
            loop_by_default: false,
            live: LiveSettings {
                channel: 0,
                velocity: 127,
                release_ms: 100,
            },
            keymap: default_keymap(),
            bank: InstrumentBank::default(),
            midi_input: None,
        }
    }
}

fn default_keymap() -> Vec<(char, u8)> {
    vec![
        ('z', 48),
        ('s', 49),
        ('x', 50),
        ('d', 51),
        ('c', 52),
        ('v', 53),
        ('g', 54),
        ('b', 55),
        ('h', 56),
        ('n', 57),
        ('j', 58),
        ('m', 59),
        (',', 60),
        ('l', 61),
        ('.', 62),
        (';', 63),
        ('/', 64),
        ('q', 65),
        ('w', 67),
        ('e', 69),
        ('r', 71),
        ('t', 72),
        ('y', 74),
        ('u', 76),
        ('i', 77),
        ('o', 79),
        ('p', 81),
        ('=', 84),
    ]
}

/// Where [`Settings::load_or_default`] got its values from.
#[derive(Debug)]
pub enum SettingsSource {
    File,
    Defaults,
    Ignored(ConfigError),
}

impl SettingsSource {
    pub fn report(&self, path: &Path) {
        match self {
            SettingsSource::File => info!("settings loaded from {}", path.display()),
            SettingsSource::Defaults => {
                info!("no settings at {}, using defaults", path.display())
            }
            SettingsSource::Ignored(e) => {
                warn!("ignoring settings at {}: {}", path.display(), e)
            }
        }
    }
}

impl Settings {
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let ron_string = ron::ser::to_string_pretty(self, ron::ser::PrettyConfig::default())?;
        fs::write(path, ron_string)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let ron_string = fs::read_to_string(path)?;
        let settings: Settings = ron::from_str(&ron_string)?;
        Ok(settings.sanitized())
    }

    /// Missing file means defaults; a broken file is ignored. Nothing is
    /// logged here since the log file itself comes from the settings; call
    /// [`SettingsSource::report`] once logging is up.
    pub fn load_or_default(path: &Path) -> (Self, SettingsSource) {
        match Self::load(path) {
            Ok(settings) => (settings, SettingsSource::File),
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                (Self::default(), SettingsSource::Defaults)
            }
            Err(e) => (Self::default(), SettingsSource::Ignored(e)),
        }
    }

    /// Puts every numeric field back into a usable range.
    pub fn sanitized(mut self) -> Self {
        let defaults = Settings::default();

        self.tick_ms = self.tick_ms.clamp(1, 100);

        let speed = &mut self.speed;
        if !(speed.min.is_finite() && speed.min > 0.0) {
            speed.min = defaults.speed.min;
        }
        if !(speed.max.is_finite() && speed.max >= speed.min) {
            speed.max = defaults.speed.max.max(speed.min);
        }
        if !(speed.step.is_finite() && speed.step > 0.0) {
            speed.step = defaults.speed.step;
        }
        speed.default = if speed.default.is_finite() {
            speed.default.clamp(speed.min, speed.max)
        } else {
            1.0_f64.clamp(speed.min, speed.max)
        };

        if self.octave.min > self.octave.max {
            std::mem::swap(&mut self.octave.min, &mut self.octave.max);
        }
        self.octave.min = self.octave.min.clamp(-10, 0);
        self.octave.max = self.octave.max.clamp(0, 10);

        if !(self.seek_step_secs.is_finite() && self.seek_step_secs > 0.0) {
            self.seek_step_secs = defaults.seek_step_secs;
        }

        self.live.channel = self.live.channel.min(15);
        self.live.velocity = self.live.velocity.clamp(1, 127);
        self.keymap.retain(|(_, note)| *note <= 127);

        if self.bank.is_empty() {
            self.bank = defaults.bank;
        }
        self
    }

    pub fn note_for_key(&self, key: char) -> Option<u8> {
        self.keymap
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, note)| *note)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ron");

        let mut settings = Settings::default();
        settings.loop_by_default = true;
        settings.midi_input = Some("Keystation".into());
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_take_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ron");
        fs::write(&path, "(tick_ms: 20, seek_step_secs: 2.5)").unwrap();

        let loaded = Settings::load(&path).unwrap();
        assert_eq!(loaded.tick_ms, 20);
        assert_eq!(loaded.seek_step_secs, 2.5);
        assert_eq!(loaded.keymap, default_keymap());
    }

    #[test]
    fn test_broken_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.ron");
        fs::write(&path, "(tick_ms: ").unwrap();

        assert!(Settings::load(&path).is_err());
        let (settings, source) = Settings::load_or_default(&path);
        assert_eq!(settings, Settings::default());
        assert!(matches!(source, SettingsSource::Ignored(ConfigError::Parse(_))));
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let (settings, source) = Settings::load_or_default(&dir.path().join("absent.ron"));
        assert_eq!(settings, Settings::default());
        assert!(matches!(source, SettingsSource::Defaults));
    }

    #[test]
    fn test_sanitize_clamps() {
        let mut settings = Settings::default();
        settings.tick_ms = 0;
        settings.speed.min = -1.0;
        settings.speed.default = 50.0;
        settings.speed.step = f64::NAN;
        settings.octave = OctaveSettings { min: 3, max: -3 };
        settings.live.channel = 42;
        settings.live.velocity = 0;
        settings.keymap.push(('k', 200));

        let settings = settings.sanitized();
        assert_eq!(settings.tick_ms, 1);
        assert_eq!(settings.speed.min, 0.1);
        assert_eq!(settings.speed.default, settings.speed.max);
        assert_eq!(settings.speed.step, 0.1);
        assert_eq!(settings.octave, OctaveSettings { min: -3, max: 3 });
        assert_eq!(settings.live.channel, 15);
        assert_eq!(settings.live.velocity, 1);
        assert_eq!(settings.note_for_key('k'), None);
    }

    #[test]
    fn test_speed_clamp() {
        let speed = Settings::default().speed;
        assert_eq!(speed.clamp(0.0), 0.1);
        assert_eq!(speed.clamp(9.0), 4.0);
        assert_eq!(speed.clamp(f64::NAN), 1.0);
    }

    #[test]
    fn test_keymap_lookup() {
        let settings = Settings::default();
        assert_eq!(settings.note_for_key(','), Some(60));
        assert_eq!(settings.note_for_key('z'), Some(48));
        assert_eq!(settings.note_for_key('1'), None);
    }
}
