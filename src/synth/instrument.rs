use serde::{Deserialize, Serialize};

use super::voice::ADSRConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Square,
    Saw,
    Triangle,
    Noise,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OscConfig {
    pub wave: Wave,
    pub gain: f32,
    pub semitone: i8,
}

impl OscConfig {
    const fn new(wave: Wave, gain: f32, semitone: i8) -> Self {
        Self {
            wave,
            gain,
            semitone,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub name: String,
    pub oscillators: Vec<OscConfig>,
    pub adsr: ADSRConfig,
    /// -1.0 (left) to 1.0 (right).
    #[serde(default)]
    pub pan: f32,
}

impl Instrument {
    /// Fixed kit used on the percussion channel regardless of program.
    pub fn percussion() -> Self {
        Self {
            name: "Drums".into(),
            oscillators: vec![
                OscConfig::new(Wave::Noise, 0.35, 0),
                OscConfig::new(Wave::Sine, 0.25, -24),
            ],
            adsr: ADSRConfig::new(0.001, 0.12, 0.0, 0.05),
            pan: 0.0,
        }
    }
}

/// Program table: program change `p` selects `instruments[p % len]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentBank {
    pub instruments: Vec<Instrument>,
}

impl InstrumentBank {
    pub fn select(&self, program: u8) -> Option<&Instrument> {
        if self.instruments.is_empty() {
            return None;
        }
        self.instruments
            .get(program as usize % self.instruments.len())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.instruments.iter().map(|i| i.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }
}

impl Default for InstrumentBank {
    fn default() -> Self {
        Self {
            instruments: vec![
                Instrument {
                    name: "Piano".into(),
                    oscillators: vec![
                        OscConfig::new(Wave::Triangle, 0.4, 0),
                        OscConfig::new(Wave::Sine, 0.15, 12),
                    ],
                    adsr: ADSRConfig::new(0.005, 0.6, 0.25, 0.3),
                    pan: 0.0,
                },
                Instrument {
                    name: "Organ".into(),
                    oscillators: vec![
                        OscConfig::new(Wave::Sine, 0.3, 0),
                        OscConfig::new(Wave::Sine, 0.15, 12),
                        OscConfig::new(Wave::Sine, 0.1, 19),
                    ],
                    adsr: ADSRConfig::new(0.01, 0.05, 0.9, 0.08),
                    pan: -0.2,
                },
                Instrument {
                    name: "Strings".into(),
                    oscillators: vec![
                        OscConfig::new(Wave::Saw, 0.2, 0),
                        OscConfig::new(Wave::Saw, 0.1, 12),
                    ],
                    adsr: ADSRConfig::new(0.15, 0.2, 0.8, 0.5),
                    pan: 0.2,
                },
                Instrument {
                    name: "Chiptune".into(),
                    oscillators: vec![OscConfig::new(Wave::Square, 0.2, 0)],
                    adsr: ADSRConfig::new(0.002, 0.1, 0.6, 0.05),
                    pan: 0.0,
                },
            ],
        }
    }
}
