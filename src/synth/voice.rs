use serde::{Deserialize, Serialize};

use super::instrument::{Instrument, Wave};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

impl ADSRConfig {
    pub const fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
    Done,
}

/// One sounding note inside the software synth.
#[derive(Debug, Clone)]
pub struct Voice {
    pub channel: u8,
    pub note: u8,
    pub velocity: u8,
    pub state: EnvelopeState,
    level: f32,
    phases: Vec<f32>,
    noise: u32,
}

impl Voice {
    pub fn new(channel: u8, note: u8, velocity: u8, instrument: &Instrument) -> Self {
        Self {
            channel,
            note,
            velocity,
            state: EnvelopeState::Attack { time: 0.0 },
            level: 0.0,
            phases: vec![0.0; instrument.oscillators.len()],
            noise: 0x1234_5678 ^ ((note as u32) << 8 | channel as u32),
        }
    }

    pub fn release(&mut self) {
        if !matches!(self.state, EnvelopeState::Release { .. } | EnvelopeState::Done) {
            self.state = EnvelopeState::Release {
                time: 0.0,
                from: self.level,
            };
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == EnvelopeState::Done
    }

    pub fn is_held(&self) -> bool {
        !matches!(self.state, EnvelopeState::Release { .. } | EnvelopeState::Done)
    }

    /// Renders one mono sample and advances the voice by one frame.
    pub fn render_sample(&mut self, instrument: &Instrument, sample_rate: f32) -> f32 {
        let dt = 1.0 / sample_rate;
        let envelope = self.advance_envelope(&instrument.adsr, dt);
        let velocity_scale = self.velocity as f32 / 127.0;

        let mut sample = 0.0;
        for (i, osc) in instrument.oscillators.iter().enumerate() {
            let Some(phase) = self.phases.get_mut(i) else {
                break;
            };
            let pitch = self.note as f32 + osc.semitone as f32;
            let freq = pitch_to_freq(pitch);

            let value = match osc.wave {
                Wave::Sine => (*phase * 2.0 * std::f32::consts::PI).sin(),
                Wave::Square => {
                    if *phase < 0.5 {
                        -1.0
                    } else {
                        1.0
                    }
                }
                Wave::Saw => *phase * 2.0 - 1.0,
                Wave::Triangle => 1.0 - 4.0 * (*phase - 0.5).abs(),
                Wave::Noise => {
                    // xorshift32
                    self.noise ^= self.noise << 13;
                    self.noise ^= self.noise >> 17;
                    self.noise ^= self.noise << 5;
                    (self.noise as f32 / u32::MAX as f32) * 2.0 - 1.0
                }
            };
            sample += value * osc.gain;

            *phase += freq / sample_rate;
            if *phase >= 1.0 {
                *phase -= 1.0;
            }
        }

        sample * envelope * velocity_scale
    }

    fn advance_envelope(&mut self, adsr: &ADSRConfig, dt: f32) -> f32 {
        self.level = match &mut self.state {
            EnvelopeState::Attack { time } => {
                *time += dt;
                if *time >= adsr.attack {
                    self.state = EnvelopeState::Decay { time: 0.0 };
                    1.0
                } else {
                    *time / adsr.attack
                }
            }
            EnvelopeState::Decay { time } => {
                *time += dt;
                if *time >= adsr.decay {
                    self.state = EnvelopeState::Sustain;
                    adsr.sustain
                } else {
                    1.0 - (1.0 - adsr.sustain) * (*time / adsr.decay)
                }
            }
            EnvelopeState::Sustain => adsr.sustain,
            EnvelopeState::Release { time, from } => {
                *time += dt;
                if *time >= adsr.release {
                    self.state = EnvelopeState::Done;
                    0.0
                } else {
                    *from * (1.0 - *time / adsr.release)
                }
            }
            EnvelopeState::Done => 0.0,
        };
        self.level
    }
}

pub fn pitch_to_freq(pitch: f32) -> f32 {
    440.0 * 2.0_f32.powf((pitch - 69.0) / 12.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::synth::OscConfig;

    fn organ() -> Instrument {
        Instrument {
            name: "test".into(),
            oscillators: vec![OscConfig {
                wave: Wave::Sine,
                gain: 1.0,
                semitone: 0,
            }],
            adsr: ADSRConfig::new(0.01, 0.01, 0.5, 0.01),
            pan: 0.0,
        }
    }

    #[test]
    fn test_envelope_reaches_sustain_then_finishes() {
        let instrument = organ();
        let mut voice = Voice::new(0, 69, 127, &instrument);

        for _ in 0..1000 {
            voice.render_sample(&instrument, 48_000.0);
        }
        assert_eq!(voice.state, EnvelopeState::Sustain);
        assert!(voice.is_held());

        voice.release();
        assert!(!voice.is_held());
        for _ in 0..1000 {
            voice.render_sample(&instrument, 48_000.0);
        }
        assert!(voice.is_done());
    }

    #[test]
    fn test_output_is_bounded() {
        let instrument = organ();
        let mut voice = Voice::new(0, 60, 127, &instrument);
        for _ in 0..4800 {
            let s = voice.render_sample(&instrument, 48_000.0);
            assert!(s.abs() <= 1.0 + 1e-6);
        }
    }

    #[test]
    fn test_pitch_to_freq() {
        assert!((pitch_to_freq(69.0) - 440.0).abs() < 1e-3);
        assert!((pitch_to_freq(81.0) - 880.0).abs() < 1e-2);
    }
}
