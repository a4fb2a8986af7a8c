use std::collections::BTreeSet;

/// Piano range shown on the note strip, A0 to C8.
pub const LOWEST_NOTE: u8 = 21;
pub const HIGHEST_NOTE: u8 = 108;

const NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Note name with octave, middle C (60) being `C4`.
pub fn note_name(note: u8) -> String {
    let octave = note as i32 / 12 - 1;
    format!("{}{}", NAMES[note as usize % 12], octave)
}

pub fn is_black_key(note: u8) -> bool {
    matches!(note % 12, 1 | 3 | 6 | 8 | 10)
}

/// One cell per key in the piano range: lit keys are solid, the rest show
/// the white/black pattern.
pub fn note_strip(lit: &BTreeSet<u8>) -> String {
    (LOWEST_NOTE..=HIGHEST_NOTE)
        .map(|note| {
            if lit.contains(&note) {
                '█'
            } else if is_black_key(note) {
                '▄'
            } else {
                '_'
            }
        })
        .collect()
}

/// Names of the lit notes, lowest first.
pub fn chord_label(lit: &BTreeSet<u8>) -> String {
    lit.iter()
        .map(|n| note_name(*n))
        .collect::<Vec<_>>()
        .join(" ")
}
