/// GBA LCD refresh rate; the engine ticks once per frame.
pub const FRAME_RATE: f64 = 59.7275;

/// Mixing rates selectable in the engine, in Hz.
pub const MIXING_RATES: [u16; 13] = [
    5_735, 9_079, 10_513, 11_469, 13_380, 15_769, 18_158, 21_025, 26_760, 31_537, 36_316, 40_138,
    42_049,
];

pub const MIN_MIXING_RATE: u16 = MIXING_RATES[0];
pub const MAX_MIXING_RATE: u16 = MIXING_RATES[MIXING_RATES.len() - 1];

/// Vibrato waveform, ripped from engine version 3.05.
pub const SINE_TABLE: [i8; 64] = [
    0, 12, 24, 37, 48, 60, 70, 80, 90, 98, 106, 112, 117, 122, 125, 126, 127, 126, 125, 122, 117,
    112, 106, 98, 90, 80, 70, 60, 48, 37, 24, 12, 0, -12, -24, -37, -48, -60, -70, -80, -90, -98,
    -106, -112, -117, -122, -125, -126, -127, -126, -125, -122, -117, -112, -106, -98, -90, -80,
    -70, -60, -48, -37, -24, -12,
];

const NOTE_NAMES: [&str; 12] = [
    "C-", "C#", "D-", "D#", "E-", "F-", "F#", "G-", "G#", "A-", "A#", "B-",
];

/// Pitch correction between the raw semitone byte and the note table.
const NOTE_BASE: i32 = 2;

#[must_use]
pub fn period(semitone: f64) -> f64 {
    7680.0 - semitone * 64.0
}

#[must_use]
pub fn frequency(period: f64) -> f64 {
    8363.0 * 2.0_f64.powf((4608.0 - period) / 768.0)
}

/// Waveform bytes advanced per output sample.
#[must_use]
pub fn step_rate(semitone: f64, mixing_rate: u32) -> f64 {
    if mixing_rate == 0 {
        return 0.0;
    }
    frequency(period(semitone)) / f64::from(mixing_rate)
}

#[must_use]
pub fn samples_per_tick(mixing_rate: u32, frame_rate: f64) -> usize {
    if frame_rate <= 0.0 {
        return 0;
    }
    (f64::from(mixing_rate) / frame_rate) as usize
}

#[must_use]
pub fn ticks_to_seconds(ticks: u64, frame_rate: f64) -> f64 {
    if frame_rate <= 0.0 {
        return 0.0;
    }
    ticks as f64 / frame_rate
}

#[must_use]
pub fn seconds_to_ticks(seconds: f64, frame_rate: f64) -> u64 {
    if seconds <= 0.0 || frame_rate <= 0.0 {
        return 0;
    }
    (seconds * frame_rate).round() as u64
}

#[must_use]
pub fn is_engine_mixing_rate(rate: u16) -> bool {
    MIXING_RATES.contains(&rate)
}

/// Tracker-style name of a raw semitone byte, e.g. 50 is `C-4`.
#[must_use]
pub fn note_name(semitone: u8) -> String {
    let relative = i32::from(semitone) - NOTE_BASE;
    let octave = relative.div_euclid(12);
    let name = NOTE_NAMES[relative.rem_euclid(12) as usize];
    format!("{name}{octave}")
}
