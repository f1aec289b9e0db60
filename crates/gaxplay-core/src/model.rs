use serde::{Deserialize, Serialize};

use crate::{
    effect::{PerfEffect, StepEffect},
    timing::note_name,
};

pub const DEFAULT_AUTHOR: &str = "Manfred Linzner";
pub const DEFAULT_MIXING_RATE: u16 = 15_769;
pub const DEFAULT_STEP_COUNT: u16 = 64;
pub const DEFAULT_MASTER_VOLUME: u16 = 256;
pub const DEFAULT_FX_CHANNEL_COUNT: u8 = 2;
pub const MAX_CHANNELS: u8 = 32;
pub const MAX_FX_CHANNELS: u8 = 8;
pub const WAVE_SLOTS: usize = 4;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Module {
    pub author: String,
    pub instruments: Vec<Instrument>,
    pub waveforms: Vec<Vec<u8>>,
    pub songs: Vec<Song>,
}

impl Module {
    /// An empty module holding the reserved null instrument and the reserved
    /// empty waveform.
    #[must_use]
    pub fn new(author: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            instruments: vec![Instrument::null()],
            waveforms: vec![Vec::new()],
            songs: Vec::new(),
        }
    }

    #[must_use]
    pub fn song(&self, index: usize) -> Option<&Song> {
        self.songs.get(index)
    }

    #[must_use]
    pub fn music_songs(&self) -> impl Iterator<Item = &Song> {
        self.songs.iter().filter(|song| !song.data.is_fx_object())
    }

    #[must_use]
    pub fn step_count(&self) -> usize {
        self.songs
            .iter()
            .flat_map(|song| song.data.patterns.iter())
            .map(|pattern| pattern.steps.len())
            .sum()
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new(DEFAULT_AUTHOR)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Song {
    pub name: String,
    pub data: SongData,
}

impl Song {
    #[must_use]
    pub fn new(name: impl Into<String>, data: SongData) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct SongProperties {
    pub channel_count: u8,
    pub step_count: u16,
    pub pattern_count: u16,
    pub restart_position: u16,
    pub master_volume: u16,
    pub mixing_rate: u16,
    /// 0 plays FX at the music mixing rate.
    pub fx_mixing_rate: u16,
    pub fx_channel_count: u8,
}

impl Default for SongProperties {
    fn default() -> Self {
        Self {
            channel_count: 0,
            step_count: DEFAULT_STEP_COUNT,
            pattern_count: 1,
            restart_position: 0,
            master_volume: DEFAULT_MASTER_VOLUME,
            mixing_rate: DEFAULT_MIXING_RATE,
            fx_mixing_rate: 0,
            fx_channel_count: DEFAULT_FX_CHANNEL_COUNT,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct OrderEntry {
    pub pattern: u16,
    pub transpose: i8,
}

impl OrderEntry {
    #[must_use]
    pub fn new(pattern: u16, transpose: i8) -> Self {
        Self { pattern, transpose }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SongData {
    pub properties: SongProperties,
    /// One list per channel, each `pattern_count` entries long.
    pub order_list: Vec<Vec<OrderEntry>>,
    pub patterns: Vec<Pattern>,
}

impl SongData {
    /// Song template with one song position; channel `n` plays pattern `n`.
    #[must_use]
    pub fn new(channel_count: u8, step_count: u16) -> Self {
        let channel_count = channel_count.min(MAX_CHANNELS);
        Self {
            properties: SongProperties {
                channel_count,
                step_count,
                ..SongProperties::default()
            },
            order_list: (0..u16::from(channel_count))
                .map(|channel| vec![OrderEntry::new(channel, 0)])
                .collect(),
            patterns: (0..channel_count)
                .map(|_| Pattern::empty(usize::from(step_count)))
                .collect(),
        }
    }

    /// Properties-only record carrying instruments and waveforms for sound
    /// effects.
    #[must_use]
    pub fn fx_object() -> Self {
        Self {
            properties: SongProperties {
                channel_count: 0,
                step_count: 0,
                pattern_count: 0,
                ..SongProperties::default()
            },
            order_list: Vec::new(),
            patterns: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_fx_object(&self) -> bool {
        self.properties.channel_count == 0
    }

    #[must_use]
    pub fn pattern(&self, index: u16) -> Option<&Pattern> {
        self.patterns.get(usize::from(index))
    }

    /// The order entry a channel plays at a song position.
    #[must_use]
    pub fn entry(&self, channel: usize, position: usize) -> Option<OrderEntry> {
        self.order_list
            .get(channel)
            .and_then(|list| list.get(position))
            .copied()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Pattern {
    pub steps: Vec<Step>,
}

impl Pattern {
    #[must_use]
    pub fn new(steps: Vec<Step>) -> Self {
        Self { steps }
    }

    #[must_use]
    pub fn empty(step_count: usize) -> Self {
        Self {
            steps: vec![Step::default(); step_count],
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.iter().all(Step::is_empty)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Note {
    /// Raw semitone byte, 2..=127. `C-0` is 2.
    On(u8),
    Off,
}

impl Note {
    #[must_use]
    pub fn semitone(self) -> Option<u8> {
        match self {
            Self::On(semitone) => Some(semitone),
            Self::Off => None,
        }
    }

    #[must_use]
    pub fn name(self) -> String {
        match self {
            Self::On(semitone) => note_name(semitone),
            Self::Off => "OFF".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Step {
    pub note: Option<Note>,
    pub instrument: Option<u8>,
    pub effect: Option<StepEffect>,
}

impl Step {
    #[must_use]
    pub fn note(semitone: u8, instrument: Option<u8>) -> Self {
        Self {
            note: Some(Note::On(semitone)),
            instrument,
            effect: None,
        }
    }

    #[must_use]
    pub fn note_off() -> Self {
        Self {
            note: Some(Note::Off),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn effect(effect: StepEffect) -> Self {
        Self {
            effect: Some(effect),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_effect(mut self, effect: StepEffect) -> Self {
        self.effect = Some(effect);
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.note.is_none() && self.instrument.is_none() && self.effect.is_none()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Vibrato {
    pub wait: u8,
    pub depth: u8,
    pub speed: u8,
}

impl Vibrato {
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.wait == 0 && self.depth == 0 && self.speed == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PerfRow {
    /// 0 keeps the current perf pitch.
    pub note: u8,
    pub fixed: bool,
    /// 1-based wave slot, 0 keeps the current slot.
    pub wave_slot: u8,
    pub effects: [Option<PerfEffect>; 2],
}

impl PerfRow {
    #[must_use]
    pub fn new(note: u8, wave_slot: u8) -> Self {
        Self {
            note,
            wave_slot,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PerfList {
    pub row_speed: u8,
    pub rows: Vec<PerfRow>,
}

impl Default for PerfList {
    fn default() -> Self {
        Self {
            row_speed: 1,
            rows: vec![PerfRow::new(0, 1)],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvelopePoint {
    pub time: u16,
    pub volume: u8,
}

impl EnvelopePoint {
    #[must_use]
    pub fn new(time: u16, volume: u8) -> Self {
        Self { time, volume }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeEnvelope {
    pub points: Vec<EnvelopePoint>,
    pub sustain: Option<u8>,
    pub loop_start: Option<u8>,
    pub loop_end: Option<u8>,
}

impl VolumeEnvelope {
    #[must_use]
    pub fn flat(volume: u8) -> Self {
        Self {
            points: vec![EnvelopePoint::new(0, volume)],
            sustain: None,
            loop_start: None,
            loop_end: None,
        }
    }

    #[must_use]
    pub fn loop_region(&self) -> Option<(usize, usize)> {
        match (self.loop_start, self.loop_end) {
            (Some(start), Some(end)) => Some((usize::from(start), usize::from(end))),
            _ => None,
        }
    }
}

impl Default for VolumeEnvelope {
    fn default() -> Self {
        Self::flat(255)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WaveParam {
    pub finetune: i16,
    pub modulate: bool,
    pub ping_pong: bool,
    pub start_position: u32,
    pub loop_start: u32,
    pub loop_end: u32,
    pub modulate_size: i32,
    pub modulate_step: u16,
    pub modulate_speed: u16,
}

impl WaveParam {
    #[must_use]
    pub fn is_looping(&self) -> bool {
        self.loop_end > 0
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Instrument {
    pub is_null: bool,
    /// Waveform indices, 0 marks an unused slot.
    pub wave_slots: [u8; WAVE_SLOTS],
    pub vibrato: Vibrato,
    pub perf_list: PerfList,
    pub envelope: VolumeEnvelope,
    pub wave_params: [Option<WaveParam>; WAVE_SLOTS],
    pub reserved: u16,
}

impl Instrument {
    /// The silent placeholder instrument.
    #[must_use]
    pub fn null() -> Self {
        Self {
            is_null: true,
            wave_slots: [0; WAVE_SLOTS],
            vibrato: Vibrato::default(),
            perf_list: PerfList::default(),
            envelope: VolumeEnvelope::default(),
            wave_params: [Some(WaveParam::default()), None, None, None],
            reserved: 0,
        }
    }

    /// Plays `waveform` once through slot 1 with a flat envelope.
    #[must_use]
    pub fn with_waveform(waveform: u8, params: WaveParam) -> Self {
        Self {
            is_null: false,
            wave_slots: [waveform, 0, 0, 0],
            perf_list: PerfList {
                row_speed: 1,
                rows: vec![PerfRow::new(4, 1)],
            },
            wave_params: [Some(params), None, None, None],
            ..Self::null()
        }
    }

    #[must_use]
    pub fn used_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.wave_slots
            .iter()
            .enumerate()
            .filter(|(_, waveform)| **waveform != 0)
            .map(|(slot, _)| slot)
    }

    #[must_use]
    pub fn has_used_slots(&self) -> bool {
        self.wave_slots.iter().any(|waveform| *waveform != 0)
    }
}

impl Default for Instrument {
    fn default() -> Self {
        Self {
            is_null: false,
            ..Self::null()
        }
    }
}
