use crate::{
    effect::{PerfEffect, PerfEffectKind, StepEffect, StepEffectKind},
    model::{
        EnvelopePoint, Instrument, Module, OrderEntry, Pattern, PerfList, PerfRow, Song,
        SongData, Step, Vibrato, VolumeEnvelope, WaveParam,
    },
};

pub const DEMO_AUTHOR: &str = "gaxplay";
pub const DEMO_STEP_COUNT: u16 = 16;
pub const LEAD: u8 = 1;
pub const BASS: u8 = 2;
pub const BLIP: u8 = 3;

/// A small two-channel module with one music song and one FX object.
#[must_use]
pub fn demo_module() -> Module {
    let mut module = Module::new(DEMO_AUTHOR);
    module.waveforms.push(square_wave(32));
    module.waveforms.push(saw_wave(64));
    module
        .instruments
        .extend([lead_instrument(), bass_instrument(), blip_instrument()]);
    module.songs.push(Song::new("Demo", demo_song()));
    module.songs.push(Song::new("", SongData::fx_object()));
    module
}

#[must_use]
pub fn square_wave(len: usize) -> Vec<u8> {
    (0..len)
        .map(|index| if index < len / 2 { 0xC0 } else { 0x40 })
        .collect()
}

#[must_use]
pub fn saw_wave(len: usize) -> Vec<u8> {
    let len = len.max(1);
    (0..len).map(|index| (index * 256 / len) as u8).collect()
}

fn looping(len: u32) -> WaveParam {
    WaveParam {
        loop_start: 0,
        loop_end: len,
        ..WaveParam::default()
    }
}

fn lead_instrument() -> Instrument {
    let mut instrument = Instrument::with_waveform(1, looping(32));
    instrument.vibrato = Vibrato {
        wait: 8,
        depth: 48,
        speed: 6,
    };
    instrument.envelope = VolumeEnvelope {
        points: vec![
            EnvelopePoint::new(0, 0),
            EnvelopePoint::new(4, 255),
            EnvelopePoint::new(16, 160),
            EnvelopePoint::new(40, 0),
        ],
        sustain: Some(2),
        loop_start: None,
        loop_end: None,
    };
    instrument
}

fn bass_instrument() -> Instrument {
    let mut instrument = Instrument::with_waveform(2, looping(64));
    let mut octave = PerfRow::new(16, 1);
    octave.effects[0] = Some(PerfEffect::new(PerfEffectKind::JumpToRow, 0));
    instrument.perf_list = PerfList {
        row_speed: 2,
        rows: vec![PerfRow::new(4, 1), octave],
    };
    instrument.envelope = VolumeEnvelope {
        points: vec![EnvelopePoint::new(0, 224), EnvelopePoint::new(12, 128)],
        sustain: Some(1),
        loop_start: None,
        loop_end: None,
    };
    instrument
}

fn blip_instrument() -> Instrument {
    let mut instrument = Instrument::with_waveform(1, WaveParam::default());
    let mut row = PerfRow::new(16, 1);
    row.effects[0] = Some(PerfEffect::new(PerfEffectKind::PitchSlideDown, 8));
    instrument.perf_list = PerfList {
        row_speed: 1,
        rows: vec![row],
    };
    instrument.envelope = VolumeEnvelope {
        points: vec![EnvelopePoint::new(0, 255), EnvelopePoint::new(20, 0)],
        sustain: None,
        loop_start: None,
        loop_end: None,
    };
    instrument
}

fn demo_song() -> SongData {
    let mut song = SongData::new(2, DEMO_STEP_COUNT);
    song.properties.pattern_count = 2;
    song.patterns = vec![lead_intro(), bass_line(), lead_answer()];
    song.order_list = vec![
        vec![OrderEntry::new(0, 0), OrderEntry::new(2, 0)],
        vec![OrderEntry::new(1, 0), OrderEntry::new(1, 5)],
    ];
    song
}

fn pattern(events: &[(usize, Step)]) -> Pattern {
    let mut pattern = Pattern::empty(usize::from(DEMO_STEP_COUNT));
    for (index, step) in events {
        if let Some(slot) = pattern.steps.get_mut(*index) {
            *slot = *step;
        }
    }
    pattern
}

fn lead_intro() -> Pattern {
    pattern(&[
        (
            0,
            Step::note(50, Some(LEAD)).with_effect(StepEffect::new(StepEffectKind::SetSpeed, 4)),
        ),
        (4, Step::note(54, Some(LEAD))),
        (
            8,
            Step::note(57, None).with_effect(StepEffect::new(StepEffectKind::TonePortamento, 3)),
        ),
        (12, Step::note_off()),
    ])
}

fn lead_answer() -> Pattern {
    pattern(&[
        (0, Step::note(55, Some(LEAD))),
        (
            6,
            Step::effect(StepEffect::new(StepEffectKind::VolumeSlideDown, 8)),
        ),
        (
            8,
            Step::note(52, Some(LEAD)).with_effect(StepEffect::new(StepEffectKind::NoteDelay, 2)),
        ),
        (11, Step::note_off()),
        (
            12,
            Step::effect(StepEffect::new(StepEffectKind::PatternBreak, 0)),
        ),
    ])
}

fn bass_line() -> Pattern {
    pattern(&[
        (0, Step::note(26, Some(BASS))),
        (8, Step::note(33, Some(BASS))),
        (
            12,
            Step::effect(StepEffect::new(StepEffectKind::SetVolume, 0xA0)),
        ),
    ])
}
