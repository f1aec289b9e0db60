use gaxplay_core::{
    Bank, Channel, ChannelState, EnvelopePoint, Instrument, PerfEffect, PerfEffectKind, PerfList,
    PerfRow, TickContext, Vibrato, VolumeEnvelope, WaveParam,
};

const MIXING_RATE: u32 = 15_769;
const SAMPLES: usize = 264;

fn context() -> TickContext {
    TickContext {
        mixing_rate: MIXING_RATE,
        gain: 1.0,
    }
}

fn looping_square() -> Instrument {
    Instrument::with_waveform(
        1,
        WaveParam {
            loop_start: 0,
            loop_end: 32,
            ..WaveParam::default()
        },
    )
}

fn waveforms() -> Vec<Vec<u8>> {
    vec![Vec::new(), vec![0xC0; 32]]
}

fn tick(channel: &mut Channel, bank: Bank<'_>) -> Vec<f64> {
    let mut out = vec![0.0; SAMPLES];
    channel.tick(bank, context(), &mut out);
    out
}

/// C-4 at this rate reads exactly one waveform byte per sample.
const UNIT_RATE: u32 = 8_363;
const UNIT_SEMITONE: f64 = 48.0;

fn tick_unit(channel: &mut Channel, bank: Bank<'_>, samples: usize) -> Vec<f64> {
    let mut out = vec![0.0; samples];
    let context = TickContext {
        mixing_rate: UNIT_RATE,
        gain: 1.0,
    };
    channel.tick(bank, context, &mut out);
    out
}

/// Bytes that center to 0, 4, 8, ...
fn staircase(len: u8) -> Vec<u8> {
    (0..len).map(|index| 128 + index * 4).collect()
}

#[test]
fn flat_instrument_plays_the_waveform_at_full_scale() {
    let instruments = vec![Instrument::null(), looping_square()];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    assert_eq!(channel.state(), ChannelState::Active);

    let out = tick(&mut channel, bank);
    assert!(out.iter().all(|sample| (*sample - 64.0).abs() < 1e-9));
}

#[test]
fn envelope_holds_at_sustain_until_note_off() {
    let mut instrument = looping_square();
    instrument.envelope = VolumeEnvelope {
        points: vec![
            EnvelopePoint::new(0, 64),
            EnvelopePoint::new(2, 128),
            EnvelopePoint::new(6, 0),
        ],
        sustain: Some(1),
        loop_start: None,
        loop_end: None,
    };
    let instruments = vec![Instrument::null(), instrument];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    let mut volumes = Vec::new();
    for _ in 0..8 {
        tick(&mut channel, bank);
        volumes.push(channel.envelope_volume());
    }
    assert_eq!(volumes, vec![96.0, 128.0, 128.0, 128.0, 128.0, 128.0, 128.0, 128.0]);

    channel.note_off();
    let mut release = Vec::new();
    for _ in 0..4 {
        tick(&mut channel, bank);
        release.push(channel.envelope_volume());
    }
    assert_eq!(release, vec![96.0, 64.0, 32.0, 0.0]);
    assert_eq!(channel.state(), ChannelState::Active);

    let out = tick(&mut channel, bank);
    assert_eq!(channel.state(), ChannelState::Finished);
    assert!(out.iter().all(|sample| *sample == 0.0));
}

#[test]
fn note_off_without_sustain_mutes_a_flat_envelope() {
    let instruments = vec![Instrument::null(), looping_square()];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    tick(&mut channel, bank);
    channel.note_off();
    let out = tick(&mut channel, bank);
    assert_eq!(channel.envelope_volume(), 0.0);
    assert!(out.iter().all(|sample| *sample == 0.0));
}

#[test]
fn tone_portamento_glides_to_the_new_note() {
    let instruments = vec![Instrument::null(), looping_square()];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 40.0);
    tick(&mut channel, bank);

    channel.init(bank, None, 52.0);
    channel.start_portamento(4);
    assert_eq!(channel.semitone(), 40.0);

    let mut path = Vec::new();
    for _ in 0..4 {
        tick(&mut channel, bank);
        path.push(channel.semitone());
    }
    assert_eq!(path, vec![43.0, 46.0, 49.0, 52.0]);
    assert!(!channel.portamento_active());
}

#[test]
fn delayed_note_starts_after_its_delay() {
    let instruments = vec![Instrument::null(), looping_square()];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.schedule_note(Some(1), 50.0, 2);
    for _ in 0..2 {
        let out = tick(&mut channel, bank);
        assert!(channel.has_pending_note());
        assert_eq!(channel.state(), ChannelState::Idle);
        assert!(out.iter().all(|sample| *sample == 0.0));
    }

    tick(&mut channel, bank);
    assert!(!channel.has_pending_note());
    assert_eq!(channel.state(), ChannelState::Active);
    assert_eq!(channel.instrument(), Some(1));
}

#[test]
fn perf_list_jumps_and_sticks_at_the_last_row() {
    let mut jumping = looping_square();
    let mut back = PerfRow::new(16, 1);
    back.effects[0] = Some(PerfEffect::new(PerfEffectKind::JumpToRow, 0));
    jumping.perf_list = PerfList {
        row_speed: 1,
        rows: vec![PerfRow::new(4, 1), back],
    };

    let mut sticky = looping_square();
    sticky.perf_list = PerfList {
        row_speed: 1,
        rows: vec![PerfRow::new(4, 1), PerfRow::new(16, 1)],
    };

    let instruments = vec![Instrument::null(), jumping, sticky];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    let mut rows = Vec::new();
    for _ in 0..4 {
        tick(&mut channel, bank);
        rows.push(channel.row_index());
    }
    assert_eq!(rows, vec![1, 0, 1, 0]);

    channel.init(bank, Some(2), 50.0);
    let mut rows = Vec::new();
    for _ in 0..4 {
        tick(&mut channel, bank);
        rows.push(channel.row_index());
    }
    assert_eq!(rows, vec![1, 1, 1, 1]);
}

#[test]
fn volume_slide_spreads_across_the_tick() {
    let instruments = vec![Instrument::null(), looping_square()];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    channel.set_volume_slide(-64);
    let out = tick(&mut channel, bank);

    assert!((channel.step_volume() - 191.0).abs() < 1e-6);
    assert!(out[0] > out[SAMPLES - 1]);
}

#[test]
fn missing_data_degrades_to_silence() {
    let mut no_wave = looping_square();
    no_wave.wave_slots[0] = 7;
    let mut no_envelope = looping_square();
    no_envelope.envelope.points.clear();

    let instruments = vec![Instrument::null(), no_wave, no_envelope];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(9), 50.0);
    assert_eq!(channel.state(), ChannelState::Idle);
    assert!(tick(&mut channel, bank).iter().all(|sample| *sample == 0.0));

    channel.init(bank, Some(1), 50.0);
    assert!(tick(&mut channel, bank).iter().all(|sample| *sample == 0.0));
    assert_eq!(channel.state(), ChannelState::Active);

    channel.init(bank, Some(2), 50.0);
    assert!(tick(&mut channel, bank).iter().all(|sample| *sample == 0.0));
    assert_eq!(channel.state(), ChannelState::Active);
}

#[test]
fn stop_keeps_the_mix_volume() {
    let instruments = vec![Instrument::null(), looping_square()];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.set_mix_volume(0.5);
    channel.init(bank, Some(1), 50.0);
    let out = tick(&mut channel, bank);
    assert!(out.iter().all(|sample| (*sample - 32.0).abs() < 1e-9));

    channel.stop();
    assert_eq!(channel.state(), ChannelState::Idle);
    assert_eq!(channel.mix_volume(), 0.5);
}

#[test]
fn envelope_loop_region_repeats_until_released() {
    let mut instrument = looping_square();
    instrument.envelope = VolumeEnvelope {
        points: vec![
            EnvelopePoint::new(0, 0),
            EnvelopePoint::new(2, 100),
            EnvelopePoint::new(4, 0),
        ],
        sustain: None,
        loop_start: Some(1),
        loop_end: Some(2),
    };
    let instruments = vec![Instrument::null(), instrument];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    let mut volumes = Vec::new();
    for _ in 0..12 {
        tick(&mut channel, bank);
        volumes.push(channel.envelope_volume());
    }
    assert_eq!(
        volumes,
        vec![50.0, 100.0, 50.0, 0.0, 50.0, 0.0, 50.0, 0.0, 50.0, 0.0, 50.0, 0.0]
    );
    assert_eq!(channel.state(), ChannelState::Active);
}

#[test]
fn forward_and_ping_pong_loops_walk_the_loop_region() {
    let forward = Instrument::with_waveform(
        1,
        WaveParam {
            loop_start: 2,
            loop_end: 6,
            ..WaveParam::default()
        },
    );
    let ping_pong = Instrument::with_waveform(
        1,
        WaveParam {
            loop_start: 2,
            loop_end: 6,
            ping_pong: true,
            ..WaveParam::default()
        },
    );
    let instruments = vec![Instrument::null(), forward, ping_pong];
    let waveforms = vec![Vec::new(), staircase(8)];
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), UNIT_SEMITONE);
    assert_eq!(
        tick_unit(&mut channel, bank, 12),
        vec![4.0, 8.0, 12.0, 16.0, 20.0, 8.0, 12.0, 16.0, 20.0, 8.0, 12.0, 16.0]
    );

    channel.init(bank, Some(2), UNIT_SEMITONE);
    assert_eq!(
        tick_unit(&mut channel, bank, 12),
        vec![4.0, 8.0, 12.0, 16.0, 20.0, 24.0, 20.0, 16.0, 12.0, 8.0, 12.0, 16.0]
    );
}

#[test]
fn wavetable_modulation_sweeps_the_window_each_tick() {
    let instrument = Instrument::with_waveform(
        1,
        WaveParam {
            modulate: true,
            modulate_size: 4,
            modulate_step: 4,
            modulate_speed: 1,
            ..WaveParam::default()
        },
    );
    let instruments = vec![Instrument::null(), instrument];
    let waveforms = vec![Vec::new(), staircase(16)];
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), UNIT_SEMITONE);
    assert_eq!(
        tick_unit(&mut channel, bank, 8),
        vec![4.0, 8.0, 12.0, 0.0, 4.0, 8.0, 12.0, 0.0]
    );
    assert_eq!(
        tick_unit(&mut channel, bank, 8),
        vec![20.0, 24.0, 28.0, 16.0, 20.0, 24.0, 28.0, 16.0]
    );
}

#[test]
fn vibrato_waits_then_follows_the_sine_table() {
    let mut instrument = looping_square();
    instrument.vibrato = Vibrato {
        wait: 2,
        depth: 64,
        speed: 8,
    };
    let instruments = vec![Instrument::null(), instrument];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    channel.init(bank, Some(1), 50.0);
    let mut detune = Vec::new();
    for _ in 0..7 {
        tick(&mut channel, bank);
        detune.push(channel.vibrato_detune());
    }
    assert_eq!(detune, vec![0.0, 0.0, 22.0, 31.0, 22.0, 0.0, -23.0]);
}

#[test]
fn fixed_pitch_rows_ignore_the_step_note() {
    let ramp = WaveParam {
        loop_start: 0,
        loop_end: 256,
        ..WaveParam::default()
    };
    let mut fixed = Instrument::with_waveform(1, ramp);
    fixed.perf_list.rows = vec![PerfRow {
        fixed: true,
        ..PerfRow::new(20, 1)
    }];
    let mut relative = Instrument::with_waveform(1, ramp);
    relative.perf_list.rows = vec![PerfRow::new(20, 1)];

    let instruments = vec![Instrument::null(), fixed, relative];
    let waveforms = vec![Vec::new(), (0..=255).collect()];
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let render = |instrument: u8, semitone: f64| {
        let mut channel = Channel::new();
        channel.init(bank, Some(instrument), semitone);
        let out = tick(&mut channel, bank);
        (channel.perf_semitone(), out)
    };

    let (low_pitch, low) = render(1, 30.0);
    let (high_pitch, high) = render(1, 60.0);
    assert_eq!(low_pitch, 18.0);
    assert_eq!(high_pitch, 18.0);
    assert_eq!(low, high);

    let (relative_pitch, relative_low) = render(2, 30.0);
    let (_, relative_high) = render(2, 60.0);
    assert_eq!(relative_pitch, 16.0);
    assert_ne!(relative_low, relative_high);
}

#[test]
fn perf_pitch_slides_accumulate_per_tick() {
    let slide = |kind: PerfEffectKind| {
        let mut instrument = looping_square();
        let mut row = PerfRow::new(4, 1);
        row.effects[0] = Some(PerfEffect::new(kind, 16));
        instrument.perf_list.rows = vec![row];
        instrument
    };
    let instruments = vec![
        Instrument::null(),
        slide(PerfEffectKind::PitchSlideUp),
        slide(PerfEffectKind::PitchSlideDown),
    ];
    let waveforms = waveforms();
    let bank = Bank {
        instruments: &instruments,
        waveforms: &waveforms,
    };

    let mut channel = Channel::new();
    for (instrument, expected) in [(1, [0.0, 0.5, 1.0, 1.5]), (2, [0.0, -0.5, -1.0, -1.5])] {
        channel.init(bank, Some(instrument), 50.0);
        let mut pitch = Vec::new();
        for _ in 0..4 {
            tick(&mut channel, bank);
            pitch.push(channel.perf_semitone());
        }
        assert_eq!(pitch, expected);
    }
}
