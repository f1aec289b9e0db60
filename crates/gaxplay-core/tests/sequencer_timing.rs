use gaxplay_core::{
    ChannelState, Instrument, Module, Pattern, PlaybackError, PlaybackOptions, Sequencer, Song,
    SongData, Step, StepEffect, StepEffectKind, WaveParam,
    fixtures::{demo_module, square_wave},
};

fn effect(kind: StepEffectKind, param: u8) -> Step {
    Step::effect(StepEffect::new(kind, param))
}

/// One pattern per channel, played at song position 0.
fn module_with(channels: Vec<Vec<Step>>, step_count: u16) -> Module {
    let mut module = Module::new("tests");
    module.waveforms.push(square_wave(32));
    module.instruments.push(Instrument::with_waveform(
        1,
        WaveParam {
            loop_start: 0,
            loop_end: 32,
            ..WaveParam::default()
        },
    ));

    let mut song = SongData::new(channels.len() as u8, step_count);
    song.patterns = channels
        .into_iter()
        .map(|mut steps| {
            steps.resize(usize::from(step_count), Step::default());
            Pattern::new(steps)
        })
        .collect();
    module.songs.push(Song::new("timing", song));
    module
}

/// Ticks on which a fresh row was read.
fn row_ticks(sequencer: &mut Sequencer<'_>, ticks: u64) -> Vec<u64> {
    let mut rows = Vec::new();
    for _ in 0..ticks {
        let pending = sequencer.row_pending();
        sequencer.tick();
        if pending {
            rows.push(sequencer.ticks());
        }
    }
    rows
}

#[test]
fn speed_modulation_alternates_row_lengths() {
    let module = module_with(vec![vec![effect(StepEffectKind::SpeedModulate, 0x64)]], 64);
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    assert_eq!(sequencer.speed(), [6, 6]);
    sequencer.tick();
    assert_eq!(sequencer.speed(), [6, 4]);

    let rows = row_ticks(&mut sequencer, 26);
    assert_eq!(rows, vec![7, 11, 17, 21, 27]);
}

#[test]
fn speed_modulate_plays_the_high_nibble_row_first() {
    let module = module_with(vec![vec![effect(StepEffectKind::SpeedModulate, 0x31)]], 64);
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    let mut rows = row_ticks(&mut sequencer, 1);
    assert_eq!(sequencer.speed(), [3, 1]);
    rows.extend(row_ticks(&mut sequencer, 3));
    assert_eq!(sequencer.speed(), [1, 3]);
    rows.extend(row_ticks(&mut sequencer, 5));
    assert_eq!(rows, vec![1, 4, 5, 8, 9]);
}

#[test]
fn first_row_is_read_on_the_first_tick() {
    let module = module_with(vec![vec![Step::note(50, Some(1))]], 4);
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    assert!(sequencer.row_pending());
    sequencer.tick();
    assert_eq!((sequencer.step(), sequencer.ticks()), (1, 1));
    let channel = sequencer.channel(0).expect("channel 0 should exist");
    assert_eq!(channel.state(), ChannelState::Active);
}

#[test]
fn set_speed_fixes_both_row_lengths() {
    let module = module_with(vec![vec![effect(StepEffectKind::SetSpeed, 3)]], 64);
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    let rows = row_ticks(&mut sequencer, 10);
    assert_eq!(rows, vec![1, 4, 7, 10]);
    assert_eq!(sequencer.speed(), [3, 3]);
}

#[test]
fn pattern_break_moves_to_the_next_position() {
    let module = {
        let mut module = module_with(
            vec![
                vec![effect(StepEffectKind::SetSpeed, 1)],
                vec![
                    Step::default(),
                    Step::default(),
                    effect(StepEffectKind::PatternBreak, 0x3F),
                ],
            ],
            16,
        );
        let song = &mut module.songs[0].data;
        song.properties.pattern_count = 2;
        let first = song.order_list[0][0];
        song.order_list[0].push(first);
        let first = song.order_list[1][0];
        song.order_list[1].push(first);
        module
    };
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    sequencer.tick();
    sequencer.tick();
    assert_eq!((sequencer.position(), sequencer.step()), (0, 2));
    sequencer.tick();
    assert_eq!((sequencer.position(), sequencer.step()), (1, 0));
}

#[test]
fn song_loops_to_its_restart_position() {
    let mut module = module_with(vec![vec![effect(StepEffectKind::SetSpeed, 1)]], 4);
    {
        let song = &mut module.songs[0].data;
        song.properties.pattern_count = 2;
        song.properties.restart_position = 1;
        let entry = song.order_list[0][0];
        song.order_list[0].push(entry);
    }
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    for _ in 0..4 {
        sequencer.tick();
    }
    assert_eq!((sequencer.position(), sequencer.loop_count()), (1, 0));
    for _ in 0..4 {
        sequencer.tick();
    }
    assert_eq!((sequencer.position(), sequencer.loop_count()), (1, 1));
    for _ in 0..4 {
        sequencer.tick();
    }
    assert_eq!((sequencer.position(), sequencer.loop_count()), (1, 2));
}

#[test]
fn restart_past_the_end_wraps_to_the_first_position() {
    let mut module = module_with(vec![vec![effect(StepEffectKind::SetSpeed, 1)]], 2);
    module.songs[0].data.properties.restart_position = 5;
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    sequencer.tick();
    sequencer.tick();
    assert_eq!((sequencer.position(), sequencer.loop_count()), (0, 1));
}

#[test]
fn zero_speed_stops_row_reading() {
    let module = module_with(
        vec![vec![
            effect(StepEffectKind::SetSpeed, 1),
            effect(StepEffectKind::SetSpeed, 0),
        ]],
        8,
    );
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    sequencer.tick();
    sequencer.tick();
    assert!(sequencer.is_stopped());
    let step = sequencer.step();
    for _ in 0..10 {
        sequencer.tick();
    }
    assert_eq!(sequencer.step(), step);
    assert_eq!(sequencer.ticks(), 12);
}

#[test]
fn transpose_shifts_notes_of_an_order_entry() {
    let mut module = module_with(vec![vec![Step::note(50, Some(1))]], 4);
    module.songs[0].data.order_list[0][0].transpose = -12;
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    sequencer.tick();
    let channel = sequencer.channel(0).expect("channel 0 should exist");
    assert_eq!(channel.semitone(), 38.0);
    assert_eq!(channel.state(), ChannelState::Active);
}

#[test]
fn note_delay_defers_the_note_within_the_row() {
    let delayed = Step::note(50, Some(1)).with_effect(StepEffect::new(StepEffectKind::NoteDelay, 2));
    let module = module_with(vec![vec![delayed]], 4);
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    for _ in 0..2 {
        sequencer.tick();
        let channel = sequencer.channel(0).expect("channel 0 should exist");
        assert!(channel.has_pending_note());
        assert_eq!(channel.state(), ChannelState::Idle);
    }
    sequencer.tick();
    let channel = sequencer.channel(0).expect("channel 0 should exist");
    assert_eq!(channel.state(), ChannelState::Active);
}

#[test]
fn note_delay_longer_than_the_row_is_dropped() {
    let delayed = Step::note(50, Some(1)).with_effect(StepEffect::new(StepEffectKind::NoteDelay, 7));
    let module = module_with(vec![vec![delayed]], 4);
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    for _ in 0..8 {
        sequencer.tick();
    }
    let channel = sequencer.channel(0).expect("channel 0 should exist");
    assert!(!channel.has_pending_note());
    assert_eq!(channel.state(), ChannelState::Idle);
}

#[test]
fn frames_hold_one_tick_of_samples() {
    let module = demo_module();
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");
    assert_eq!(sequencer.samples_per_tick(), 264);
    assert_eq!(sequencer.tick().len(), 264);
    assert_eq!(sequencer.mixing_rate(), 15_769);
}

#[test]
fn session_construction_errors() {
    let module = demo_module();
    assert_eq!(
        Sequencer::new(&module, 7, &PlaybackOptions::default()).map(|_| ()),
        Err(PlaybackError::SongNotFound { index: 7, count: 2 })
    );

    let options = PlaybackOptions {
        mixing_rate_override: Some(10),
        ..PlaybackOptions::default()
    };
    assert_eq!(
        Sequencer::new(&module, 0, &options).map(|_| ()),
        Err(PlaybackError::InvalidMixingRate(10))
    );
}

#[test]
fn fx_channels_play_instruments_of_the_fx_module() {
    let module = demo_module();
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");
    assert_eq!(
        sequencer.play_fx(0, 3, 50),
        Err(PlaybackError::FxModuleMissing)
    );

    let fx_module = demo_module();
    let mut sequencer = sequencer.with_fx(&fx_module);
    sequencer.play_fx(1, 3, 50).expect("fx channel 1 should be allocated");
    assert!(sequencer.fx_active(1));
    assert!(!sequencer.fx_active(0));
    assert_eq!(
        sequencer.play_fx(2, 3, 50),
        Err(PlaybackError::FxChannelNotAllocated {
            channel: 2,
            allocated: 2
        })
    );

    sequencer.tick();
    assert!(sequencer.fx_active(1));
    sequencer.stop_fx(None).expect("stopping every fx channel should work");
    assert!(!sequencer.fx_active(1));
}

#[test]
fn channel_volumes_are_validated() {
    let module = demo_module();
    let mut sequencer =
        Sequencer::new(&module, 0, &PlaybackOptions::default()).expect("song 0 should play");

    sequencer
        .set_music_volume(None, 128)
        .expect("setting every music channel should work");
    assert_eq!(
        sequencer.channel(1).map(gaxplay_core::Channel::mix_volume),
        Some(0.5)
    );
    assert_eq!(
        sequencer.set_music_volume(Some(2), 256),
        Err(PlaybackError::ChannelNotFound {
            channel: 2,
            count: 2
        })
    );
    sequencer
        .set_fx_volume(Some(0), 512)
        .expect("fx channel 0 should exist");
    assert_eq!(
        sequencer.fx_channel(0).map(gaxplay_core::Channel::mix_volume),
        Some(1.0)
    );
}
