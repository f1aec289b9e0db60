use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::{
    channel::{Bank, Channel, ChannelState, TickContext},
    effect::StepEffectKind,
    mixer::mix,
    model::{Module, Note, SongData, Step},
    timing::{FRAME_RATE, samples_per_tick},
};

/// Divisor applied to a song's master volume.
pub const MASTER_VOLUME_SCALE: f64 = 513.0;
/// Music and FX channel volumes are given out of this.
pub const CHANNEL_VOLUME_SCALE: f64 = 256.0;
const INITIAL_SPEED: [u8; 2] = [6, 6];

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PlaybackError {
    #[error("song {index} not found (module has {count} songs)")]
    SongNotFound { index: usize, count: usize },
    #[error("mixing rate {0} Hz renders no samples")]
    InvalidMixingRate(u32),
    #[error("channel {channel} not found (song has {count} channels)")]
    ChannelNotFound { channel: usize, count: usize },
    #[error("fx channel {channel} is not allocated ({allocated} fx channels)")]
    FxChannelNotAllocated { channel: usize, allocated: usize },
    #[error("no fx module attached to the session")]
    FxModuleMissing,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackOptions {
    pub frame_rate: f64,
    pub gain: f64,
    /// Scale output by `master_volume / 513`.
    pub apply_master_volume: bool,
    pub mixing_rate_override: Option<u32>,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            frame_rate: FRAME_RATE,
            gain: 1.0,
            apply_master_volume: true,
            mixing_rate_override: None,
        }
    }
}

/// Instrument, semitone and delay of a note held back by a note-delay effect.
type DelayedNote = (Option<u8>, f64, u8);

/// Instructions a step hands back to the sequencer.
#[derive(Debug, Clone, Copy, Default)]
struct StepOutcome {
    speed: Option<[u8; 2]>,
    pattern_break: bool,
    delayed: Option<DelayedNote>,
}

/// One playback session of one song.
#[derive(Debug, Clone)]
pub struct Sequencer<'m> {
    module: &'m Module,
    song: &'m SongData,
    fx_module: Option<&'m Module>,
    context: TickContext,
    samples_per_tick: usize,
    speed: [u8; 2],
    speed_timer: i32,
    step: usize,
    position: usize,
    loop_count: u32,
    pattern_break: bool,
    ticks: u64,
    channels: Vec<Channel>,
    fx_channels: Vec<Channel>,
    buffers: Vec<Vec<f64>>,
    frame: Vec<u8>,
}

impl<'m> Sequencer<'m> {
    #[instrument(skip(module, options), fields(songs = module.songs.len(), song_index))]
    pub fn new(
        module: &'m Module,
        song_index: usize,
        options: &PlaybackOptions,
    ) -> Result<Self, PlaybackError> {
        let song = module
            .song(song_index)
            .map(|song| &song.data)
            .ok_or(PlaybackError::SongNotFound {
                index: song_index,
                count: module.songs.len(),
            })?;
        let properties = song.properties;

        let mixing_rate = options
            .mixing_rate_override
            .unwrap_or(u32::from(properties.mixing_rate));
        let samples_per_tick = samples_per_tick(mixing_rate, options.frame_rate);
        if samples_per_tick == 0 {
            return Err(PlaybackError::InvalidMixingRate(mixing_rate));
        }

        let mut gain = options.gain;
        if options.apply_master_volume {
            gain *= f64::from(properties.master_volume) / MASTER_VOLUME_SCALE;
        }

        let channel_count = usize::from(properties.channel_count);
        let fx_count = usize::from(properties.fx_channel_count);
        info!(
            channels = channel_count,
            fx_channels = fx_count,
            mixing_rate,
            samples_per_tick,
            "playback session created"
        );

        Ok(Self {
            module,
            song,
            fx_module: None,
            context: TickContext { mixing_rate, gain },
            samples_per_tick,
            speed: INITIAL_SPEED,
            // row 0 plays on the first tick rather than after a silent row
            speed_timer: 0,
            step: 0,
            position: 0,
            loop_count: 0,
            pattern_break: false,
            ticks: 0,
            channels: vec![Channel::new(); channel_count],
            fx_channels: vec![Channel::new(); fx_count],
            buffers: vec![vec![0.0; samples_per_tick]; channel_count + fx_count],
            frame: vec![0; samples_per_tick],
        })
    }

    /// Attaches the module whose instruments the FX channels play.
    #[must_use]
    pub fn with_fx(mut self, fx_module: &'m Module) -> Self {
        self.fx_module = Some(fx_module);
        self
    }

    /// Advances one engine frame and returns its unsigned 8-bit samples.
    pub fn tick(&mut self) -> &[u8] {
        self.ticks += 1;

        if self.speed_timer <= 0 && self.speed[0] != 0 {
            let delayed = self.read_step();
            self.step += 1;
            self.speed.swap(0, 1);
            self.speed_timer = i32::from(self.speed[0]);

            for (channel, (instrument, semitone, delay)) in delayed {
                if delay <= self.speed[0] {
                    self.channels[channel].schedule_note(instrument, semitone, delay);
                } else {
                    debug!(channel, delay, "note delay longer than the row, dropped");
                }
            }
        }
        self.speed_timer = self.speed_timer.saturating_sub(1);

        let properties = self.song.properties;
        if self.step >= usize::from(properties.step_count) || self.pattern_break {
            self.step = 0;
            self.position += 1;
            self.pattern_break = false;
            if self.position >= usize::from(properties.pattern_count) {
                let restart = usize::from(properties.restart_position);
                self.position = if restart < usize::from(properties.pattern_count) {
                    restart
                } else {
                    0
                };
                self.loop_count += 1;
                debug!(loop_count = self.loop_count, "song looped");
            }
        }

        self.render();
        &self.frame
    }

    fn read_step(&mut self) -> Vec<(usize, DelayedNote)> {
        let bank = Bank::new(self.module);
        let mut delayed = Vec::new();
        for index in 0..self.channels.len() {
            let entry = self.song.entry(index, self.position);
            let step = entry
                .and_then(|entry| self.song.pattern(entry.pattern))
                .and_then(|pattern| pattern.steps.get(self.step))
                .copied()
                .unwrap_or_default();
            let transpose = entry.map_or(0, |entry| entry.transpose);

            let outcome = dispatch_step(&mut self.channels[index], bank, step, transpose);
            if let Some(speed) = outcome.speed {
                self.speed = speed;
            }
            self.pattern_break |= outcome.pattern_break;
            if let Some(note) = outcome.delayed {
                delayed.push((index, note));
            }
        }
        delayed
    }

    fn render(&mut self) {
        let bank = Bank::new(self.module);
        let fx_bank = self.fx_module.map_or(bank, Bank::new);
        let (music, fx) = self.buffers.split_at_mut(self.channels.len());
        for (channel, buffer) in self.channels.iter_mut().zip(music) {
            channel.tick(bank, self.context, buffer);
        }
        for (channel, buffer) in self.fx_channels.iter_mut().zip(fx) {
            channel.tick(fx_bank, self.context, buffer);
        }
        mix(&self.buffers, 1.0, &mut self.frame);
    }

    /// Starts `instrument` of the FX module on an FX channel.
    #[instrument(skip(self), fields(fx_channel, instrument, semitone))]
    pub fn play_fx(
        &mut self,
        fx_channel: usize,
        instrument: u8,
        semitone: u8,
    ) -> Result<(), PlaybackError> {
        let fx_module = self.fx_module.ok_or(PlaybackError::FxModuleMissing)?;
        let allocated = self.fx_channels.len();
        let channel = self
            .fx_channels
            .get_mut(fx_channel)
            .ok_or(PlaybackError::FxChannelNotAllocated {
                channel: fx_channel,
                allocated,
            })?;
        channel.init(Bank::new(fx_module), Some(instrument), f64::from(semitone));
        debug!("fx started");
        Ok(())
    }

    /// Silences one FX channel, or all of them.
    pub fn stop_fx(&mut self, fx_channel: Option<usize>) -> Result<(), PlaybackError> {
        match fx_channel {
            Some(index) => {
                let allocated = self.fx_channels.len();
                self.fx_channels
                    .get_mut(index)
                    .ok_or(PlaybackError::FxChannelNotAllocated {
                        channel: index,
                        allocated,
                    })?
                    .stop();
            }
            None => self.fx_channels.iter_mut().for_each(Channel::stop),
        }
        Ok(())
    }

    #[must_use]
    pub fn fx_active(&self, fx_channel: usize) -> bool {
        self.fx_channels
            .get(fx_channel)
            .is_some_and(|channel| channel.state() == ChannelState::Active)
    }

    /// Sets one music channel's volume, or all of them, out of 256.
    pub fn set_music_volume(
        &mut self,
        channel: Option<usize>,
        volume: u16,
    ) -> Result<(), PlaybackError> {
        let count = self.channels.len();
        set_volume(&mut self.channels, channel, volume).ok_or(PlaybackError::ChannelNotFound {
            channel: channel.unwrap_or_default(),
            count,
        })
    }

    /// Sets one FX channel's volume, or all of them, out of 256.
    pub fn set_fx_volume(
        &mut self,
        fx_channel: Option<usize>,
        volume: u16,
    ) -> Result<(), PlaybackError> {
        let allocated = self.fx_channels.len();
        set_volume(&mut self.fx_channels, fx_channel, volume).ok_or(
            PlaybackError::FxChannelNotAllocated {
                channel: fx_channel.unwrap_or_default(),
                allocated,
            },
        )
    }

    /// The row-length pair; rows alternate between the two entries.
    #[must_use]
    pub fn speed(&self) -> [u8; 2] {
        self.speed
    }

    /// Playback has hit the stop sentinel (a zero speed).
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.speed[0] == 0
    }

    /// The next tick reads a fresh row.
    #[must_use]
    pub fn row_pending(&self) -> bool {
        self.speed_timer <= 0
    }

    #[must_use]
    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    /// Current song position (index into the order lists).
    #[must_use]
    pub fn position(&self) -> usize {
        self.position
    }

    /// Next step to be read within the current patterns.
    #[must_use]
    pub fn step(&self) -> usize {
        self.step
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub fn samples_per_tick(&self) -> usize {
        self.samples_per_tick
    }

    #[must_use]
    pub fn mixing_rate(&self) -> u32 {
        self.context.mixing_rate
    }

    #[must_use]
    pub fn channel(&self, index: usize) -> Option<&Channel> {
        self.channels.get(index)
    }

    #[must_use]
    pub fn fx_channel(&self, index: usize) -> Option<&Channel> {
        self.fx_channels.get(index)
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

fn set_volume(channels: &mut [Channel], index: Option<usize>, volume: u16) -> Option<()> {
    let volume = (f64::from(volume) / CHANNEL_VOLUME_SCALE).min(1.0);
    match index {
        Some(index) => channels.get_mut(index)?.set_mix_volume(volume),
        None => channels
            .iter_mut()
            .for_each(|channel| channel.set_mix_volume(volume)),
    }
    Some(())
}

fn dispatch_step(channel: &mut Channel, bank: Bank<'_>, step: Step, transpose: i8) -> StepOutcome {
    let mut outcome = StepOutcome::default();
    channel.clear_slides();

    let effect = step
        .effect
        .and_then(|effect| effect.kind.known().map(|kind| (kind, effect.param)));
    let note_delay = match effect {
        Some((StepEffectKind::NoteDelay, delay)) => Some(delay),
        _ => None,
    };

    let mut triggered = false;
    match step.note {
        Some(Note::On(semitone)) => {
            let semitone = f64::from(i16::from(semitone) + i16::from(transpose));
            if let Some(delay) = note_delay {
                outcome.delayed = Some((step.instrument, semitone, delay));
            } else {
                channel.init(bank, step.instrument, semitone);
                triggered = true;
            }
        }
        Some(Note::Off) => channel.note_off(),
        None => {}
    }

    let Some((kind, param)) = effect else {
        return outcome;
    };
    match kind {
        StepEffectKind::PitchSlideUp => channel.set_pitch_slide(i16::from(param)),
        StepEffectKind::PitchSlideDown => channel.set_pitch_slide(-i16::from(param)),
        StepEffectKind::TonePortamento => {
            if triggered {
                channel.start_portamento(param);
            }
        }
        StepEffectKind::SpeedModulate => outcome.speed = Some([param & 0xF, param >> 4]),
        StepEffectKind::VolumeSlideUp => channel.set_volume_slide(i16::from(param)),
        StepEffectKind::VolumeSlideDown => channel.set_volume_slide(-i16::from(param)),
        StepEffectKind::SetVolume => channel.set_step_volume(param),
        StepEffectKind::PatternBreak => outcome.pattern_break = true,
        StepEffectKind::SetSpeed => outcome.speed = Some([param, param]),
        StepEffectKind::NoteDelay => {}
    }
    outcome
}

/// Work RAM the engine reserves for a session, in bytes.
#[must_use]
pub fn estimate_work_ram(mixing_rate: u32, channels: u32, fx_channels: u32) -> u32 {
    const HEADER: u32 = 0x98;
    const FX_CHANNEL: u32 = 0x48;
    const BUFFER_FOOTER: u32 = 0x24C;
    const MUSIC_HEADER: u32 = 0x78;
    const CHANNEL: u32 = 0x48;

    let buffer = (f64::from(mixing_rate) / (FRAME_RATE / 2.0)).floor() as u32;
    HEADER + FX_CHANNEL * fx_channels + 8 + buffer + BUFFER_FOOTER + MUSIC_HEADER + CHANNEL * channels
}
