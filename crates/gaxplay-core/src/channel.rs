use serde::{Deserialize, Serialize};

use crate::{
    effect::PerfEffectKind,
    model::{Instrument, Module, PerfList, Vibrato, VolumeEnvelope, WAVE_SLOTS, WaveParam},
    timing::{SINE_TABLE, step_rate},
};

const FULL_VOLUME: f64 = 255.0;
/// Perf-list pitch and vibrato detune are kept in 1/32 semitone steps.
const PITCH_UNITS: f64 = 32.0;
const PITCH_SLIDE_SCALE: f64 = 1.875;
const NOTE_CORRECTION: i32 = 4;
const FIXED_NOTE_CORRECTION: i32 = 2;
const SAMPLE_CENTER: f64 = 128.0;

/// Instruments and waveforms a channel draws from.
#[derive(Debug, Clone, Copy)]
pub struct Bank<'a> {
    pub instruments: &'a [Instrument],
    pub waveforms: &'a [Vec<u8>],
}

impl<'a> Bank<'a> {
    #[must_use]
    pub fn new(module: &'a Module) -> Self {
        Self {
            instruments: &module.instruments,
            waveforms: &module.waveforms,
        }
    }

    fn instrument(&self, index: usize) -> Option<&'a Instrument> {
        self.instruments.get(index)
    }

    /// Waveform 0 and empty waveforms never sound.
    fn waveform(&self, index: usize) -> Option<&'a [u8]> {
        if index == 0 {
            return None;
        }
        self.waveforms
            .get(index)
            .map(Vec::as_slice)
            .filter(|waveform| !waveform.is_empty())
    }
}

/// Per-tick rendering parameters shared by every channel of a session.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub mixing_rate: u32,
    pub gain: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    #[default]
    Idle,
    Active,
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PendingNote {
    instrument: Option<u8>,
    semitone: f64,
    delay: u8,
    elapsed: u8,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct Portamento {
    target: f64,
    lerp: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct PerfState {
    row: usize,
    speed: u8,
    timer: u32,
    ended: bool,
    semitone: f64,
    old_semitone: f64,
    pitch: f64,
    fixed: bool,
    pitch_slide: i16,
    volume_slide: i16,
    volume: f64,
}

impl PerfState {
    fn load(list: &PerfList) -> Self {
        Self {
            row: 0,
            speed: list.row_speed,
            ..Self::default()
        }
    }
}

impl Default for PerfState {
    fn default() -> Self {
        Self {
            row: 0,
            speed: 0,
            timer: 0,
            ended: false,
            semitone: 0.0,
            old_semitone: 0.0,
            pitch: 0.0,
            fixed: false,
            pitch_slide: 0,
            volume_slide: 0,
            volume: FULL_VOLUME,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct WaveState {
    index: usize,
    param: Option<WaveParam>,
    position: f64,
    direction: f64,
    modulate_base: f64,
    modulate_sub: f64,
    modulate_timer: u32,
}

impl WaveState {
    /// Starts on the first perf row that names a wave slot.
    fn seed(instrument: &Instrument) -> Self {
        let slot = instrument
            .perf_list
            .rows
            .iter()
            .filter_map(|row| usize::from(row.wave_slot).checked_sub(1))
            .find(|slot| *slot < WAVE_SLOTS);
        let (index, param) = slot.map_or((0, instrument.wave_params[0]), |slot| {
            (
                usize::from(instrument.wave_slots[slot]),
                instrument.wave_params[slot],
            )
        });
        Self {
            index,
            param,
            position: param.map_or(0.0, |param| f64::from(param.start_position)),
            ..Self::default()
        }
    }

    /// Advances the read head and returns the byte under it.
    fn next_byte(&mut self, param: &WaveParam, waveform: &[u8], rate: f64) -> Option<u8> {
        let len = waveform.len() as f64;
        if param.modulate {
            let size = f64::from(param.modulate_size);
            if size > 0.0 {
                self.modulate_sub = (self.modulate_sub + rate).rem_euclid(size);
            }
            let mut position =
                self.modulate_base + self.modulate_sub + f64::from(param.start_position);
            if param.is_looping() && (position >= len || position >= f64::from(param.loop_end)) {
                position = position.rem_euclid(len);
            }
            return read_byte(waveform, position);
        }

        self.position += rate * self.direction;
        if param.is_looping() {
            if self.position >= len || self.position >= f64::from(param.loop_end) {
                if param.ping_pong {
                    self.direction = -1.0;
                } else {
                    self.position = f64::from(param.loop_start);
                }
            }
            if param.ping_pong && self.position <= f64::from(param.loop_start) {
                self.direction = 1.0;
            }
        }
        if !self.position.is_finite() {
            self.position = 0.0;
        }
        self.position = self.position.clamp(0.0, len - 1.0);
        read_byte(waveform, self.position)
    }

    fn advance_modulation(&mut self, param: &WaveParam, len: usize) {
        self.modulate_timer = self.modulate_timer.wrapping_add(1);
        if param.modulate_speed != 0
            && self.modulate_timer % u32::from(param.modulate_speed) == 0
        {
            self.modulate_base += f64::from(param.modulate_step);
        }
        self.modulate_base = self.modulate_base.clamp(0.0, len.saturating_sub(1) as f64);
    }
}

impl Default for WaveState {
    fn default() -> Self {
        Self {
            index: 0,
            param: None,
            position: 0.0,
            direction: 1.0,
            modulate_base: 0.0,
            modulate_sub: 0.0,
            modulate_timer: 0,
        }
    }
}

fn read_byte(waveform: &[u8], position: f64) -> Option<u8> {
    if !position.is_finite() || position < 0.0 {
        return None;
    }
    waveform.get(position as usize).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
struct VibratoState {
    params: Vibrato,
    enabled: bool,
    running: bool,
    timer: u32,
    phase: u32,
    /// 1/32 semitone units.
    detune: f64,
}

impl VibratoState {
    fn load(params: Vibrato) -> Self {
        let enabled = !params.is_disabled();
        Self {
            params,
            enabled,
            running: enabled && params.wait == 0,
            ..Self::default()
        }
    }

    fn tick(&mut self) {
        if !self.enabled {
            return;
        }
        if self.timer == u32::from(self.params.wait) {
            self.running = true;
        }
        self.timer = self.timer.saturating_add(1);
        if self.running {
            self.phase = self.phase.wrapping_add(u32::from(self.params.speed));
            let sine = i32::from(SINE_TABLE[(self.phase % 64) as usize]);
            self.detune = f64::from((sine * i32::from(self.params.depth)) >> 8);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
struct EnvelopeState {
    index: usize,
    volume: f64,
    slope: f64,
    /// Volume change per tick of the segment ending at each point.
    slopes: Vec<f64>,
    sustain: Option<usize>,
    paused: bool,
    note_off: bool,
    turning_off: bool,
}

impl EnvelopeState {
    fn load(&mut self, envelope: &VolumeEnvelope) {
        let points = &envelope.points;
        self.slopes.clear();
        self.slopes.extend((0..points.len()).map(|index| {
            let Some(previous) = index.checked_sub(1).map(|previous| points[previous]) else {
                return 0.0;
            };
            let span = f64::from(previous.time) - f64::from(points[index].time);
            if span == 0.0 {
                0.0
            } else {
                (f64::from(previous.volume) - f64::from(points[index].volume)) / span
            }
        }));
        self.index = 0;
        self.volume = 0.0;
        self.slope = 0.0;
        self.sustain = envelope
            .sustain
            .map(usize::from)
            .filter(|sustain| *sustain < points.len());
        self.paused = false;
        self.note_off = false;
        self.turning_off = false;
    }

    /// Processes breakpoints for the current note time. Returns `false` once
    /// the envelope has run past its last point.
    fn tick(&mut self, envelope: &VolumeEnvelope, timer: &mut u32) -> bool {
        let points = &envelope.points;
        match points.as_slice() {
            [] => {
                self.volume = 0.0;
                self.slope = 0.0;
                return true;
            }
            [point] => {
                self.volume = if self.note_off {
                    0.0
                } else {
                    f64::from(point.volume)
                };
                self.slope = 0.0;
                return true;
            }
            _ => {}
        }

        if self.note_off {
            let Some(sustain) = self.sustain.take() else {
                self.volume = 0.0;
                self.slope = 0.0;
                return true;
            };
            self.note_off = false;
            self.paused = false;
            self.turning_off = true;
            self.index = sustain;
            *timer = u32::from(points[sustain].time);
        }

        let looping = envelope.loop_region().filter(|_| !self.turning_off);
        for _ in 0..=points.len() {
            if self.paused {
                break;
            }
            let Some(point) = points.get(self.index) else {
                break;
            };
            if u32::from(point.time) != *timer {
                break;
            }
            self.volume = f64::from(point.volume);
            self.index += 1;
            match looping {
                Some((start, end)) if self.index > end || self.index >= points.len() => {
                    let Some(restart) = points.get(start) else {
                        return false;
                    };
                    self.index = start;
                    *timer = u32::from(restart.time);
                }
                None if self.index >= points.len() => return false,
                _ => {}
            }
        }

        if !self.paused {
            self.slope = self.slopes.get(self.index).copied().unwrap_or(0.0);
        }
        if self.index > 0 && self.sustain == Some(self.index - 1) {
            self.paused = true;
            self.slope = 0.0;
        }
        true
    }
}

/// One voice of the synthesizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    state: ChannelState,
    instrument: Option<usize>,
    timer: u32,
    pending: Option<PendingNote>,
    semitone: f64,
    old_semitone: f64,
    portamento: Option<Portamento>,
    pitch_slide: i16,
    volume_slide: i16,
    step_volume: f64,
    mix_volume: f64,
    perf: PerfState,
    wave: WaveState,
    vibrato: VibratoState,
    envelope: EnvelopeState,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: ChannelState::Idle,
            instrument: None,
            timer: 0,
            pending: None,
            semitone: 0.0,
            old_semitone: 0.0,
            portamento: None,
            pitch_slide: 0,
            volume_slide: 0,
            step_volume: FULL_VOLUME,
            mix_volume: 1.0,
            perf: PerfState::default(),
            wave: WaveState::default(),
            vibrato: VibratoState::default(),
            envelope: EnvelopeState::default(),
        }
    }

    /// Starts a note.
    ///
    /// With an instrument every per-note state is reloaded from it; without
    /// one only the pitch changes and a held envelope is re-armed. An
    /// instrument index outside the bank silences the channel.
    pub fn init(&mut self, bank: Bank<'_>, instrument: Option<u8>, semitone: f64) {
        self.pending = None;
        let instrument = instrument.filter(|index| *index != 0).map(usize::from);
        let data = match instrument {
            Some(index) => {
                let Some(data) = bank.instrument(index) else {
                    self.stop();
                    return;
                };
                Some((index, data))
            }
            None => None,
        };

        self.portamento = None;
        self.envelope.note_off = false;
        self.envelope.turning_off = false;
        self.old_semitone = self.semitone;
        self.semitone = semitone;

        let Some((index, data)) = data else {
            return;
        };
        self.state = ChannelState::Active;
        self.instrument = Some(index);
        self.timer = 0;
        self.pitch_slide = 0;
        self.step_volume = FULL_VOLUME;
        self.perf = PerfState::load(&data.perf_list);
        self.wave = WaveState::seed(data);
        self.vibrato = VibratoState::load(data.vibrato);
        self.envelope.load(&data.envelope);
    }

    /// Defers [`Self::init`] by `delay` ticks.
    pub fn schedule_note(&mut self, instrument: Option<u8>, semitone: f64, delay: u8) {
        self.pending = Some(PendingNote {
            instrument,
            semitone,
            delay,
            elapsed: 0,
        });
    }

    /// Releases the envelope: resumes past the sustain point, or mutes the
    /// note when there is none.
    pub fn note_off(&mut self) {
        self.envelope.note_off = true;
    }

    /// Glides from the previous note to the current one over `param` ticks.
    pub fn start_portamento(&mut self, param: u8) {
        let target = self.semitone;
        if param == 0 {
            self.portamento = None;
            return;
        }
        self.portamento = Some(Portamento {
            target,
            lerp: (target - self.old_semitone) / f64::from(param),
        });
        self.semitone = self.old_semitone;
    }

    /// Signed pitch slide parameter; positive raises the pitch.
    pub fn set_pitch_slide(&mut self, param: i16) {
        self.pitch_slide = param;
    }

    /// Signed step-volume change per tick.
    pub fn set_volume_slide(&mut self, param: i16) {
        self.volume_slide = param;
    }

    pub fn clear_slides(&mut self) {
        self.pitch_slide = 0;
        self.volume_slide = 0;
    }

    pub fn set_step_volume(&mut self, volume: u8) {
        self.step_volume = f64::from(volume);
    }

    pub fn set_mix_volume(&mut self, volume: f64) {
        self.mix_volume = volume;
    }

    /// Back to a silent idle voice. The mix volume is kept.
    pub fn stop(&mut self) {
        *self = Self {
            mix_volume: self.mix_volume,
            ..Self::new()
        };
    }

    /// Renders one engine tick into `out`, which is overwritten.
    pub fn tick(&mut self, bank: Bank<'_>, context: TickContext, out: &mut [f64]) {
        out.fill(0.0);
        self.start_pending_note(bank);
        if self.state != ChannelState::Active {
            return;
        }
        let Some(instrument) = self.instrument.and_then(|index| bank.instrument(index)) else {
            self.state = ChannelState::Idle;
            return;
        };

        self.tick_perf_list(instrument);
        if !self.envelope.tick(&instrument.envelope, &mut self.timer) {
            self.state = ChannelState::Finished;
            return;
        }
        self.synthesize(bank, context, out);
        self.vibrato.tick();
        self.tick_pitch(context, out.len());

        self.timer = self.timer.saturating_add(1);
        self.envelope.volume = (self.envelope.volume + self.envelope.slope).clamp(0.0, FULL_VOLUME);
    }

    fn start_pending_note(&mut self, bank: Bank<'_>) {
        let Some(mut pending) = self.pending.take() else {
            return;
        };
        if pending.elapsed >= pending.delay {
            self.init(bank, pending.instrument, pending.semitone);
        } else {
            pending.elapsed += 1;
            self.pending = Some(pending);
        }
    }

    fn tick_perf_list(&mut self, instrument: &Instrument) {
        let perf = &mut self.perf;
        perf.pitch += f64::from(perf.pitch_slide);
        perf.semitone = perf.pitch / PITCH_UNITS;
        perf.volume += f64::from(perf.volume_slide);
        if perf.volume > FULL_VOLUME {
            perf.volume = FULL_VOLUME;
        } else if perf.volume < 0.0 {
            perf.volume = 0.0;
            perf.volume_slide = 0;
        }

        if perf.speed != 0 && perf.timer % u32::from(perf.speed) == 0 {
            perf.pitch_slide = 0;
            perf.volume_slide = 0;
            self.consume_perf_row(instrument);
        }

        if instrument.perf_list.rows.len() > 1 {
            self.perf.timer = self.perf.timer.wrapping_add(1);
        } else {
            self.perf.speed = 0;
        }
    }

    fn consume_perf_row(&mut self, instrument: &Instrument) {
        let rows = &instrument.perf_list.rows;
        let Some(row) = rows.get(self.perf.row).copied() else {
            return;
        };
        let last_row = rows.len() - 1;

        if row.note != 0 {
            let correction = if row.fixed {
                FIXED_NOTE_CORRECTION
            } else {
                NOTE_CORRECTION
            };
            self.perf.volume = FULL_VOLUME;
            self.perf.old_semitone = self.perf.semitone;
            self.perf.semitone = f64::from(i32::from(row.note) - correction);
            self.perf.pitch = self.perf.semitone * PITCH_UNITS;
            if row.fixed {
                self.perf.fixed = true;
            }
            if let Some(slot) = usize::from(row.wave_slot)
                .checked_sub(1)
                .filter(|slot| *slot < WAVE_SLOTS)
            {
                self.wave.index = usize::from(instrument.wave_slots[slot]);
                if let Some(param) = instrument.wave_params[slot] {
                    self.wave.param = Some(param);
                }
            }
        }

        self.perf.row += 1;
        if !self.perf.ended
            && row.note != 0
            && self.perf.semitone != self.perf.old_semitone.ceil()
        {
            if let Some(param) = self.wave.param {
                self.wave.position = f64::from(param.start_position);
            }
        }
        if self.perf.row > last_row {
            self.perf.row = last_row;
            self.perf.ended = true;
        }

        for effect in row.effects.into_iter().flatten() {
            let param = effect.param;
            match effect.kind.known() {
                Some(PerfEffectKind::PitchSlideUp) => self.perf.pitch_slide = i16::from(param),
                Some(PerfEffectKind::PitchSlideDown) => self.perf.pitch_slide = -i16::from(param),
                Some(PerfEffectKind::JumpToRow) => {
                    self.perf.row = usize::from(param).min(last_row);
                    self.perf.ended = false;
                }
                Some(PerfEffectKind::JumpDelay) => {
                    self.perf.row = usize::from(param).min(last_row);
                }
                Some(PerfEffectKind::VolumeSlideUp) => self.perf.volume_slide = i16::from(param),
                Some(PerfEffectKind::VolumeSlideDown) => {
                    self.perf.volume_slide = -i16::from(param);
                }
                Some(PerfEffectKind::SetVolume) => self.perf.volume = f64::from(param),
                Some(PerfEffectKind::SetSpeed) => self.perf.speed = param,
                None => {}
            }
        }
    }

    fn synthesize(&mut self, bank: Bank<'_>, context: TickContext, out: &mut [f64]) {
        let volume_step = if out.is_empty() {
            0.0
        } else {
            f64::from(self.volume_slide) / out.len() as f64
        };
        let source = self.wave.param.zip(bank.waveform(self.wave.index));
        let rate = source.map_or(0.0, |(param, _)| self.read_rate(&param, context.mixing_rate));

        for sample in out.iter_mut() {
            self.step_volume = (self.step_volume + volume_step).clamp(0.0, FULL_VOLUME);
            let Some((param, waveform)) = source else {
                continue;
            };
            let Some(byte) = self.wave.next_byte(&param, waveform, rate) else {
                continue;
            };
            let amplitude = (self.perf.volume / FULL_VOLUME)
                * (self.step_volume / FULL_VOLUME)
                * (self.envelope.volume / FULL_VOLUME)
                * context.gain
                * self.mix_volume;
            *sample = (f64::from(byte) - SAMPLE_CENTER) * amplitude;
        }

        if let Some((param, waveform)) = source {
            if param.modulate {
                self.wave.advance_modulation(&param, waveform.len());
            }
        }
    }

    /// Waveform bytes advanced per output sample at the current pitch.
    fn read_rate(&self, param: &WaveParam, mixing_rate: u32) -> f64 {
        let mut semitone = self.perf.semitone
            + f64::from(param.finetune) / PITCH_UNITS
            + self.vibrato.detune / PITCH_UNITS;
        if !self.perf.fixed {
            semitone += self.semitone;
        }
        let rate = step_rate(semitone, mixing_rate);
        if param.modulate && self.perf.fixed {
            rate + f64::from(param.modulate_step)
        } else {
            rate
        }
    }

    fn tick_pitch(&mut self, context: TickContext, samples: usize) {
        if self.pitch_slide != 0 && context.mixing_rate != 0 {
            self.semitone += f64::from(self.pitch_slide) * PITCH_SLIDE_SCALE * samples as f64
                / f64::from(context.mixing_rate);
        }

        if let Some(portamento) = self.portamento {
            self.semitone += portamento.lerp;
            let passed = (portamento.lerp > 0.0 && self.semitone >= portamento.target)
                || (portamento.lerp < 0.0 && self.semitone <= portamento.target);
            if passed || self.semitone.round() == portamento.target {
                self.semitone = portamento.target;
                self.portamento = None;
            }
        }
    }

    #[must_use]
    pub fn state(&self) -> ChannelState {
        self.state
    }

    /// Index of the instrument playing, if any.
    #[must_use]
    pub fn instrument(&self) -> Option<usize> {
        self.instrument
    }

    #[must_use]
    pub fn semitone(&self) -> f64 {
        self.semitone
    }

    #[must_use]
    pub fn portamento_active(&self) -> bool {
        self.portamento.is_some()
    }

    #[must_use]
    pub fn has_pending_note(&self) -> bool {
        self.pending.is_some()
    }

    #[must_use]
    pub fn envelope_volume(&self) -> f64 {
        self.envelope.volume
    }

    #[must_use]
    pub fn step_volume(&self) -> f64 {
        self.step_volume
    }

    /// Perf-list row the cursor sits on.
    #[must_use]
    pub fn row_index(&self) -> usize {
        self.perf.row
    }

    #[must_use]
    pub fn row_volume(&self) -> f64 {
        self.perf.volume
    }

    /// Pitch offset from the perf list, in semitones.
    #[must_use]
    pub fn perf_semitone(&self) -> f64 {
        self.perf.semitone
    }

    /// Current vibrato detune in 1/32 semitone steps.
    #[must_use]
    pub fn vibrato_detune(&self) -> f64 {
        self.vibrato.detune
    }

    #[must_use]
    pub fn mix_volume(&self) -> f64 {
        self.mix_volume
    }
}
