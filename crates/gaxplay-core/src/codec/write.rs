use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use super::{
    CHANNEL_TABLE_ENTRIES, MAGIC, MAX_INSTRUMENTS, MAX_ORDER_LENGTH, MAX_TABLE_ENTRIES,
    MAX_WAVEFORMS, NULL_WAVEFORM_LEN, index_byte, steps::encode_steps,
};
use crate::{
    effect::PerfEffect,
    error::CodecError,
    model::{
        EnvelopePoint, Instrument, MAX_CHANNELS, MAX_FX_CHANNELS, Module, PerfRow, Song,
        SongProperties, VolumeEnvelope, WaveParam,
    },
    timing::{MAX_MIXING_RATE, MIN_MIXING_RATE},
};

const SILENCE: u8 = 0x80;
/// Sits between the quoted song name and the author.
const TAG_SEPARATOR: &str = "\" \u{A9} ";

/// Encodes `module` as a packaged blob whose pointers assume it is loaded at
/// address `basis`.
#[instrument(
    skip(module),
    fields(
        songs = module.songs.len(),
        instruments = module.instruments.len(),
        waveforms = module.waveforms.len(),
        basis
    )
)]
pub fn encode(module: &Module, basis: u32) -> Result<Vec<u8>, CodecError> {
    validate(module)?;

    let song_slots = module.songs.len().max(1);
    let mut emitter = Emitter::new(basis);
    emitter.bytes(MAGIC);
    emitter.bytes(&vec![0; song_slots * 4]);

    let song_offsets = write_body(&mut emitter, module)?;
    for (index, offset) in song_offsets.into_iter().enumerate() {
        emitter.patch_u32(MAGIC.len() + index * 4, offset);
    }

    debug!(bytes = emitter.out.len(), "module encoded");
    Ok(emitter.out)
}

/// Headerless module blob for linking into a larger image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledObject {
    pub bytes: Vec<u8>,
    /// Offset of every song-properties record inside `bytes`.
    pub song_offsets: Vec<usize>,
}

/// Encodes `module` without the `GAX!` magic and song offset table. The
/// caller places `bytes` at address `basis` and keeps `song_offsets` to find
/// the songs again.
#[instrument(
    skip(module),
    fields(
        songs = module.songs.len(),
        instruments = module.instruments.len(),
        waveforms = module.waveforms.len(),
        basis
    )
)]
pub fn encode_object(module: &Module, basis: u32) -> Result<CompiledObject, CodecError> {
    validate(module)?;

    let mut emitter = Emitter::new(basis);
    let song_offsets = write_body(&mut emitter, module)?
        .into_iter()
        .map(|offset| offset as usize)
        .collect();

    debug!(bytes = emitter.out.len(), "module object compiled");
    Ok(CompiledObject {
        bytes: emitter.out,
        song_offsets,
    })
}

/// Writes the instrument and wave tables followed by every song record and
/// returns the offsets of the song-properties records.
fn write_body(emitter: &mut Emitter, module: &Module) -> Result<Vec<u32>, CodecError> {
    let instrument_table = write_instruments(emitter, &module.instruments)?;
    let wave_table = write_waveforms(emitter, &module.waveforms)?;
    let shared = SharedPointers {
        instrument_table,
        wave_table,
    };

    if module.songs.is_empty() {
        let placeholder =
            write_fx_record(emitter, "", &zeroed_properties(), &module.author, shared)?;
        return Ok(vec![placeholder]);
    }
    module
        .songs
        .iter()
        .map(|song| write_song(emitter, song, &module.author, shared))
        .collect()
}

/// Fixed-point slope stored with envelope point `index`: volume change per
/// tick from the previous point, times 256, wrapped to 16 bits.
#[must_use]
pub fn envelope_slope(points: &[EnvelopePoint], index: usize) -> i16 {
    let Some(current) = points.get(index) else {
        return 0;
    };
    let previous = points[index.saturating_sub(1)];
    let span = f64::from(previous.time) - f64::from(current.time);
    if span == 0.0 {
        return 0;
    }
    let slope = (f64::from(previous.volume) - f64::from(current.volume)) / span * 256.0;
    // two's-complement wrap, not saturation
    (slope.trunc() as i64) as i16
}

fn validate(module: &Module) -> Result<(), CodecError> {
    validate_tag_text("author", &module.author)?;
    if module.instruments.len() > MAX_INSTRUMENTS {
        return Err(CodecError::limit(
            "instrument",
            module.instruments.len(),
            MAX_INSTRUMENTS,
        ));
    }
    if module.waveforms.len() > MAX_WAVEFORMS {
        return Err(CodecError::limit(
            "waveform",
            module.waveforms.len(),
            MAX_WAVEFORMS,
        ));
    }
    if module.songs.len() > MAX_TABLE_ENTRIES {
        return Err(CodecError::limit(
            "song",
            module.songs.len(),
            MAX_TABLE_ENTRIES,
        ));
    }

    for instrument in &module.instruments {
        let rows = instrument.perf_list.rows.len();
        if rows > MAX_TABLE_ENTRIES {
            return Err(CodecError::limit("perf row", rows, MAX_TABLE_ENTRIES));
        }
        let points = instrument.envelope.points.len();
        if points > MAX_TABLE_ENTRIES {
            return Err(CodecError::limit("envelope point", points, MAX_TABLE_ENTRIES));
        }
    }

    for song in &module.songs {
        validate_song(song)?;
    }
    Ok(())
}

fn validate_song(song: &Song) -> Result<(), CodecError> {
    validate_tag_text("song name", &song.name)?;
    if song.name.contains(TAG_SEPARATOR) {
        return Err(CodecError::Consistency(format!(
            "song name '{}' contains the name/author separator",
            song.name
        )));
    }

    let properties = &song.data.properties;
    if properties.channel_count > MAX_CHANNELS {
        return Err(CodecError::limit(
            "channel",
            usize::from(properties.channel_count),
            usize::from(MAX_CHANNELS),
        ));
    }
    if properties.fx_channel_count > MAX_FX_CHANNELS {
        return Err(CodecError::limit(
            "fx channel",
            usize::from(properties.fx_channel_count),
            usize::from(MAX_FX_CHANNELS),
        ));
    }
    let rates = MIN_MIXING_RATE..=MAX_MIXING_RATE;
    if !rates.contains(&properties.mixing_rate) {
        return Err(CodecError::InvalidMixingRate(properties.mixing_rate));
    }
    if properties.fx_mixing_rate != 0 && !rates.contains(&properties.fx_mixing_rate) {
        return Err(CodecError::InvalidMixingRate(properties.fx_mixing_rate));
    }
    if song.data.is_fx_object() {
        return Ok(());
    }

    let pattern_count = usize::from(properties.pattern_count);
    if pattern_count > MAX_ORDER_LENGTH {
        return Err(CodecError::limit("order list position", pattern_count, MAX_ORDER_LENGTH));
    }
    if song.data.order_list.len() != usize::from(properties.channel_count) {
        return Err(CodecError::Consistency(format!(
            "song '{}' has {} order lists for {} channels",
            song.name,
            song.data.order_list.len(),
            properties.channel_count
        )));
    }
    for list in &song.data.order_list {
        if list.len() != pattern_count {
            return Err(CodecError::Consistency(format!(
                "song '{}' order list length {} differs from pattern count {pattern_count}",
                song.name,
                list.len()
            )));
        }
        if let Some(entry) = list
            .iter()
            .find(|entry| usize::from(entry.pattern) >= song.data.patterns.len())
        {
            return Err(CodecError::Consistency(format!(
                "song '{}' references missing pattern {}",
                song.name, entry.pattern
            )));
        }
    }
    let step_count = usize::from(properties.step_count);
    if let Some(pattern) = song
        .data
        .patterns
        .iter()
        .find(|pattern| pattern.steps.len() != step_count)
    {
        return Err(CodecError::Consistency(format!(
            "song '{}' pattern holds {} steps instead of {step_count}",
            song.name,
            pattern.steps.len()
        )));
    }
    Ok(())
}

/// Tags are stored as ISO-8859-1 without control characters.
fn validate_tag_text(what: &str, text: &str) -> Result<(), CodecError> {
    match text.chars().find(|character| !(' '..='\u{FF}').contains(character)) {
        Some(character) => Err(CodecError::Consistency(format!(
            "{what} '{text}' holds {character:?}, which has no tag byte"
        ))),
        None => Ok(()),
    }
}

#[derive(Debug, Clone, Copy)]
struct SharedPointers {
    instrument_table: u32,
    wave_table: u32,
}

fn write_instruments(emitter: &mut Emitter, instruments: &[Instrument]) -> Result<u32, CodecError> {
    let mut first_null: Option<(&Instrument, u32)> = None;
    let mut pointers = Vec::with_capacity(instruments.len());

    for instrument in instruments {
        if let Some((null, pointer)) = first_null {
            if instrument == null {
                pointers.push(pointer);
                continue;
            }
        }

        let envelope = emitter.pointer()?;
        write_envelope(emitter, &instrument.envelope);
        let perf_list = emitter.pointer()?;
        for row in &instrument.perf_list.rows {
            write_perf_row(emitter, row);
        }
        let header = emitter.pointer()?;
        write_instrument_header(emitter, instrument, envelope, perf_list);

        if instrument.is_null && first_null.is_none() {
            first_null = Some((instrument, header));
        }
        pointers.push(header);
    }

    emitter.align();
    let table = emitter.pointer()?;
    for pointer in pointers {
        emitter.u32(pointer);
    }
    Ok(table)
}

fn write_envelope(emitter: &mut Emitter, envelope: &VolumeEnvelope) {
    // point count was validated against the u8 limit
    emitter.u8(envelope.points.len() as u8);
    emitter.u8(index_byte(envelope.sustain));
    emitter.u8(index_byte(envelope.loop_start));
    emitter.u8(index_byte(envelope.loop_end));
    for (index, point) in envelope.points.iter().enumerate() {
        emitter.u16(point.time);
        emitter.i16(envelope_slope(&envelope.points, index));
        emitter.u8(point.volume);
        emitter.bytes(&[0; 3]);
    }
}

fn write_perf_row(emitter: &mut Emitter, row: &PerfRow) {
    let effect_bytes = |effect: Option<PerfEffect>| {
        effect.map_or((0, 0), |effect| (effect.param, effect.kind.to_byte()))
    };
    let (param0, code0) = effect_bytes(row.effects[0]);
    let (param1, code1) = effect_bytes(row.effects[1]);
    emitter.bytes(&[
        row.note,
        u8::from(row.fixed),
        row.wave_slot,
        0,
        param0,
        code0,
        param1,
        code1,
    ]);
}

fn write_instrument_header(
    emitter: &mut Emitter,
    instrument: &Instrument,
    envelope: u32,
    perf_list: u32,
) {
    emitter.u8(u8::from(instrument.is_null));
    emitter.bytes(&instrument.wave_slots);
    emitter.bytes(&[0; 3]);
    emitter.bytes(&[
        instrument.vibrato.wait,
        instrument.vibrato.depth,
        instrument.vibrato.speed,
        0,
    ]);
    emitter.u32(envelope);
    emitter.u8(instrument.perf_list.row_speed);
    emitter.u8(instrument.perf_list.rows.len() as u8);
    emitter.u16(instrument.reserved);
    emitter.u32(perf_list);

    let slots: Vec<usize> = if instrument.has_used_slots() {
        instrument.used_slots().collect()
    } else {
        vec![0]
    };
    for slot in slots {
        write_wave_param(emitter, &instrument.wave_params[slot].unwrap_or_default());
    }
}

fn write_wave_param(emitter: &mut Emitter, param: &WaveParam) {
    emitter.i16(param.finetune);
    emitter.u8(u8::from(param.modulate));
    emitter.u8(u8::from(param.ping_pong));
    emitter.u32(param.start_position);
    emitter.u32(param.loop_start);
    emitter.u32(param.loop_end);
    emitter.i32(param.modulate_size);
    emitter.u16(param.modulate_step);
    emitter.u16(param.modulate_speed);
}

fn write_waveforms(emitter: &mut Emitter, waveforms: &[Vec<u8>]) -> Result<u32, CodecError> {
    let null_waveform = emitter.pointer()?;
    emitter.bytes(&[SILENCE; NULL_WAVEFORM_LEN]);

    let mut entries = Vec::with_capacity(waveforms.len());
    for waveform in waveforms.iter().skip(1) {
        if waveform.is_empty() {
            entries.push((0, 0));
            continue;
        }
        let pointer = emitter.pointer()?;
        let length = u32::try_from(waveform.len())
            .map_err(|_| CodecError::limit("waveform byte", waveform.len(), u32::MAX as usize))?;
        emitter.bytes(waveform);
        entries.push((pointer, length));
    }
    emitter.align();

    let null_entry = emitter.pointer()?;
    emitter.u32(null_waveform);
    emitter.u32(0);

    let table = emitter.pointer()?;
    emitter.u32(null_entry);
    emitter.u32(0);
    for (pointer, length) in entries {
        emitter.u32(pointer);
        emitter.u32(length);
    }
    Ok(table)
}

fn write_song(
    emitter: &mut Emitter,
    song: &Song,
    author: &str,
    shared: SharedPointers,
) -> Result<u32, CodecError> {
    let properties = &song.data.properties;
    if song.data.is_fx_object() {
        return write_fx_record(emitter, &song.name, properties, author, shared);
    }

    let step_data = emitter.pointer()?;
    let step_start = emitter.out.len();
    let mut pattern_offsets = Vec::with_capacity(song.data.patterns.len());
    for pattern in &song.data.patterns {
        let relative = emitter.out.len() - step_start;
        let relative = u16::try_from(relative)
            .map_err(|_| CodecError::limit("pattern data byte", relative, usize::from(u16::MAX)))?;
        pattern_offsets.push(relative);
        emitter.bytes(&encode_steps(&pattern.steps)?);
    }

    emitter.bytes(&name_tag(&song.name, author));
    emitter.align();

    let mut order_lists = Vec::with_capacity(song.data.order_list.len());
    for list in &song.data.order_list {
        order_lists.push(emitter.pointer()?);
        for entry in list {
            emitter.u16(pattern_offsets[usize::from(entry.pattern)]);
            emitter.u8(entry.transpose as u8);
            emitter.u8(0);
        }
    }

    let offset = emitter.offset_u32()?;
    write_properties(emitter, properties, step_data, shared, &order_lists);
    Ok(offset)
}

/// FX objects carry no patterns; their step pointer marks the name tag.
fn write_fx_record(
    emitter: &mut Emitter,
    name: &str,
    properties: &SongProperties,
    author: &str,
    shared: SharedPointers,
) -> Result<u32, CodecError> {
    let tag = emitter.pointer()?;
    emitter.bytes(&name_tag(name, author));
    emitter.align();

    let offset = emitter.offset_u32()?;
    write_properties(emitter, properties, tag, shared, &[]);
    Ok(offset)
}

fn write_properties(
    emitter: &mut Emitter,
    properties: &SongProperties,
    step_data: u32,
    shared: SharedPointers,
    order_lists: &[u32],
) {
    emitter.u8(properties.channel_count);
    emitter.u8(0);
    emitter.u16(properties.step_count);
    emitter.u16(properties.pattern_count);
    emitter.u16(properties.restart_position);
    emitter.u16(properties.master_volume);
    emitter.u16(0);
    emitter.u32(step_data);
    emitter.u32(shared.instrument_table);
    emitter.u32(shared.wave_table);
    emitter.u16(properties.mixing_rate);
    emitter.u16(properties.fx_mixing_rate);
    emitter.u8(properties.fx_channel_count);
    emitter.bytes(&[0; 3]);

    for entry in 0..CHANNEL_TABLE_ENTRIES {
        emitter.u32(order_lists.get(entry).copied().unwrap_or(0));
    }
}

/// `"<name>" © <author>` in ISO-8859-1.
fn name_tag(name: &str, author: &str) -> Vec<u8> {
    let mut tag = Vec::with_capacity(name.len() + author.len() + 5);
    tag.push(b'"');
    tag.extend(latin1(name));
    tag.extend(latin1(TAG_SEPARATOR));
    tag.extend(latin1(author));
    tag
}

fn latin1(text: &str) -> impl Iterator<Item = u8> + '_ {
    text.chars()
        .map(|character| u8::try_from(u32::from(character)).unwrap_or(b'?'))
}

/// Properties record written when a module carries no songs.
fn zeroed_properties() -> SongProperties {
    SongProperties {
        channel_count: 0,
        step_count: 0,
        pattern_count: 0,
        restart_position: 0,
        master_volume: 0,
        mixing_rate: 0,
        fx_mixing_rate: 0,
        fx_channel_count: 0,
    }
}

struct Emitter {
    out: Vec<u8>,
    basis: u32,
}

impl Emitter {
    fn new(basis: u32) -> Self {
        Self {
            out: Vec::new(),
            basis,
        }
    }

    /// Address of the next byte once the blob is loaded at `basis`.
    fn pointer(&self) -> Result<u32, CodecError> {
        u32::try_from(self.out.len())
            .ok()
            .and_then(|offset| offset.checked_add(self.basis))
            .ok_or_else(|| CodecError::limit("module byte", self.out.len(), u32::MAX as usize))
    }

    fn offset_u32(&self) -> Result<u32, CodecError> {
        u32::try_from(self.out.len())
            .map_err(|_| CodecError::limit("module byte", self.out.len(), u32::MAX as usize))
    }

    fn align(&mut self) {
        while self.out.len() % 4 != 0 {
            self.out.push(0);
        }
    }

    fn bytes(&mut self, bytes: &[u8]) {
        self.out.extend_from_slice(bytes);
    }

    fn u8(&mut self, value: u8) {
        self.out.push(value);
    }

    fn u16(&mut self, value: u16) {
        let mut buf = [0; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.bytes(&buf);
    }

    fn i16(&mut self, value: i16) {
        let mut buf = [0; 2];
        LittleEndian::write_i16(&mut buf, value);
        self.bytes(&buf);
    }

    fn u32(&mut self, value: u32) {
        let mut buf = [0; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.bytes(&buf);
    }

    fn i32(&mut self, value: i32) {
        let mut buf = [0; 4];
        LittleEndian::write_i32(&mut buf, value);
        self.bytes(&buf);
    }

    fn patch_u32(&mut self, at: usize, value: u32) {
        LittleEndian::write_u32(&mut self.out[at..at + 4], value);
    }
}
