use std::collections::BTreeSet;

use tracing::{debug, instrument, warn};

use super::{
    ByteView, ENVELOPE_HEADER_SIZE, ENVELOPE_POINT_SIZE, INSTRUMENT_HEADER_SIZE, MAGIC,
    MAX_INSTRUMENTS, MAX_TABLE_ENTRIES, MAX_WAVEFORMS, ORDER_ENTRY_SIZE, PERF_ROW_SIZE,
    SONG_PROPERTIES_SIZE, WAVE_PARAM_SIZE,
    address::{AddressMode, Addressing},
    optional_index, props,
    steps::decode_steps,
};
use crate::{
    effect::PerfEffect,
    error::CodecError,
    model::{
        EnvelopePoint, Instrument, MAX_CHANNELS, MAX_FX_CHANNELS, Module, OrderEntry, Pattern,
        PerfList, PerfRow, Song, SongData, SongProperties, Vibrato, VolumeEnvelope, WAVE_SLOTS,
        WaveParam,
    },
};

/// Upper bound on expanded steps across a module.
const MAX_DECODED_STEPS: usize = 1 << 22;
const NAME_SEPARATOR: &[u8] = b"\x22 \xA9 ";
const QUOTE: u8 = b'"';
const COPYRIGHT: u8 = 0xA9;
const MAX_NAME_PADDING: usize = 4;

/// Decodes a module from `buffer`.
///
/// `base_offset` is the address the blob was linked at (packaged form) or
/// the cartridge offset of `buffer[0]` (cartridge form).
#[instrument(skip(buffer), fields(bytes = buffer.len(), base_offset))]
pub fn decode(buffer: &[u8], base_offset: u32, mode: &AddressMode) -> Result<Module, CodecError> {
    let view = ByteView::new(buffer);
    let addressing = Addressing::new(mode, base_offset, buffer.len());

    let song_offsets = match mode {
        AddressMode::Packaged => packaged_song_offsets(view, addressing)?,
        AddressMode::Cartridge { song_offsets } | AddressMode::Object { song_offsets } => {
            song_offsets.clone()
        }
    };
    if song_offsets.is_empty() {
        return Err(CodecError::Format("no song properties offsets".to_string()));
    }

    let raw_songs = song_offsets
        .iter()
        .map(|offset| RawSong::read(view, addressing, *offset))
        .collect::<Result<Vec<_>, _>>()?;

    let first = &raw_songs[0];
    for song in &raw_songs[1..] {
        if song.instrument_set_ptr != first.instrument_set_ptr {
            return Err(CodecError::Consistency(
                "songs disagree on the instrument set pointer".to_string(),
            ));
        }
        if song.wave_set_ptr != first.wave_set_ptr {
            return Err(CodecError::Consistency(
                "songs disagree on the wave set pointer".to_string(),
            ));
        }
    }

    let mut landmarks = Landmarks::default();
    for song in &raw_songs {
        landmarks.extend(song.landmarks());
    }

    let instrument_table =
        addressing.resolve_aligned("instrument set", first.instrument_set_ptr, 4)?;
    let wave_table = addressing.resolve_aligned("wave set", first.wave_set_ptr, 8)?;
    landmarks.insert(instrument_table);
    landmarks.insert(wave_table);

    let (waveforms, wave_offsets) = read_wave_table(view, addressing, wave_table, &landmarks)?;
    landmarks.extend(wave_offsets);
    let instruments = read_instrument_table(view, addressing, instrument_table, &landmarks)?;

    let mut budget = MAX_DECODED_STEPS;
    let mut author: Option<String> = None;
    let mut songs = Vec::with_capacity(raw_songs.len());
    for raw in &raw_songs {
        let (data, tag) = raw.decode_body(view, addressing, &mut budget)?;
        let Some((name, song_author)) = tag else {
            songs.push(Song {
                name: String::new(),
                data,
            });
            continue;
        };
        match &author {
            None => author = Some(song_author),
            Some(existing) if *existing != song_author => {
                return Err(CodecError::Consistency(
                    "songs disagree on the author tag".to_string(),
                ));
            }
            Some(_) => {}
        }
        songs.push(Song { name, data });
    }

    let module = Module {
        author: author.unwrap_or_default(),
        instruments,
        waveforms,
        songs,
    };
    debug!(
        songs = module.songs.len(),
        instruments = module.instruments.len(),
        waveforms = module.waveforms.len(),
        "module decoded"
    );
    Ok(module)
}

fn packaged_song_offsets(
    view: ByteView<'_>,
    addressing: Addressing,
) -> Result<Vec<usize>, CodecError> {
    if view.len() < MAGIC.len() || view.slice("magic", 0, MAGIC.len())? != MAGIC {
        return Err(CodecError::Format("missing GAX! magic".to_string()));
    }

    let mut offsets = Vec::new();
    let mut cursor = MAGIC.len();
    while offsets.len() < MAX_TABLE_ENTRIES {
        let Ok(value) = view.u32("song offset table", cursor) else {
            break;
        };
        let Ok(offset) = usize::try_from(value) else {
            break;
        };
        let in_range = offset >= cursor + 4
            && offset % 4 == 0
            && offset.saturating_add(SONG_PROPERTIES_SIZE) <= view.len();
        if !in_range {
            break;
        }
        if !offsets.is_empty() && !plausible_properties(view, addressing, offset) {
            break;
        }
        offsets.push(offset);
        cursor += 4;
    }

    if offsets.is_empty() {
        return Err(CodecError::Format("empty song offset table".to_string()));
    }
    debug!(songs = offsets.len(), "song offset table read");
    Ok(offsets)
}

/// Cheap check used to find where the song offset table ends.
fn plausible_properties(view: ByteView<'_>, addressing: Addressing, offset: usize) -> bool {
    let check = || -> Result<bool, CodecError> {
        let channels = view.u8("song properties", offset + props::CHANNEL_COUNT)?;
        let fx_channels = view.u8("song properties", offset + props::FX_CHANNEL_COUNT)?;
        let reserved = view.u8("song properties", offset + props::RESERVED)?;
        if channels > MAX_CHANNELS || fx_channels > MAX_FX_CHANNELS || reserved != 0 {
            return Ok(false);
        }
        let instruments = view.u32("song properties", offset + props::INSTRUMENT_SET_PTR)?;
        let waves = view.u32("song properties", offset + props::WAVE_SET_PTR)?;
        Ok(addressing.resolve_aligned("instrument set", instruments, 4).is_ok()
            && addressing.resolve_aligned("wave set", waves, 8).is_ok())
    };
    check().unwrap_or(false)
}

#[derive(Debug)]
struct RawSong {
    offset: usize,
    properties: SongProperties,
    step_data: Option<usize>,
    instrument_set_ptr: u32,
    wave_set_ptr: u32,
    order_lists: Vec<usize>,
    /// Name tag of an FX object and where it starts.
    fx_tag: Option<(usize, (String, String))>,
}

impl RawSong {
    fn read(view: ByteView<'_>, addressing: Addressing, offset: usize) -> Result<Self, CodecError> {
        if offset % 4 != 0 {
            return Err(CodecError::Alignment {
                what: "song properties",
                address: u32::try_from(offset).unwrap_or(u32::MAX),
            });
        }
        let header = view.slice("song properties", offset, SONG_PROPERTIES_SIZE)?;
        let at = |field: usize| offset + field;

        let properties = SongProperties {
            channel_count: header[props::CHANNEL_COUNT],
            step_count: view.u16("song properties", at(props::STEP_COUNT))?,
            pattern_count: view.u16("song properties", at(props::PATTERN_COUNT))?,
            restart_position: view.u16("song properties", at(props::RESTART_POSITION))?,
            master_volume: view.u16("song properties", at(props::MASTER_VOLUME))?,
            mixing_rate: view.u16("song properties", at(props::MIXING_RATE))?,
            fx_mixing_rate: view.u16("song properties", at(props::FX_MIXING_RATE))?,
            fx_channel_count: header[props::FX_CHANNEL_COUNT],
        };
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

        let instrument_set_ptr = view.u32("song properties", at(props::INSTRUMENT_SET_PTR))?;
        let wave_set_ptr = view.u32("song properties", at(props::WAVE_SET_PTR))?;

        let channel_count = usize::from(properties.channel_count);
        let order_bytes = usize::from(properties.pattern_count) * ORDER_ENTRY_SIZE;
        let mut order_lists = Vec::with_capacity(channel_count);
        for channel in 0..channel_count {
            let pointer = view.u32("channel table", offset + SONG_PROPERTIES_SIZE + channel * 4)?;
            order_lists.push(addressing.resolve_aligned("order list", pointer, order_bytes)?);
        }

        let step_pointer = view.u32("song properties", at(props::STEP_DATA_PTR))?;
        let (step_data, fx_tag) = if channel_count == 0 {
            (None, fx_name_tag(view, addressing, step_pointer, offset))
        } else {
            (Some(addressing.resolve("step data", step_pointer, 1)?), None)
        };

        Ok(Self {
            offset,
            properties,
            step_data,
            instrument_set_ptr,
            wave_set_ptr,
            order_lists,
            fx_tag,
        })
    }

    fn landmarks(&self) -> impl Iterator<Item = usize> + '_ {
        std::iter::once(self.offset)
            .chain(self.step_data)
            .chain(self.fx_tag.as_ref().map(|(start, _)| *start))
            .chain(self.order_lists.iter().copied())
    }

    fn decode_body(
        &self,
        view: ByteView<'_>,
        addressing: Addressing,
        budget: &mut usize,
    ) -> Result<(SongData, Option<(String, String)>), CodecError> {
        let Some(step_data) = self.step_data else {
            return Ok((
                SongData {
                    properties: self.properties,
                    order_list: Vec::new(),
                    patterns: Vec::new(),
                },
                self.fx_tag.as_ref().map(|(_, tag)| tag.clone()),
            ));
        };

        let pattern_count = usize::from(self.properties.pattern_count);
        let mut raw_lists = Vec::with_capacity(self.order_lists.len());
        let mut addresses = BTreeSet::new();
        for list_offset in &self.order_lists {
            let mut entries = Vec::with_capacity(pattern_count);
            for position in 0..pattern_count {
                let entry = list_offset + position * ORDER_ENTRY_SIZE;
                let relative = view.u16("order list", entry)?;
                let transpose = view.u8("order list", entry + 2)? as i8;
                let address = step_data + usize::from(relative);
                addresses.insert(address);
                entries.push((address, transpose));
            }
            raw_lists.push(entries);
        }

        let addresses: Vec<usize> = addresses.into_iter().collect();
        let step_count = usize::from(self.properties.step_count);
        let mut patterns = Vec::with_capacity(addresses.len());
        let mut pattern_end = step_data;
        for address in &addresses {
            *budget = budget.checked_sub(step_count).ok_or_else(|| {
                CodecError::limit("decoded step", MAX_DECODED_STEPS + 1, MAX_DECODED_STEPS)
            })?;
            let (steps, used) = decode_steps(view.tail("step data", *address)?, step_count)?;
            pattern_end = pattern_end.max(address + used);
            patterns.push(Pattern::new(steps));
        }

        let order_list = raw_lists
            .into_iter()
            .map(|entries| {
                entries
                    .into_iter()
                    .map(|(address, transpose)| {
                        // every address was inserted above
                        let index = addresses.binary_search(&address).unwrap_or_default();
                        OrderEntry::new(u16::try_from(index).unwrap_or(u16::MAX), transpose)
                    })
                    .collect()
            })
            .collect();

        let tag = self.order_lists.iter().min().and_then(|end| {
            view.slice("song name", pattern_end, end.saturating_sub(pattern_end))
                .ok()
                .and_then(parse_name_tag)
                .or_else(|| scan_name_tag(view, *end))
        });
        if tag.is_none() {
            warn!(offset = self.offset, "song has no name/author tag");
        }

        debug!(
            offset = self.offset,
            channels = self.properties.channel_count,
            patterns = patterns.len(),
            "song decoded"
        );
        Ok((
            SongData {
                properties: self.properties,
                order_list,
                patterns,
            },
            tag,
        ))
    }
}

/// Splits `"<name>" © <author>` plus alignment padding. The name runs up to
/// the first separator, so the author may hold any tag byte.
fn parse_name_tag(bytes: &[u8]) -> Option<(String, String)> {
    let mut end = bytes.len();
    for _ in 0..MAX_NAME_PADDING {
        if end == 0 || bytes[end - 1] != 0 {
            break;
        }
        end -= 1;
    }

    let field = bytes[..end].strip_prefix(&[QUOTE])?;
    let split = field
        .windows(NAME_SEPARATOR.len())
        .position(|window| window == NAME_SEPARATOR)?;
    let name = latin1(&field[..split]);
    let author = latin1(&field[split + NAME_SEPARATOR.len()..]);
    Some((name, author))
}

/// Walks back from `end` over printable tag bytes to the opening quote, for
/// songs whose pattern data does not end right at the tag.
fn scan_name_tag(view: ByteView<'_>, end: usize) -> Option<(String, String)> {
    let bytes = view.slice("song name", 0, end).ok()?;
    let mut end = end;
    for _ in 0..MAX_NAME_PADDING {
        if end == 0 || bytes[end - 1] != 0 {
            break;
        }
        end -= 1;
    }

    let mut start = end;
    let mut quotes = 0;
    while start > 0 && is_tag_byte(bytes[start - 1]) {
        start -= 1;
        if bytes[start] == QUOTE {
            quotes += 1;
            if quotes == 2 {
                break;
            }
        }
    }
    if quotes < 2 {
        return None;
    }
    parse_name_tag(&bytes[start..end])
}

/// Tag of an FX object, stored between its step pointer and its properties.
fn fx_name_tag(
    view: ByteView<'_>,
    addressing: Addressing,
    pointer: u32,
    properties: usize,
) -> Option<(usize, (String, String))> {
    if pointer == 0 {
        return None;
    }
    let start = addressing.resolve("fx name", pointer, 0).ok()?;
    let length = properties.checked_sub(start)?;
    let tag = parse_name_tag(view.slice("fx name", start, length).ok()?)?;
    Some((start, tag))
}

fn is_tag_byte(byte: u8) -> bool {
    (0x20..=0x92).contains(&byte) || byte == COPYRIGHT
}

fn latin1(bytes: &[u8]) -> String {
    bytes.iter().map(|byte| char::from(*byte)).collect()
}

#[derive(Debug, Default)]
struct Landmarks(BTreeSet<usize>);

impl Landmarks {
    fn insert(&mut self, offset: usize) {
        self.0.insert(offset);
    }

    fn extend(&mut self, offsets: impl IntoIterator<Item = usize>) {
        self.0.extend(offsets);
    }

    /// First known structure strictly after `offset`.
    fn after(&self, offset: usize, fallback: usize) -> usize {
        self.0
            .range(offset + 1..)
            .next()
            .copied()
            .unwrap_or(fallback)
    }
}

fn read_wave_table(
    view: ByteView<'_>,
    addressing: Addressing,
    table: usize,
    landmarks: &Landmarks,
) -> Result<(Vec<Vec<u8>>, Vec<usize>), CodecError> {
    let bound = landmarks.after(table, view.len());
    let mut waveforms = Vec::new();
    let mut offsets = Vec::new();
    let mut cursor = table;

    while waveforms.len() < MAX_WAVEFORMS && cursor + 8 <= bound {
        let pointer = view.u32("wave set", cursor)?;
        let length = view.u32("wave set", cursor + 4)?;
        cursor += 8;

        if pointer == 0 && length == 0 {
            waveforms.push(Vec::new());
            continue;
        }
        let length = length as usize;
        if length > cursor {
            break;
        }
        let Ok(offset) = addressing.resolve("waveform", pointer, length) else {
            break;
        };
        waveforms.push(view.slice("waveform", offset, length)?.to_vec());
        offsets.push(offset);
    }

    debug!(table, waveforms = waveforms.len(), "wave set read");
    Ok((waveforms, offsets))
}

fn read_instrument_table(
    view: ByteView<'_>,
    addressing: Addressing,
    table: usize,
    landmarks: &Landmarks,
) -> Result<Vec<Instrument>, CodecError> {
    let bound = landmarks.after(table, view.len());
    let mut instruments = Vec::new();
    let mut cursor = table;

    while instruments.len() < MAX_INSTRUMENTS && cursor + 4 <= bound {
        let pointer = view.u32("instrument set", cursor)?;
        let Ok(offset) = addressing.resolve_aligned("instrument", pointer, INSTRUMENT_HEADER_SIZE)
        else {
            break;
        };
        instruments.push(read_instrument(view, addressing, offset)?);
        cursor += 4;
    }

    debug!(table, instruments = instruments.len(), "instrument set read");
    Ok(instruments)
}

fn read_instrument(
    view: ByteView<'_>,
    addressing: Addressing,
    offset: usize,
) -> Result<Instrument, CodecError> {
    let header = view.slice("instrument", offset, INSTRUMENT_HEADER_SIZE)?;
    let wave_slots = [header[1], header[2], header[3], header[4]];
    let vibrato = Vibrato {
        wait: header[8],
        depth: header[9],
        speed: header[10],
    };
    let envelope_ptr = view.u32("instrument", offset + 12)?;
    let row_speed = header[16];
    let row_count = usize::from(header[17]);
    let reserved = view.u16("instrument", offset + 18)?;
    let perf_ptr = view.u32("instrument", offset + 20)?;

    let perf_offset = addressing.resolve_aligned("perf list", perf_ptr, row_count * PERF_ROW_SIZE)?;
    let rows = (0..row_count)
        .map(|row| read_perf_row(view, perf_offset + row * PERF_ROW_SIZE))
        .collect::<Result<Vec<_>, _>>()?;

    let envelope = read_envelope(view, addressing, envelope_ptr)?;

    let mut wave_params = [None; WAVE_SLOTS];
    let mut cursor = offset + INSTRUMENT_HEADER_SIZE;
    let used: Vec<usize> = if wave_slots.iter().any(|slot| *slot != 0) {
        (0..WAVE_SLOTS).filter(|slot| wave_slots[*slot] != 0).collect()
    } else {
        vec![0]
    };
    for slot in used {
        wave_params[slot] = read_wave_param(view, cursor)?;
        cursor += WAVE_PARAM_SIZE;
    }

    Ok(Instrument {
        is_null: header[0] != 0,
        wave_slots,
        vibrato,
        perf_list: PerfList { row_speed, rows },
        envelope,
        wave_params,
        reserved,
    })
}

fn read_perf_row(view: ByteView<'_>, offset: usize) -> Result<PerfRow, CodecError> {
    let row = view.slice("perf row", offset, PERF_ROW_SIZE)?;
    Ok(PerfRow {
        note: row[0],
        fixed: row[1] != 0,
        wave_slot: row[2],
        effects: [
            PerfEffect::from_bytes(row[5], row[4]),
            PerfEffect::from_bytes(row[7], row[6]),
        ],
    })
}

fn read_envelope(
    view: ByteView<'_>,
    addressing: Addressing,
    pointer: u32,
) -> Result<VolumeEnvelope, CodecError> {
    let offset = addressing.resolve_aligned("volume envelope", pointer, ENVELOPE_HEADER_SIZE)?;
    let header = view.slice("volume envelope", offset, ENVELOPE_HEADER_SIZE)?;
    let count = usize::from(header[0]);
    view.slice(
        "volume envelope",
        offset,
        ENVELOPE_HEADER_SIZE + count * ENVELOPE_POINT_SIZE,
    )?;

    let points = (0..count)
        .map(|point| {
            let at = offset + ENVELOPE_HEADER_SIZE + point * ENVELOPE_POINT_SIZE;
            Ok(EnvelopePoint {
                time: view.u16("envelope point", at)?,
                volume: view.u8("envelope point", at + 4)?,
            })
        })
        .collect::<Result<Vec<_>, CodecError>>()?;

    Ok(VolumeEnvelope {
        points,
        sustain: optional_index(header[1]),
        loop_start: optional_index(header[2]),
        loop_end: optional_index(header[3]),
    })
}

fn read_wave_param(view: ByteView<'_>, offset: usize) -> Result<Option<WaveParam>, CodecError> {
    let modulate = view.u8("wave param", offset + 2)?;
    let ping_pong = view.u8("wave param", offset + 3)?;
    let param = WaveParam {
        finetune: view.i16("wave param", offset)?,
        modulate: modulate == 1,
        ping_pong: ping_pong == 1,
        start_position: view.u32("wave param", offset + 4)?,
        loop_start: view.u32("wave param", offset + 8)?,
        loop_end: view.u32("wave param", offset + 12)?,
        modulate_size: view.i32("wave param", offset + 16)?,
        modulate_step: view.u16("wave param", offset + 20)?,
        modulate_speed: view.u16("wave param", offset + 22)?,
    };
    Ok((modulate <= 1 && ping_pong <= 1).then_some(param))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn name_tag_is_found_behind_padding() {
        let mut bytes = vec![0x00, 0x22, 0x80];
        bytes.extend_from_slice(b"\"Title\" \xA9 Someone");
        let end = bytes.len();
        bytes.extend_from_slice(&[0, 0, 0]);
        let view = ByteView::new(&bytes);
        assert_eq!(
            scan_name_tag(view, end + 3),
            Some(("Title".to_string(), "Someone".to_string()))
        );
    }

    #[test]
    fn empty_names_are_allowed() {
        let bytes = b"\x80\"\" \xA9 A. Composer".to_vec();
        let view = ByteView::new(&bytes);
        assert_eq!(
            scan_name_tag(view, bytes.len()),
            Some((String::new(), "A. Composer".to_string()))
        );
    }

    #[test]
    fn missing_tag_reads_as_none() {
        let bytes = vec![0x80, 0x81, 0x01, 0x00];
        assert_eq!(scan_name_tag(ByteView::new(&bytes), bytes.len()), None);
    }

    #[test]
    fn bounded_tag_keeps_quotes_and_latin1() {
        let bytes = b"\"Caf\xE9\" \xA9 The \"Band\"\0\0".to_vec();
        assert_eq!(
            parse_name_tag(&bytes),
            Some(("Caf\u{E9}".to_string(), "The \"Band\"".to_string()))
        );
        assert_eq!(parse_name_tag(b"\x80\"A\" \xA9 B"), None);
        assert_eq!(parse_name_tag(b"\"no separator\""), None);
    }

    #[test]
    fn landmarks_pick_the_next_structure() {
        let mut landmarks = Landmarks::default();
        landmarks.extend([0x40, 0x100, 0x80]);
        assert_eq!(landmarks.after(0x40, 0x1000), 0x80);
        assert_eq!(landmarks.after(0x100, 0x1000), 0x1000);
    }
}
