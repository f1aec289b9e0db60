//! Heuristic search for song-properties structs inside a cartridge image.

use byteorder::{ByteOrder, LittleEndian};
use tracing::{debug, instrument};

use crate::{
    codec::{
        ROM_BASE, SONG_PROPERTIES_SIZE, is_rom_address,
        props::{
            CHANNEL_COUNT, INSTRUMENT_SET_PTR, MIXING_RATE, RESERVED, STEP_DATA_PTR, WAVE_SET_PTR,
        },
    },
    model::MAX_CHANNELS,
    timing::is_engine_mixing_rate,
};

/// Whether a music song's properties plausibly start at `offset` of a
/// cartridge image whose first byte maps to the start of the ROM window.
///
/// FX objects (no channels) are never reported.
#[must_use]
pub fn is_song_properties(buffer: &[u8], offset: usize) -> bool {
    let Some(end) = offset.checked_add(SONG_PROPERTIES_SIZE) else {
        return false;
    };
    if offset % 4 != 0 || end >= buffer.len() {
        return false;
    }
    let header = &buffer[offset..end];

    let channel_count = header[CHANNEL_COUNT];
    if channel_count == 0 || channel_count > MAX_CHANNELS || header[RESERVED] != 0 {
        return false;
    }

    let pointers_valid = [STEP_DATA_PTR, INSTRUMENT_SET_PTR, WAVE_SET_PTR]
        .iter()
        .all(|field| points_into(buffer, LittleEndian::read_u32(&header[*field..])));
    if !pointers_valid {
        return false;
    }
    if !is_engine_mixing_rate(LittleEndian::read_u16(&header[MIXING_RATE..])) {
        return false;
    }

    let table_len = usize::from(channel_count) * 4;
    if end + table_len >= buffer.len() {
        return false;
    }
    buffer[end..end + table_len]
        .chunks_exact(4)
        .map(LittleEndian::read_u32)
        .all(|address| is_rom_address(address) && address % 4 == 0)
}

/// Every 4-byte aligned offset of `buffer` accepted by [`is_song_properties`].
#[instrument(skip(buffer), fields(bytes = buffer.len()))]
pub fn scan_song_properties(buffer: &[u8]) -> Vec<usize> {
    let found: Vec<usize> = (0..buffer.len())
        .step_by(4)
        .filter(|offset| is_song_properties(buffer, *offset))
        .collect();
    debug!(candidates = found.len(), "cartridge scanned");
    found
}

fn points_into(buffer: &[u8], address: u32) -> bool {
    is_rom_address(address)
        && address % 4 == 0
        && (address - ROM_BASE) as usize <= buffer.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(channels: u8) -> Vec<u8> {
        let mut rom = vec![0_u8; 0x100];
        rom[0x40] = channels;
        LittleEndian::write_u32(&mut rom[0x40 + STEP_DATA_PTR..], ROM_BASE + 0x80);
        LittleEndian::write_u32(&mut rom[0x40 + INSTRUMENT_SET_PTR..], ROM_BASE + 0x90);
        LittleEndian::write_u32(&mut rom[0x40 + WAVE_SET_PTR..], ROM_BASE + 0xA0);
        LittleEndian::write_u16(&mut rom[0x40 + MIXING_RATE..], 15_769);
        for channel in 0..usize::from(channels) {
            LittleEndian::write_u32(&mut rom[0x60 + channel * 4..], ROM_BASE + 0xB0);
        }
        rom
    }

    #[test]
    fn accepts_a_plausible_struct() {
        let rom = candidate(2);
        assert!(is_song_properties(&rom, 0x40));
        assert_eq!(scan_song_properties(&rom), vec![0x40]);
    }

    #[test]
    fn rejects_fx_objects_and_oversized_channel_counts() {
        assert!(!is_song_properties(&candidate(0), 0x40));
        let mut rom = candidate(2);
        rom[0x40] = 33;
        assert!(!is_song_properties(&rom, 0x40));
    }

    #[test]
    fn rejects_unknown_mixing_rates_and_reserved_bytes() {
        let mut rom = candidate(2);
        LittleEndian::write_u16(&mut rom[0x40 + MIXING_RATE..], 16_000);
        assert!(!is_song_properties(&rom, 0x40));

        let mut rom = candidate(2);
        rom[0x40 + RESERVED] = 1;
        assert!(!is_song_properties(&rom, 0x40));
    }

    #[test]
    fn rejects_pointers_outside_the_window() {
        let mut rom = candidate(2);
        LittleEndian::write_u32(&mut rom[0x40 + WAVE_SET_PTR..], 0x0300_0000);
        assert!(!is_song_properties(&rom, 0x40));

        let mut rom = candidate(2);
        LittleEndian::write_u32(&mut rom[0x64..], ROM_BASE + 0xB2);
        assert!(!is_song_properties(&rom, 0x40));
    }

    #[test]
    fn tolerates_offsets_near_the_end() {
        let rom = candidate(2);
        assert!(!is_song_properties(&rom, rom.len() - 4));
        assert!(!is_song_properties(&rom, usize::MAX - 3));
    }
}
