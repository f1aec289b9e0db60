//! Binary module container: packaged `GAX!` blobs and in-cartridge images.

mod address;
mod read;
mod steps;
mod write;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::CodecError;

pub use address::{AddressMode, ROM_BASE, ROM_END, is_rom_address};
pub use read::decode;
pub use steps::{decode_steps, encode_steps};
pub use write::{CompiledObject, encode, encode_object, envelope_slope};

pub const MAGIC: &[u8; 4] = b"GAX!";
pub const SONG_PROPERTIES_SIZE: usize = 0x20;
pub const INSTRUMENT_HEADER_SIZE: usize = 24;
pub const WAVE_PARAM_SIZE: usize = 24;
pub const PERF_ROW_SIZE: usize = 8;
pub const ENVELOPE_HEADER_SIZE: usize = 4;
pub const ENVELOPE_POINT_SIZE: usize = 8;
pub const ORDER_ENTRY_SIZE: usize = 4;
/// Channel-table entries reserved after every song-properties struct.
pub const CHANNEL_TABLE_ENTRIES: usize = 42;
pub const MAX_ORDER_LENGTH: usize = 42;
pub const MAX_INSTRUMENTS: usize = 255;
pub const MAX_WAVEFORMS: usize = 255;
pub const MAX_TABLE_ENTRIES: usize = 255;
/// Length of the silent waveform written for waveform 0.
pub const NULL_WAVEFORM_LEN: usize = 2048;
const ABSENT: u8 = 0xFF;

pub(crate) mod props {
    pub const CHANNEL_COUNT: usize = 0x00;
    pub const STEP_COUNT: usize = 0x02;
    pub const PATTERN_COUNT: usize = 0x04;
    pub const RESTART_POSITION: usize = 0x06;
    pub const MASTER_VOLUME: usize = 0x08;
    pub const STEP_DATA_PTR: usize = 0x0C;
    pub const INSTRUMENT_SET_PTR: usize = 0x10;
    pub const WAVE_SET_PTR: usize = 0x14;
    pub const MIXING_RATE: usize = 0x18;
    pub const FX_MIXING_RATE: usize = 0x1A;
    pub const FX_CHANNEL_COUNT: usize = 0x1C;
    pub const RESERVED: usize = 0x1E;
}

/// Bounds-checked little-endian view over a decode buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ByteView<'a> {
    bytes: &'a [u8],
}

impl<'a> ByteView<'a> {
    pub(crate) fn new(bytes: &'a [u8]) -> Self {
        Self { bytes }
    }

    pub(crate) fn len(&self) -> usize {
        self.bytes.len()
    }

    pub(crate) fn slice(
        &self,
        what: &'static str,
        offset: usize,
        length: usize,
    ) -> Result<&'a [u8], CodecError> {
        offset
            .checked_add(length)
            .and_then(|end| self.bytes.get(offset..end))
            .ok_or_else(|| CodecError::bounds(what, offset as u64, length))
    }

    pub(crate) fn tail(&self, what: &'static str, offset: usize) -> Result<&'a [u8], CodecError> {
        self.bytes
            .get(offset..)
            .ok_or_else(|| CodecError::bounds(what, offset as u64, 0))
    }

    pub(crate) fn u8(&self, what: &'static str, offset: usize) -> Result<u8, CodecError> {
        Ok(self.slice(what, offset, 1)?[0])
    }

    pub(crate) fn u16(&self, what: &'static str, offset: usize) -> Result<u16, CodecError> {
        Ok(LittleEndian::read_u16(self.slice(what, offset, 2)?))
    }

    pub(crate) fn i16(&self, what: &'static str, offset: usize) -> Result<i16, CodecError> {
        Ok(LittleEndian::read_i16(self.slice(what, offset, 2)?))
    }

    pub(crate) fn u32(&self, what: &'static str, offset: usize) -> Result<u32, CodecError> {
        Ok(LittleEndian::read_u32(self.slice(what, offset, 4)?))
    }

    pub(crate) fn i32(&self, what: &'static str, offset: usize) -> Result<i32, CodecError> {
        Ok(LittleEndian::read_i32(self.slice(what, offset, 4)?))
    }
}

fn optional_index(byte: u8) -> Option<u8> {
    (byte != ABSENT).then_some(byte)
}

fn index_byte(index: Option<u8>) -> u8 {
    index.unwrap_or(ABSENT)
}
