use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Hardware address of cartridge offset 0.
pub const ROM_BASE: u32 = 0x0800_0000;
/// Last mapped cartridge address (32 MiB window).
pub const ROM_END: u32 = 0x09FF_FFFF;

#[must_use]
pub fn is_rom_address(address: u32) -> bool {
    (ROM_BASE..=ROM_END).contains(&address)
}

/// Where the structures of a module live and how their pointers are biased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressMode {
    /// Stand-alone blob: magic, song offset table, then the structures.
    Packaged,
    /// Structures inside a cartridge image; the song-properties offsets come
    /// from an external locator.
    Cartridge { song_offsets: Vec<usize> },
    /// Headerless blob from `encode_object`, with the song-properties
    /// offsets it reported.
    Object { song_offsets: Vec<usize> },
}

/// Translates stored pointers into offsets of the decode buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Addressing {
    bias: u64,
    cartridge: bool,
    len: usize,
}

impl Addressing {
    pub(crate) fn new(mode: &AddressMode, base_offset: u32, len: usize) -> Self {
        match mode {
            AddressMode::Packaged | AddressMode::Object { .. } => Self {
                bias: u64::from(base_offset),
                cartridge: false,
                len,
            },
            AddressMode::Cartridge { .. } => Self {
                bias: u64::from(ROM_BASE) + u64::from(base_offset),
                cartridge: true,
                len,
            },
        }
    }

    /// Buffer offset of a pointer to `length` bytes.
    pub(crate) fn resolve(
        &self,
        what: &'static str,
        address: u32,
        length: usize,
    ) -> Result<usize, CodecError> {
        if self.cartridge && !is_rom_address(address) {
            return Err(CodecError::bounds(what, address, length));
        }

        let offset = u64::from(address)
            .checked_sub(self.bias)
            .ok_or_else(|| CodecError::bounds(what, address, length))?;
        let end = offset.saturating_add(length as u64);
        if end > self.len as u64 {
            return Err(CodecError::bounds(what, address, length));
        }

        usize::try_from(offset).map_err(|_| CodecError::bounds(what, address, length))
    }

    /// Like [`Self::resolve`] for pointers that must target a 4-byte boundary.
    pub(crate) fn resolve_aligned(
        &self,
        what: &'static str,
        address: u32,
        length: usize,
    ) -> Result<usize, CodecError> {
        if address % 4 != 0 {
            return Err(CodecError::Alignment { what, address });
        }
        self.resolve(what, address, length)
    }
}
