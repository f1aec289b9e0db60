use serde::{Deserialize, Serialize};

/// An effect code table with a fixed set of recognized opcodes.
pub trait EffectCode: Copy + Sized {
    fn from_code(code: u8) -> Option<Self>;
    fn code(self) -> u8;
}

/// A decoded effect code. Unrecognized bytes are kept verbatim so that a
/// module re-encodes to the same opcode it was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode<K> {
    Known(K),
    Raw(u8),
}

impl<K: EffectCode> Opcode<K> {
    #[must_use]
    pub fn from_byte(byte: u8) -> Self {
        K::from_code(byte).map_or(Self::Raw(byte), Self::Known)
    }

    #[must_use]
    pub fn to_byte(self) -> u8 {
        match self {
            Self::Known(kind) => kind.code(),
            Self::Raw(byte) => byte,
        }
    }

    #[must_use]
    pub fn known(self) -> Option<K> {
        match self {
            Self::Known(kind) => Some(kind),
            Self::Raw(_) => None,
        }
    }
}

impl<K> From<K> for Opcode<K> {
    fn from(kind: K) -> Self {
        Self::Known(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepEffectKind {
    PitchSlideUp,
    PitchSlideDown,
    TonePortamento,
    SpeedModulate,
    VolumeSlideUp,
    VolumeSlideDown,
    SetVolume,
    PatternBreak,
    NoteDelay,
    SetSpeed,
}

impl EffectCode for StepEffectKind {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x1 => Self::PitchSlideUp,
            0x2 => Self::PitchSlideDown,
            0x3 => Self::TonePortamento,
            0x7 => Self::SpeedModulate,
            0xA => Self::VolumeSlideUp,
            0xB => Self::VolumeSlideDown,
            0xC => Self::SetVolume,
            0xD => Self::PatternBreak,
            0xE => Self::NoteDelay,
            0xF => Self::SetSpeed,
            _ => return None,
        })
    }

    fn code(self) -> u8 {
        match self {
            Self::PitchSlideUp => 0x1,
            Self::PitchSlideDown => 0x2,
            Self::TonePortamento => 0x3,
            Self::SpeedModulate => 0x7,
            Self::VolumeSlideUp => 0xA,
            Self::VolumeSlideDown => 0xB,
            Self::SetVolume => 0xC,
            Self::PatternBreak => 0xD,
            Self::NoteDelay => 0xE,
            Self::SetSpeed => 0xF,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PerfEffectKind {
    PitchSlideUp,
    PitchSlideDown,
    JumpToRow,
    JumpDelay,
    VolumeSlideUp,
    VolumeSlideDown,
    SetVolume,
    SetSpeed,
}

impl EffectCode for PerfEffectKind {
    fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x1 => Self::PitchSlideUp,
            0x2 => Self::PitchSlideDown,
            0x5 => Self::JumpToRow,
            0x6 => Self::JumpDelay,
            0xA => Self::VolumeSlideUp,
            0xB => Self::VolumeSlideDown,
            0xC => Self::SetVolume,
            0xF => Self::SetSpeed,
            _ => return None,
        })
    }

    fn code(self) -> u8 {
        match self {
            Self::PitchSlideUp => 0x1,
            Self::PitchSlideDown => 0x2,
            Self::JumpToRow => 0x5,
            Self::JumpDelay => 0x6,
            Self::VolumeSlideUp => 0xA,
            Self::VolumeSlideDown => 0xB,
            Self::SetVolume => 0xC,
            Self::SetSpeed => 0xF,
        }
    }
}

/// Effect column of a pattern step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepEffect {
    pub kind: Opcode<StepEffectKind>,
    pub param: u8,
}

impl StepEffect {
    #[must_use]
    pub fn new(kind: impl Into<Opcode<StepEffectKind>>, param: u8) -> Self {
        Self {
            kind: kind.into(),
            param,
        }
    }

    /// Splits an effect column into its optional form. Code 0 with param 0 is
    /// the empty column.
    #[must_use]
    pub fn from_bytes(code: u8, param: u8) -> Option<Self> {
        if code == 0 && param == 0 {
            return None;
        }
        Some(Self {
            kind: Opcode::from_byte(code),
            param,
        })
    }
}

/// One of the two effect columns of a performance-list row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PerfEffect {
    pub kind: Opcode<PerfEffectKind>,
    pub param: u8,
}

impl PerfEffect {
    #[must_use]
    pub fn new(kind: impl Into<Opcode<PerfEffectKind>>, param: u8) -> Self {
        Self {
            kind: kind.into(),
            param,
        }
    }

    #[must_use]
    pub fn from_bytes(code: u8, param: u8) -> Option<Self> {
        if code == 0 && param == 0 {
            return None;
        }
        Some(Self {
            kind: Opcode::from_byte(code),
            param,
        })
    }
}
