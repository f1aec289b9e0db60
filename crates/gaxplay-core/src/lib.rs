pub mod channel;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod effect;
pub mod error;
pub mod export;
pub mod fixtures;
pub mod locate;
pub mod mixer;
pub mod model;
pub mod parity;
pub mod persistence;
pub mod sequencer;
pub mod timing;

pub use channel::{Bank, Channel, ChannelState, TickContext};
pub use codec::{AddressMode, CompiledObject, decode, encode, encode_object};
pub use config::AppConfig;
pub use diagnostics::{TelemetryGuard, init_tracing};
pub use effect::{Opcode, PerfEffect, PerfEffectKind, StepEffect, StepEffectKind};
pub use error::CodecError;
pub use export::{
    RenderLimits, RenderedSong, export_song, export_wav, export_waveforms, render_song,
};
pub use locate::{is_song_properties, scan_song_properties};
pub use model::{
    EnvelopePoint, Instrument, Module, Note, OrderEntry, Pattern, PerfList, PerfRow, Song,
    SongData, SongProperties, Step, Vibrato, VolumeEnvelope, WaveParam,
};
pub use parity::{ParityReport, generate_parity_report};
pub use persistence::{find_module_files, load_cartridge, load_module, save_module, save_object};
pub use sequencer::{PlaybackError, PlaybackOptions, Sequencer, estimate_work_ram};
