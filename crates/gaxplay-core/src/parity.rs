use std::{fs, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use crate::{
    codec,
    export::{RenderLimits, render_song},
    model::Module,
    sequencer::PlaybackOptions,
};

const PARITY_SCHEMA_VERSION: u32 = 1;
const AUDIO_FINGERPRINT_SAMPLES: usize = 96_000;
const AUDIO_FINGERPRINT_SECONDS: f64 = 30.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParityReport {
    pub schema_version: u32,
    pub song_count: usize,
    pub instrument_count: usize,
    pub waveform_count: usize,
    pub step_count: usize,
    pub module_hash: String,
    /// Hash of the opening samples of the first music song.
    pub audio_hash: String,
}

#[instrument(skip(module), fields(songs = module.songs.len()))]
pub fn generate_parity_report(module: &Module) -> Result<ParityReport> {
    let module_bytes = codec::encode(module, 0).context("failed to encode module")?;

    let mut audio_bytes = Vec::new();
    if let Some(song) = module
        .songs
        .iter()
        .position(|song| !song.data.is_fx_object())
    {
        let limits = RenderLimits {
            max_loops: 0,
            max_seconds: AUDIO_FINGERPRINT_SECONDS,
        };
        let rendered = render_song(module, song, &PlaybackOptions::default(), &limits)
            .with_context(|| format!("failed to render song {song} for parity"))?;
        audio_bytes.extend(
            rendered
                .samples
                .iter()
                .take(AUDIO_FINGERPRINT_SAMPLES)
                .copied(),
        );
    }
    debug!(audio_bytes = audio_bytes.len(), "parity fingerprint rendered");

    Ok(ParityReport {
        schema_version: PARITY_SCHEMA_VERSION,
        song_count: module.songs.len(),
        instrument_count: module.instruments.len(),
        waveform_count: module.waveforms.len(),
        step_count: module.step_count(),
        module_hash: hash_hex(&module_bytes),
        audio_hash: hash_hex(&audio_bytes),
    })
}

pub fn read_parity_report(path: &Path) -> Result<ParityReport> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed to read parity report: {}", path.display()))?;
    let report: ParityReport =
        serde_json::from_slice(&bytes).context("failed to parse parity report json")?;
    Ok(report)
}

pub fn write_parity_report(path: &Path, report: &ParityReport) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create parity directory: {}", parent.display()))?;
    }

    let json = serde_json::to_vec_pretty(report).context("failed to encode parity report json")?;
    fs::write(path, json)
        .with_context(|| format!("failed to write parity report: {}", path.display()))?;
    Ok(())
}

fn hash_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
