use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::{
    model::Module,
    sequencer::{PlaybackError, PlaybackOptions, Sequencer},
    timing::{seconds_to_ticks, ticks_to_seconds},
};

const UNSIGNED_BIAS: i16 = 128;
/// Playback rate used for raw waveform dumps.
pub const WAVEFORM_DUMP_RATE: u32 = 7_884;

/// When an offline render stops.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderLimits {
    /// Loops played after the first pass through the song.
    pub max_loops: u32,
    /// Hard cap on the rendered duration; songs that never loop or stop end here.
    pub max_seconds: f64,
}

impl Default for RenderLimits {
    fn default() -> Self {
        Self {
            max_loops: 0,
            max_seconds: 600.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedSong {
    /// Unsigned 8-bit mono samples.
    pub samples: Vec<u8>,
    pub sample_rate: u32,
    pub ticks: u64,
    pub loops: u32,
    /// Playback reached the stop sentinel before any limit.
    pub stopped: bool,
}

impl RenderedSong {
    #[must_use]
    pub fn duration_seconds(&self, frame_rate: f64) -> f64 {
        ticks_to_seconds(self.ticks, frame_rate)
    }
}

/// Plays one song offline, frame by frame.
///
/// Rendering ends when the song stops, when the duration cap is hit, or on
/// the first row read after `max_loops + 1` passes.
#[instrument(skip(module, options), fields(song, max_loops = limits.max_loops))]
pub fn render_song(
    module: &Module,
    song: usize,
    options: &PlaybackOptions,
    limits: &RenderLimits,
) -> Result<RenderedSong, PlaybackError> {
    let mut sequencer = Sequencer::new(module, song, options)?;
    let tick_cap = seconds_to_ticks(limits.max_seconds, options.frame_rate);
    let mut samples = Vec::new();

    loop {
        if sequencer.is_stopped()
            || sequencer.ticks() >= tick_cap
            || (sequencer.loop_count() > limits.max_loops && sequencer.row_pending())
        {
            break;
        }
        samples.extend_from_slice(sequencer.tick());
    }

    let rendered = RenderedSong {
        samples,
        sample_rate: sequencer.mixing_rate(),
        ticks: sequencer.ticks(),
        loops: sequencer.loop_count(),
        stopped: sequencer.is_stopped(),
    };
    debug!(
        samples = rendered.samples.len(),
        ticks = rendered.ticks,
        loops = rendered.loops,
        stopped = rendered.stopped,
        "song render completed"
    );
    Ok(rendered)
}

/// Writes unsigned 8-bit mono samples as a PCM WAV file.
#[instrument(skip(samples), fields(path = %path.display(), samples = samples.len()))]
pub fn export_wav(path: &Path, samples: &[u8], sample_rate: u32) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| {
            format!(
                "failed to create wav output directory: {}",
                parent.display()
            )
        })?;
    }

    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 8,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec)
        .with_context(|| format!("failed to create wav file: {}", path.display()))?;

    // hound takes signed samples and stores 8-bit data offset by 128
    for sample in samples {
        let signed = (i16::from(*sample) - UNSIGNED_BIAS) as i8;
        writer
            .write_sample(signed)
            .context("failed to write wav sample")?;
    }

    writer.finalize().context("failed to finalize wav file")?;
    info!(sample_rate, "wav export completed");
    Ok(())
}

/// Renders `song` and writes it to `path`.
#[instrument(skip(module, options, limits), fields(path = %path.display(), song))]
pub fn export_song(
    module: &Module,
    song: usize,
    options: &PlaybackOptions,
    limits: &RenderLimits,
    path: &Path,
) -> Result<RenderedSong> {
    let rendered = render_song(module, song, options, limits)
        .with_context(|| format!("failed to render song {song}"))?;
    export_wav(path, &rendered.samples, rendered.sample_rate)?;
    Ok(rendered)
}

/// Writes every non-empty waveform of `module` to `dir` as
/// `wave_<index>.wav` and returns the written paths in table order.
#[instrument(skip(module), fields(dir = %dir.display(), waveforms = module.waveforms.len()))]
pub fn export_waveforms(module: &Module, dir: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::new();
    for (index, waveform) in module.waveforms.iter().enumerate() {
        if waveform.is_empty() {
            debug!(index, "skipping empty waveform");
            continue;
        }
        let path = dir.join(format!("wave_{index:03}.wav"));
        export_wav(&path, waveform, WAVEFORM_DUMP_RATE)
            .with_context(|| format!("failed to dump waveform {index}"))?;
        written.push(path);
    }
    info!(written = written.len(), "waveform dump completed");
    Ok(written)
}
