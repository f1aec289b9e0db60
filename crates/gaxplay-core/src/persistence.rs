use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use tracing::{debug, info, instrument, warn};
use walkdir::WalkDir;

use crate::{
    codec::{self, AddressMode},
    locate::scan_song_properties,
    model::Module,
};

pub const MODULE_EXTENSION: &str = "gax";

/// Reads and decodes a module file whose pointers are relative to its first byte.
pub fn load_module(path: &Path, mode: &AddressMode) -> Result<Module> {
    load_module_with_base(path, mode, 0)
}

#[instrument(skip(mode), fields(path = %path.display(), base_offset))]
pub fn load_module_with_base(path: &Path, mode: &AddressMode, base_offset: u32) -> Result<Module> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read module: {}", path.display()))?;
    let module = codec::decode(&bytes, base_offset, mode)
        .with_context(|| format!("failed to decode module: {}", path.display()))?;
    info!(
        bytes = bytes.len(),
        songs = module.songs.len(),
        instruments = module.instruments.len(),
        waveforms = module.waveforms.len(),
        "module loaded"
    );
    Ok(module)
}

/// Decodes the music found by scanning a cartridge image for song properties.
#[instrument(fields(path = %path.display()))]
pub fn load_cartridge(path: &Path) -> Result<Module> {
    let bytes =
        fs::read(path).with_context(|| format!("failed to read cartridge: {}", path.display()))?;
    let song_offsets = scan_song_properties(&bytes);
    if song_offsets.is_empty() {
        return Err(anyhow::anyhow!(
            "no song properties found in cartridge: {}",
            path.display()
        ));
    }

    let mode = AddressMode::Cartridge { song_offsets };
    let module = codec::decode(&bytes, 0, &mode)
        .with_context(|| format!("failed to decode cartridge music: {}", path.display()))?;
    info!(songs = module.songs.len(), "cartridge music loaded");
    Ok(module)
}

/// Encodes `module` as a packaged blob and replaces `path` atomically.
#[instrument(skip(module), fields(path = %path.display(), songs = module.songs.len()))]
pub fn save_module(path: &Path, module: &Module) -> Result<()> {
    let bytes = codec::encode(module, 0).context("failed to encode module")?;
    write_atomically(path, &bytes)?;
    info!(bytes = bytes.len(), "module saved");
    Ok(())
}

/// Writes `module` as a headerless object linked at `basis` and returns the
/// offsets of its song-properties records.
#[instrument(skip(module), fields(path = %path.display(), songs = module.songs.len(), basis))]
pub fn save_object(path: &Path, module: &Module, basis: u32) -> Result<Vec<usize>> {
    let object = codec::encode_object(module, basis).context("failed to compile module object")?;
    write_atomically(path, &object.bytes)?;
    info!(bytes = object.bytes.len(), "module object saved");
    Ok(object.song_offsets)
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create directory: {}", parent.display()))?;
    }

    let mut temp_file = tempfile::NamedTempFile::new_in(
        path.parent()
            .map_or_else(|| Path::new(".").to_path_buf(), Path::to_path_buf),
    )
    .context("failed to create temp module file")?;

    temp_file
        .write_all(bytes)
        .context("failed to write temp module file")?;
    temp_file
        .persist(path)
        .map_err(|error| anyhow::anyhow!(error.error))
        .with_context(|| format!("failed to persist module: {}", path.display()))?;
    Ok(())
}

/// Every `.gax` file below `directory`, sorted by path.
#[instrument(fields(directory = %directory.display()))]
pub fn find_module_files(directory: &Path) -> Result<Vec<PathBuf>> {
    if !directory.is_dir() {
        return Err(anyhow::anyhow!(
            "module path is not a directory: {}",
            directory.display()
        ));
    }

    let mut modules = Vec::new();
    for entry in WalkDir::new(directory).follow_links(true) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(error) => {
                warn!(?error, "ignoring unreadable entry while scanning modules");
                continue;
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let is_module = entry
            .path()
            .extension()
            .and_then(|value| value.to_str())
            .is_some_and(|value| value.eq_ignore_ascii_case(MODULE_EXTENSION));
        if is_module {
            modules.push(entry.into_path());
        }
    }

    modules.sort();
    debug!(count = modules.len(), "module scan complete");
    Ok(modules)
}
