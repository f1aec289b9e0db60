use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::Context;
use clap::{Parser, Subcommand};
use gaxplay_core::{
    AddressMode, AppConfig, Module,
    diagnostics::init_tracing,
    export::{export_song, export_waveforms},
    fixtures::demo_module,
    generate_parity_report,
    parity::write_parity_report,
    persistence::{find_module_files, load_cartridge, load_module, save_module, save_object},
    scan_song_properties,
    sequencer::estimate_work_ram,
    timing::note_name,
};

#[derive(Debug, Parser)]
#[command(name = "gaxplay-cli")]
#[command(about = "Inspect, repack and render GAX sound engine modules")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Overrides the logs directory from the config file.
    #[arg(long)]
    log_dir: Option<PathBuf>,

    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Summarize the songs, instruments and waveforms of a module.
    Info {
        input: PathBuf,

        /// Treat the input as a cartridge image and scan it for songs.
        #[arg(long)]
        cartridge: bool,
    },
    /// Render one song to an 8-bit mono WAV file.
    Render {
        input: PathBuf,

        #[arg(long)]
        output: Option<PathBuf>,

        #[arg(long, default_value_t = 0)]
        song: usize,

        #[arg(long)]
        loops: Option<u32>,

        #[arg(long)]
        seconds: Option<f64>,

        #[arg(long)]
        cartridge: bool,
    },
    /// Decode a module and write it back as a packaged blob.
    Repack {
        input: PathBuf,
        output: PathBuf,

        #[arg(long)]
        cartridge: bool,

        /// Write a headerless object for linking instead of a `GAX!` blob.
        #[arg(long)]
        object: bool,

        /// Load address the object's pointers are linked against.
        #[arg(long, default_value_t = 0, value_parser = parse_address)]
        basis: u32,
    },
    /// Write every waveform of a module as an 8-bit mono WAV file.
    DumpWaves {
        input: PathBuf,

        #[arg(long)]
        output_dir: Option<PathBuf>,

        #[arg(long)]
        cartridge: bool,
    },
    /// List song-properties candidates in a cartridge image.
    Locate { input: PathBuf },
    /// List every module below a directory.
    Scan { directory: PathBuf },
    DemoExport {
        #[arg(long)]
        output_dir: Option<PathBuf>,
    },
    ParityReport {
        /// Module to report on; the demo module when omitted.
        #[arg(long)]
        input: Option<PathBuf>,

        #[arg(long, default_value = "data/parity/report.json")]
        output: PathBuf,
    },
}

fn parse_address(value: &str) -> Result<u32, String> {
    let parsed = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse(),
    };
    parsed.map_err(|error| format!("invalid address '{value}': {error}"))
}

fn read_input(path: &Path, cartridge: bool) -> anyhow::Result<Module> {
    if cartridge {
        load_cartridge(path)
    } else {
        load_module(path, &AddressMode::Packaged)
    }
}

fn print_summary(module: &Module) {
    println!("author: {}", module.author);
    println!(
        "instruments: {}  waveforms: {}  steps: {}",
        module.instruments.len(),
        module.waveforms.len(),
        module.step_count()
    );
    for (index, song) in module.songs.iter().enumerate() {
        let properties = song.data.properties;
        if song.data.is_fx_object() {
            println!(
                "song {index}: fx object, {} fx channels at {} Hz",
                properties.fx_channel_count, properties.mixing_rate
            );
            continue;
        }
        println!(
            "song {index}: \"{}\" {} channels, {} positions x {} steps, {} Hz, work ram {} bytes",
            song.name,
            properties.channel_count,
            properties.pattern_count,
            properties.step_count,
            properties.mixing_rate,
            estimate_work_ram(
                u32::from(properties.mixing_rate),
                u32::from(properties.channel_count),
                u32::from(properties.fx_channel_count),
            )
        );
        let first_note = song
            .data
            .patterns
            .iter()
            .flat_map(|pattern| pattern.steps.iter())
            .find_map(|step| step.note.and_then(|note| note.semitone()));
        if let Some(semitone) = first_note {
            println!("  first note: {}", note_name(semitone));
        }
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::from_path(path)?,
        None => AppConfig::load_or_default()?,
    };
    let log_dir = cli
        .log_dir
        .clone()
        .unwrap_or_else(|| config.paths.logs_dir.clone());
    let _telemetry = init_tracing(&log_dir, &config.diagnostics)?;

    let options = config.render.playback_options();
    let mut limits = config.render.limits();

    match cli.command {
        Commands::Info { input, cartridge } => {
            let module = read_input(&input, cartridge)?;
            print_summary(&module);
        }
        Commands::Render {
            input,
            output,
            song,
            loops,
            seconds,
            cartridge,
        } => {
            let module = read_input(&input, cartridge)?;
            if let Some(loops) = loops {
                limits.max_loops = loops;
            }
            if let Some(seconds) = seconds {
                limits.max_seconds = seconds;
            }
            let output = output.unwrap_or_else(|| {
                let stem = input
                    .file_stem()
                    .map_or_else(|| "song".into(), |stem| stem.to_string_lossy());
                config.paths.export_dir.join(format!("{stem}-{song}.wav"))
            });
            let rendered = export_song(&module, song, &options, &limits, &output)?;
            tracing::info!(
                path = %output.display(),
                seconds = rendered.duration_seconds(options.frame_rate),
                loops = rendered.loops,
                "song rendered"
            );
        }
        Commands::Repack {
            input,
            output,
            cartridge,
            object,
            basis,
        } => {
            let module = read_input(&input, cartridge)?;
            if object {
                for offset in save_object(&output, &module, basis)? {
                    println!("{offset:#010x}");
                }
            } else {
                save_module(&output, &module)?;
            }
        }
        Commands::DumpWaves {
            input,
            output_dir,
            cartridge,
        } => {
            let module = read_input(&input, cartridge)?;
            let output_dir = output_dir.unwrap_or_else(|| {
                let stem = input
                    .file_stem()
                    .map_or_else(|| "module".into(), |stem| stem.to_string_lossy());
                config.paths.export_dir.join(format!("{stem}-waveforms"))
            });
            for path in export_waveforms(&module, &output_dir)? {
                println!("{}", path.display());
            }
        }
        Commands::Locate { input } => {
            let bytes = fs::read(&input)
                .with_context(|| format!("failed to read cartridge: {}", input.display()))?;
            for offset in scan_song_properties(&bytes) {
                println!("{offset:#010x}");
            }
        }
        Commands::Scan { directory } => {
            for path in find_module_files(&directory)? {
                println!("{}", path.display());
            }
        }
        Commands::DemoExport { output_dir } => {
            let output_dir = output_dir.unwrap_or_else(|| config.paths.export_dir.clone());
            let module = demo_module();
            save_module(&output_dir.join("demo.gax"), &module)?;
            export_song(&module, 0, &options, &limits, &output_dir.join("demo.wav"))?;
        }
        Commands::ParityReport { input, output } => {
            let module = match input {
                Some(path) => load_module(&path, &AddressMode::Packaged)?,
                None => demo_module(),
            };
            let report = generate_parity_report(&module)?;
            write_parity_report(&output, &report)?;
            tracing::info!(path = %output.display(), "parity report generated");
        }
    }

    Ok(())
}
