use anyhow::{bail, Context, Result};
use clap::Parser;
use emu_core::logging::{LogCategory, LogConfig, LogLevel};
use emu_nes::{AudioRingSink, Emulator, EmulatorConfig, FrameBufferSink, NesSystem};
use std::fs;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

/// Headless NES runner: loads a ROM, runs it, writes a save state.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// iNES ROM image
    rom: PathBuf,

    /// Number of frames to run on the calling thread
    #[arg(long, default_value_t = 5)]
    frames: u32,

    /// Run the emulation worker for this many seconds instead of a frame count
    #[arg(long)]
    run_seconds: Option<f64>,

    /// Write the save state here when done
    #[arg(long, default_value = "state.json")]
    save: PathBuf,

    /// Indent the written save state
    #[arg(long, default_value_t = false)]
    pretty: bool,

    /// Load this save state before running
    #[arg(long)]
    load: Option<PathBuf>,

    /// JSON emulator settings
    #[arg(long)]
    config: Option<PathBuf>,

    /// Disable audio sample generation
    #[arg(long, default_value_t = false)]
    no_sound: bool,

    /// Suppress the per-frame summary
    #[arg(long, default_value_t = false)]
    quiet: bool,

    /// Level for every log category (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "warn")]
    log_level: String,

    #[arg(long)]
    log_cpu: Option<String>,
    #[arg(long)]
    log_bus: Option<String>,
    #[arg(long)]
    log_ppu: Option<String>,
    #[arg(long)]
    log_apu: Option<String>,
    #[arg(long)]
    log_interrupts: Option<String>,
    #[arg(long)]
    log_mapper: Option<String>,
    #[arg(long)]
    log_system: Option<String>,

    /// Send core log output to a file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,
}

fn parse_level(name: &str, value: &str) -> Result<LogLevel> {
    match LogLevel::from_str(value) {
        Some(level) => Ok(level),
        None => bail!("invalid level for --{}: {}", name, value),
    }
}

fn configure_logging(args: &Args) -> Result<()> {
    let config = LogConfig::global();
    config.set_global_level(parse_level("log-level", &args.log_level)?);

    let per_category = [
        ("log-cpu", LogCategory::CPU, &args.log_cpu),
        ("log-bus", LogCategory::Bus, &args.log_bus),
        ("log-ppu", LogCategory::PPU, &args.log_ppu),
        ("log-apu", LogCategory::APU, &args.log_apu),
        ("log-interrupts", LogCategory::Interrupts, &args.log_interrupts),
        ("log-mapper", LogCategory::Mapper, &args.log_mapper),
        ("log-system", LogCategory::System, &args.log_system),
    ];
    for (name, category, value) in per_category {
        if let Some(value) = value {
            config.set_level(category, parse_level(name, value)?);
        }
    }

    if let Some(path) = &args.log_file {
        config
            .set_log_file(path.clone())
            .with_context(|| format!("cannot open log file {}", path.display()))?;
    }
    Ok(())
}

fn frame_checksum(pixels: &[u32]) -> u32 {
    pixels
        .iter()
        .fold(0x811C_9DC5u32, |h, &p| (h ^ p).wrapping_mul(0x0100_0193))
}

fn run_frames(system: &mut NesSystem, frames: u32, quiet: bool) -> Result<()> {
    for n in 1..=frames {
        system.run_frame()?;
        if !quiet {
            let frame = system.frame();
            println!(
                "frame {:>4}: {}x{} checksum {:08X} cycles {}",
                n,
                frame.width,
                frame.height,
                frame_checksum(&frame.pixels),
                system.cpu().cycles
            );
        }
    }
    Ok(())
}

fn run_worker(emulator: &mut Emulator, seconds: f64, quiet: bool) -> Result<()> {
    let display = FrameBufferSink::new();
    emulator.set_display(Box::new(display.clone()))?;

    emulator.start_emulation()?;
    let deadline = Instant::now() + Duration::from_secs_f64(seconds.max(0.0));
    while Instant::now() < deadline && emulator.is_running() {
        thread::sleep(Duration::from_millis(10));
    }
    let crashed_early = !emulator.is_running();
    emulator.stop_emulation()?;

    let (frames, _) = display.frame_count();
    if !quiet {
        println!("ran {} frames in {:.2}s", frames, seconds);
    }
    if crashed_early {
        log::warn!("emulation stopped before the deadline");
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    configure_logging(&args)?;

    let mut config = match &args.config {
        Some(path) => EmulatorConfig::load(path)
            .with_context(|| format!("cannot read config {}", path.display()))?,
        None => EmulatorConfig::default(),
    };
    if args.no_sound {
        config.sound_enabled = false;
    }

    let mut system = NesSystem::new(config.clone());
    system
        .load_rom_file(&args.rom)
        .with_context(|| format!("cannot load {}", args.rom.display()))?;
    log::info!("loaded {}", args.rom.display());

    // headless: drain audio into a ring nobody reads so the APU buffer never overflows
    system.set_audio(Box::new(AudioRingSink::new(
        config.sample_rate,
        config.audio_channels(),
        config.audio_buffer_len,
    )));

    if let Some(path) = &args.load {
        let bytes = fs::read(path).with_context(|| format!("cannot read {}", path.display()))?;
        system.load_state_bytes(&bytes)?;
        log::info!("restored state from {}", path.display());
    }

    let system = match args.run_seconds {
        Some(seconds) => {
            let mut emulator = Emulator::from_system(system);
            run_worker(&mut emulator, seconds, args.quiet)?;
            emulator.into_system()?
        }
        None => {
            run_frames(&mut system, args.frames, args.quiet)?;
            system
        }
    };

    if let Some(info) = system.crash_info() {
        log::error!(
            "CPU stopped on illegal opcode ${:02X} at ${:04X}",
            info.opcode,
            info.pc
        );
    }

    let state = system.snapshot();
    let bytes = if args.pretty {
        serde_json::to_vec_pretty(&state)?
    } else {
        state.to_bytes()?
    };
    fs::write(&args.save, bytes)
        .with_context(|| format!("cannot write {}", args.save.display()))?;
    log::info!("state written to {}", args.save.display());
    Ok(())
}
