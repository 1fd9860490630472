use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use transpose_engine::{devices, CpalHost, EngineConfig, PcmClip, Player};

#[derive(Parser)]
#[command(name = "transpose", version, about = "Real-time pitch and tempo playback")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List output devices (* marks the default)
    Devices,
    /// Play a test tone through the engine
    Play(PlayArgs),
}

#[derive(Args)]
struct PlayArgs {
    /// Pitch shift in semitones, -12..=12
    #[arg(long, default_value_t = 0.0, allow_hyphen_values = true)]
    pitch: f32,
    /// Tempo ratio, 0.5..=2.0
    #[arg(long, default_value_t = 1.0)]
    tempo: f32,
    /// Output level, 0..=1
    #[arg(long, default_value_t = 0.5)]
    volume: f32,
    /// How long to play
    #[arg(long, default_value_t = 5.0)]
    seconds: f32,
    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440.0)]
    tone: f32,
    /// Skip real-time processing and use the native playback rate for tempo
    #[arg(long)]
    fallback: bool,
    /// Output device name (substring match)
    #[arg(long)]
    output: Option<String>,
    /// Output device index from `transpose devices`
    #[arg(long)]
    output_index: Option<usize>,
    #[arg(long)]
    sample_rate: Option<u32>,
    #[arg(long)]
    channels: Option<u16>,
    /// Render quantum in frames
    #[arg(long, default_value_t = 128)]
    block: usize,
    /// Initialization timeout in milliseconds
    #[arg(long, default_value_t = 2000)]
    init_timeout_ms: u64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    match cli.cmd {
        Command::Devices => devices::print_devices(),
        Command::Play(args) => play(args),
    }
}

fn play(args: PlayArgs) -> Result<()> {
    let cfg = EngineConfig {
        output_name: args.output,
        output_index: args.output_index,
        sample_rate: args.sample_rate,
        channels: args.channels,
        block_frames: args.block,
        init_timeout: Duration::from_millis(args.init_timeout_ms),
        volume: args.volume,
        realtime_processing: !args.fallback,
        ..EngineConfig::default()
    };

    let mut host = CpalHost::open(&cfg)?;
    let format = host.format();
    let (mut player, graph) = Player::with_pcm(&cfg, format);

    let url = format!("tone://{}", args.tone);
    // A little longer than requested so a slow tempo does not run out.
    let clip_seconds = args.seconds * 2.0 + 1.0;
    player
        .transport_mut()
        .insert_clip(url.clone(), PcmClip::tone(format.sample_rate, format.channels, args.tone, clip_seconds, 0.8));

    println!("output: {}", host.device_name());
    host.start(graph)?;

    let report = player.init().context("initializing engine")?;
    println!("engine: {:?} (independent pitch/tempo: {})", report.state, report.supported);
    if !player.set_pitch(args.pitch) && args.pitch != 0.0 {
        println!("pitch control unavailable; playing at original pitch");
    }
    player.set_tempo(args.tempo)?;
    if !report.supported && args.tempo != 1.0 {
        println!("tempo via native playback rate: pitch follows speed");
    }

    player.load(&url)?;
    player.play()?;

    let started = Instant::now();
    let limit = Duration::from_secs_f32(args.seconds.max(0.0));
    while started.elapsed() < limit {
        thread::sleep(Duration::from_millis(100));
        for ev in player.poll_events() {
            println!("{}", ev.to_json());
        }
    }
    log::info!("played {:.2}s of source in {:.2}s", player.current_time(), started.elapsed().as_secs_f32());

    player.destroy();
    host.stop();
    Ok(())
}
