//! Offline MUS→WAV renderer: loads a GENMIDI patch bank and a MUS score
//! (directly, or extracted from a WAD lump), drives a [`musopl_core::Player`]
//! over a software [`opl3::Opl3Chip`], and writes the result to a WAV file.

mod wad;

use clap::Parser;
use env_logger::Env;
use musopl_core::{Player, PlayerConfig};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(about = "Render a MUS score through an OPL3 patch bank to a WAV file")]
struct Args {
    /// GENMIDI patch bank file
    #[arg(long)]
    genmidi: PathBuf,

    /// MUS score file. Required unless `--wad` and `--lump` are both given.
    #[arg(long)]
    mus: Option<PathBuf>,

    /// WAD file to extract a MUS lump from, as an alternative to `--mus`
    #[arg(long, requires = "lump")]
    wad: Option<PathBuf>,

    /// Name of the lump to extract from `--wad` (e.g. D_E1M1)
    #[arg(long, requires = "wad")]
    lump: Option<String>,

    /// Output WAV file path
    #[arg(long, default_value = "out.wav")]
    out: PathBuf,

    /// Output sample rate in Hz
    #[arg(long, default_value_t = 44_100)]
    sample_rate: u32,

    /// Loop the score instead of stopping at its natural end
    #[arg(long = "loop", default_value_t = false)]
    loop_playback: bool,

    /// Duration to render, in seconds. Always applied as a hard cap, and is the only way
    /// to bound output length when `--loop` is set.
    #[arg(long, default_value_t = 180)]
    duration_secs: u64,

    /// Master volume (0..=127)
    #[arg(long, default_value_t = 100)]
    volume: u8,
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let genmidi_bytes = std::fs::read(&args.genmidi)?;

    let mus_bytes = match (&args.mus, &args.wad, &args.lump) {
        (Some(path), _, _) => std::fs::read(path)?,
        (None, Some(wad_path), Some(lump_name)) => {
            let wad_bytes = std::fs::read(wad_path)?;
            wad::extract_lump(&wad_bytes, lump_name)?
        }
        _ => return Err("either --mus or --wad with --lump must be given".into()),
    };

    let config = PlayerConfig { sample_rate: args.sample_rate, ..PlayerConfig::default() };
    let mut player = Player::new(opl3::Opl3Chip::new(), config);
    player.load_patches(&genmidi_bytes)?;
    player.load_score(&mus_bytes)?;
    player.set_master_volume(args.volume);
    player.start(args.loop_playback)?;

    let source_label = args
        .mus
        .as_ref()
        .map(|p| p.display().to_string())
        .or_else(|| args.lump.clone())
        .unwrap_or_default();
    log::info!(
        "rendering {source_label} ({} ms, {}Hz) to {:?}",
        player.length_ms(),
        args.sample_rate,
        args.out
    );

    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: args.sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&args.out, spec)?;

    let max_frames = args.duration_secs.saturating_mul(u64::from(args.sample_rate));
    let mut frames_written = 0u64;
    let mut buf = [0i16; 2 * 4096];

    while frames_written < max_frames && player.is_playing() {
        let remaining_frames = max_frames - frames_written;
        let frames_this_call = remaining_frames.min((buf.len() / 2) as u64) as usize;
        let chunk = &mut buf[..frames_this_call * 2];
        player.generate(chunk);

        for &sample in chunk.iter() {
            writer.write_sample(sample)?;
        }
        frames_written += frames_this_call as u64;
    }

    writer.finalize()?;
    log::info!("wrote {frames_written} frames to {:?}", args.out);
    Ok(())
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
