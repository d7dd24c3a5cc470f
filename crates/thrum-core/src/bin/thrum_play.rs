//! thrum-play: minimal command-line player exercising the engine
//!
//! Streams a music track, optionally layers a looping ambience bed, and
//! fires a sound effect on demand. Mostly useful for hearing the engine on
//! real hardware and watching the spectrum tap.
//!
//! ```text
//! thrum-play <music> [--ambience <file>] [--sfx <file>]
//! ```
//!
//! Interactive commands on stdin: `s` plays the effect, `p` toggles music
//! pause, `v` prints spectrum bars, `q` quits.

use std::io::BufRead;

use anyhow::{bail, Context};

use thrum_core::{AudioEngine, EngineConfig};

const SPECTRUM_BARS: usize = 32;

fn main() -> anyhow::Result<()> {
    // Initialize logger - set RUST_LOG=debug for verbose output
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let mut args = std::env::args().skip(1);
    let mut music = None;
    let mut ambience = None;
    let mut sfx = None;
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--ambience" => ambience = args.next(),
            "--sfx" => sfx = args.next(),
            "--help" | "-h" => {
                println!("usage: thrum-play <music> [--ambience <file>] [--sfx <file>]");
                return Ok(());
            }
            _ if music.is_none() => music = Some(arg),
            other => bail!("unexpected argument: {}", other),
        }
    }
    let Some(music) = music else {
        bail!("usage: thrum-play <music> [--ambience <file>] [--sfx <file>]");
    };

    let engine = AudioEngine::init(&EngineConfig::default()).context("audio engine startup")?;
    let spec = engine.output_spec();
    log::info!("playing at {} Hz", spec.sample_rate);

    engine
        .play_music(&music, true)
        .with_context(|| format!("playing {}", music))?;
    if let Some(ambience) = &ambience {
        engine
            .play_ambience(ambience, true)
            .with_context(|| format!("looping {}", ambience))?;
    }

    println!("commands: s = sfx, p = toggle pause, v = spectrum, q = quit");
    let mut paused = false;
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line?;
        if engine.pop_music_ended() {
            println!("track ended");
        }
        match line.trim() {
            "q" => break,
            "p" => {
                paused = !paused;
                engine.set_music_paused(paused);
                println!("music {}", if paused { "paused" } else { "resumed" });
            }
            "s" => match &sfx {
                Some(path) => {
                    if let Err(e) = engine.play_sfx(path) {
                        eprintln!("sfx failed: {}", e);
                    }
                }
                None => println!("no --sfx configured"),
            },
            "v" => {
                let mut bars = [0.0f32; SPECTRUM_BARS];
                if engine.get_spectrum(&mut bars) {
                    let line: String = bars
                        .iter()
                        .map(|&b| {
                            const GLYPHS: [char; 5] = [' ', '.', ':', '|', '#'];
                            GLYPHS[((b * 4.0).round() as usize).min(4)]
                        })
                        .collect();
                    println!("[{}]", line);
                } else {
                    println!("spectrum not ready yet");
                }
            }
            "" => {}
            other => println!("unknown command: {}", other),
        }
    }

    engine.shutdown();
    Ok(())
}
