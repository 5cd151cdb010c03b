use anyhow::{Context, bail};
use dopplermeter::audio::capture;
use dopplermeter::controller::{Controller, ControllerEvent};
use dopplermeter::settings::{self, Settings};
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: dopplermeter <pcm-s16le-file|-> [settings.json]";

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut args = std::env::args_os().skip(1);
    let Some(input) = args.next() else {
        bail!(USAGE);
    };
    let settings_path = args.next().map(PathBuf::from).unwrap_or_else(settings::default_path);
    if args.next().is_some() {
        bail!(USAGE);
    }

    let settings = Settings::load_or_default(&settings_path);
    info!(
        "[main] preset {:?}, {} Hz, frame {} / hop {}",
        settings.preset, settings.sample_rate, settings.frame_size, settings.samples_per_frame
    );

    let reader: Box<dyn Read + Send> = if input == "-" {
        Box::new(io::stdin())
    } else {
        let file = File::open(&input).with_context(|| format!("opening {input:?}"))?;
        Box::new(BufReader::new(file))
    };

    let config = settings
        .controller_config()
        .context("building band configuration from settings")?;
    let (frames, tap) = capture::spawn_frame_tap(reader, settings.tap_config())
        .context("spawning capture tap")?;
    let controller = Controller::spawn(config, frames).context("spawning engine worker")?;

    let unit = settings.speed_unit;
    while let Ok(event) = controller.events().recv_blocking() {
        match event {
            ControllerEvent::SpeedDetected(speed) => {
                println!("{:>8.2}s  {}", speed.at.as_secs_f64(), unit.format(speed.speed));
            }
            ControllerEvent::HighestChanged(Some(highest)) => {
                info!("[main] new highest speed {}", unit.format(highest.speed));
            }
            ControllerEvent::HighestChanged(None) | ControllerEvent::SpeedRemoved(_) => {}
            ControllerEvent::Finished { .. } => break,
        }
    }

    if tap.join().is_err() {
        warn!("[main] capture tap panicked");
    }
    let highest = controller.highest_speed();
    let detected = controller.detected_speeds().len();
    let frames = controller.join();

    match highest {
        Some(speed) => println!(
            "{detected} speed(s) over {frames} frames, highest {}",
            unit.format(speed.speed)
        ),
        None => println!("no speeds detected over {frames} frames"),
    }
    Ok(())
}
