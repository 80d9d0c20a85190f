use anyhow::{Context, Result};
use clap::Parser;
use log::{debug, info, warn};

use playctl::cli::Args;
use playctl::config;
use playctl::core::event_bus::Event;
use playctl::core::runtime;
use playctl::engine::{SurfaceHandle, TrackDescriptor};
use playctl::sim::{SimLibrary, SimMedia, SimTransport};
use playctl::{
    downcast_event, BoxedEvent, EndReached, LengthChanged, Muted, Paused, Playing, Session,
    StreamType, TimeChanged, Unmuted, VideoInfoChanged, VolumeChanged,
};

/// Bytes served by the scripted transport for `--stream`
const SIM_STREAM_BYTES: usize = 4096;

fn init_logging(args: &Args, path_config: &config::PathConfig) -> Result<()> {
    // 0 (default) = warn, 1 (-v) = info, 2 (-vv) = debug, 3+ (-vvv) = trace
    let log_level = match args.verbosity {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    if let Some(log_path_opt) = &args.log_file {
        let log_path = log_path_opt
            .as_ref()
            .cloned()
            .unwrap_or_else(|| config::data_file(config::LOG_FILE, path_config));

        let file = std::fs::File::create(&log_path)
            .with_context(|| format!("Failed to create log file: {}", log_path.display()))?;

        env_logger::Builder::new()
            .filter_level(log_level)
            .format_timestamp_millis()
            .target(env_logger::Target::Pipe(Box::new(file)))
            .init();

        info!("Logging to file: {} (level: {:?})", log_path.display(), log_level);
    } else {
        // Console logging (respects RUST_LOG if set)
        let default_level = match args.verbosity {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };

        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
            .format_timestamp_millis()
            .init();
    }
    Ok(())
}

fn describe(event: &BoxedEvent) -> String {
    if let Some(e) = downcast_event::<TimeChanged>(event) {
        format!("TimeChanged {} ms", e.0)
    } else if let Some(e) = downcast_event::<LengthChanged>(event) {
        format!("LengthChanged {} ms", e.0)
    } else if let Some(e) = downcast_event::<VideoInfoChanged>(event) {
        format!("VideoInfoChanged {} {:.4}", e.orientation, e.aspect_ratio)
    } else if let Some(e) = downcast_event::<VolumeChanged>(event) {
        format!("VolumeChanged {:.2}", e.0)
    } else if downcast_event::<Playing>(event).is_some() {
        "Playing".to_string()
    } else if downcast_event::<Paused>(event).is_some() {
        "Paused".to_string()
    } else if downcast_event::<EndReached>(event).is_some() {
        "EndReached".to_string()
    } else if downcast_event::<Muted>(event).is_some() {
        "Muted".to_string()
    } else if downcast_event::<Unmuted>(event).is_some() {
        "Unmuted".to_string()
    } else {
        (**event).type_name().to_string()
    }
}

fn print_tracks(kind: &str, tracks: &[TrackDescriptor]) {
    println!("{} tracks:", kind);
    for track in tracks {
        println!("  {:>3}  {}", track.id, track.name);
    }
}

fn run(args: &Args, session_config: &config::SessionConfig, locator: &str) -> Result<()> {
    let profile = SimMedia::video(1280, 720)
        .with_length(args.length_ms)
        .with_fps(args.fps)
        .with_audio_tracks(vec![
            TrackDescriptor { id: 1, name: "Track 1".into() },
            TrackDescriptor { id: 2, name: "Track 2".into() },
        ]);
    let library = SimLibrary::new(profile);

    let (stream_type, transport) = if args.stream.is_some() {
        let transport = SimTransport::new().with_file(locator, vec![0u8; SIM_STREAM_BYTES]);
        (StreamType::LocalFileStream, transport)
    } else {
        (StreamType::File, SimTransport::new())
    };

    let mut session = Session::new(
        library.clone(),
        SurfaceHandle(0),
        Box::new(transport),
        session_config.session_options(),
    )
    .context("Failed to create session")?;

    if args.stream.is_some() {
        session.connect_local_stream(&args.pipe)?;
    }

    let (start, stop) = args.play_range();
    session
        .load_media(stream_type, locator, start, stop)
        .with_context(|| format!("Failed to load {}", locator))?;

    for &position in &args.seeks {
        session.seek(position)?;
    }
    for _ in 0..args.step_forward {
        session.step_forward()?;
    }
    for _ in 0..args.step_back {
        session.step_back()?;
    }
    if let Some(rate) = args.speed {
        session.set_playback_speed(rate)?;
    }
    if let Some(level) = args.volume {
        session.set_volume(level)?;
    }
    if args.mute {
        session.set_mute(true);
    }
    if args.tracks {
        print_tracks("Audio", &session.audio_tracks());
        print_tracks("Video", &session.video_tracks());
    }
    if let Some(path) = &args.snapshot {
        let ok = session.capture_snapshot(0, 0, 0, path);
        println!("Snapshot {}: {}", path.display(), if ok { "written" } else { "failed" });
    }

    // Let the engine deliver everything raised so far
    if let Some(engine) = library.engine() {
        engine.flush();
    }

    for event in session.events().poll() {
        println!("{}", describe(&event));
    }
    println!(
        "Final: {:.0} ms of {} ms, range {:.3}..{:.3}",
        session.state().current_time_ms(),
        session.state().length_ms(),
        session.range().start(),
        session.range().stop()
    );

    if args.stream.is_some() {
        session.disconnect_local_stream()?;
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    let path_config = config::PathConfig::from_env_and_cli(args.config_dir.clone());
    if let Err(e) = config::ensure_dirs(&path_config) {
        eprintln!("Warning: Failed to create application directories: {}", e);
    }

    init_logging(&args, &path_config)?;
    info!("playctl {} starting...", env!("CARGO_PKG_VERSION"));
    debug!("Command-line args: {:?}", args);
    info!(
        "Config path: {}",
        config::config_file(config::CONFIG_FILE, &path_config).display()
    );

    let session_config = config::load_config(&path_config)?;
    runtime::init(session_config.runtime_options());

    let Some(locator) = args.locator() else {
        use clap::CommandFactory;
        warn!("No media given");
        let mut cmd = Args::command();
        let _ = cmd.print_help();
        println!();
        return Ok(());
    };

    run(&args, &session_config, &locator)
}
