//! Headless front-end and worker entry point.
//!
//! With the hidden worker flag the binary becomes the engine worker and
//! speaks the stdio protocol; otherwise it is a thin driver that launches a
//! worker, scans the given paths, optionally encodes everything that became
//! ready, and prints what the event stream reports.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use log::{LevelFilter, info};
use simplelog::{
    ColorChoice, CombinedLogger, ConfigBuilder, SharedLogger, TermLogger, TerminalMode,
    WriteLogger,
};

use proq::config::{DEFAULT_CONFIG_FILE, EngineConfig};
use proq::format::format_size;
use proq::media::{Framerate, MediaItem, MediaState};
use proq::messages::EngineEvent;
use proq::{EngineProxy, ipc, profiles};

fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some(ipc::WORKER_FLAG) {
        return run_worker(&args[1..]);
    }
    run_client(&args)
}

fn run_worker(args: &[String]) -> Result<()> {
    let config_path =
        config_path_from(args).unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = EngineConfig::load(&config_path);
    // Worker stdout carries the event stream; logs must stay on stderr.
    init_logging(&config, TerminalMode::Stderr);
    ipc::run_worker_stdio(config)
}

struct ClientOptions {
    config_path: Option<PathBuf>,
    profile: Option<String>,
    framerate: String,
    paths: Vec<String>,
}

fn run_client(args: &[String]) -> Result<()> {
    let options = parse_client_args(args)?;
    if options.paths.is_empty() {
        print_usage();
        return Ok(());
    }

    let config_path = options
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    let config = EngineConfig::load(&config_path);
    init_logging(&config, TerminalMode::Mixed);

    let sequence_framerate =
        profiles::framerate(&options.framerate).unwrap_or_else(Framerate::default);
    let poll = Duration::from_millis(config.engine_poll_interval.max(10));

    let mut proxy = EngineProxy::launch(options.config_path.clone())?;
    proxy.scan_paths(options.paths.clone(), sequence_framerate)?;

    let mut items: HashMap<String, MediaItem> = HashMap::new();
    loop {
        let Some(event) = proxy.poll_timeout(poll) else {
            continue;
        };
        match event {
            EngineEvent::MediaUpdate { id, fields } => {
                let item = items
                    .entry(id.clone())
                    .or_insert_with(|| MediaItem::empty(&id));
                item.apply(&fields);
                if let Some(state) = fields.state {
                    println!("{id}  {:<8}  {}", state_label(state), item.displayname);
                }
            }
            EngineEvent::MediaDelete { id } => {
                items.remove(&id);
            }
            EngineEvent::ScanUpdate { dirs, files } => {
                info!("scanning... {dirs} dir(s), {files} file(s)");
            }
            EngineEvent::ScanComplete | EngineEvent::ScanCancelled => break,
            other => info!("unexpected event during scan: {}", other.kind()),
        }
    }

    let ready: Vec<&MediaItem> = items
        .values()
        .filter(|item| item.state == MediaState::Ready)
        .collect();
    let total: u64 = ready.iter().map(|item| item.filesize).sum();
    println!("{} item(s) ready, {}", ready.len(), format_size(total));

    if let Some(profile) = options.profile {
        proxy.encode_items(vec![], &profile, &options.framerate)?;
        loop {
            let Some(event) = proxy.poll_timeout(poll) else {
                continue;
            };
            match event {
                EngineEvent::MediaUpdate { id, fields } => {
                    let item = items
                        .entry(id.clone())
                        .or_insert_with(|| MediaItem::empty(&id));
                    item.apply(&fields);
                    if let Some(progress) = fields.progress {
                        println!(
                            "{id}  {:>3.0}%  {}",
                            progress * 100.0,
                            item.displayname
                        );
                    }
                    if let Some(state) = fields.state {
                        println!("{id}  {:<8}  {}", state_label(state), item.displayname);
                    }
                }
                EngineEvent::EncodeComplete | EngineEvent::EncodeCancelled => break,
                _ => {}
            }
        }
        for item in items.values() {
            if item.state == MediaState::Done {
                if let Some(ref outpath) = item.outpath {
                    println!("wrote {outpath}");
                }
            }
        }
    }

    proxy.join()
}

fn state_label(state: MediaState) -> &'static str {
    match state {
        MediaState::New => "new",
        MediaState::Ready => "ready",
        MediaState::Queued => "queued",
        MediaState::Encoding => "encoding",
        MediaState::Done => "done",
        MediaState::Error => "error",
    }
}

fn parse_client_args(args: &[String]) -> Result<ClientOptions> {
    let mut options = ClientOptions {
        config_path: None,
        profile: None,
        framerate: String::new(),
        paths: Vec::new(),
    };

    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--config" => {
                let value = iter.next().context("--config requires a path")?;
                options.config_path = Some(PathBuf::from(value));
            }
            "--profile" => {
                let value = iter.next().context("--profile requires a profile key")?;
                if profiles::profile(value).is_none() {
                    bail!("unknown profile '{value}'");
                }
                options.profile = Some(value.clone());
            }
            "--fps" => {
                let value = iter.next().context("--fps requires a preset key")?;
                if profiles::framerate(value).is_none() {
                    bail!("unknown framerate preset '{value}'");
                }
                options.framerate = value.clone();
            }
            other if other.starts_with("--") => bail!("unknown option '{other}'"),
            path => options.paths.push(path.to_string()),
        }
    }

    Ok(options)
}

fn print_usage() {
    println!("usage: proq [--config FILE] [--profile KEY] [--fps KEY] PATH...");
    println!();
    println!("Scans PATH... for videos and image sequences; with --profile,");
    println!("encodes everything that becomes ready.");
    println!();
    println!("profiles:");
    for (key, profile) in profiles::profiles() {
        println!("  {key:<18} {}", profile.label);
    }
    println!("framerates:");
    for (key, preset) in profiles::framerates() {
        println!("  {key:<18} {}", preset.label);
    }
}

fn config_path_from(args: &[String]) -> Option<PathBuf> {
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        if arg == "--config" {
            return iter.next().map(PathBuf::from);
        }
    }
    None
}

fn init_logging(config: &EngineConfig, mode: TerminalMode) {
    let level = match config.log_level.to_ascii_lowercase().as_str() {
        "off" => LevelFilter::Off,
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let format = ConfigBuilder::new()
        .set_time_format_rfc3339()
        .set_thread_level(LevelFilter::Off)
        .set_target_level(LevelFilter::Off)
        .build();

    let mut loggers: Vec<Box<dyn SharedLogger>> = vec![TermLogger::new(
        level,
        format.clone(),
        mode,
        ColorChoice::Auto,
    )];

    if let Some(ref path) = config.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(file) => loggers.push(WriteLogger::new(LevelFilter::Debug, format, file)),
            Err(err) => eprintln!("warning: could not open log file {}: {err}", path.display()),
        }
    }

    if CombinedLogger::init(loggers).is_err() {
        eprintln!("warning: logger already initialized");
    }
}
