// THEORY:
// `crossflow_runner` is the process that puts the pieces together: it layers the
// configuration (defaults, YAML file, environment, command line), starts the
// control loop, the phase-event log and the status server, and optionally feeds
// the sensed approaches from a replay file or a random demo stream. Ctrl-C or
// `--duration-secs` stops everything in order: feed, control loop, event log,
// server.

mod feed;

use anyhow::Context;
use clap::Parser;
use crossflow::config::parse_direction_list;
use crossflow::control_loop;
use crossflow::{ChannelEventSink, Clock, Config, ControlPipeline, SystemClock};
use crossflow_visualizer::{EventLog, ServerConfig, StatusBus, StatusSources, start_server};
use feed::{DemoFeed, FrameSource, ReplayFeed};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "crossflow", about = "Adaptive signal control for a four-way intersection")]
struct Args {
    /// YAML configuration file
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Camera-sensed approaches, e.g. "west" or "north,west"
    #[arg(long, value_name = "DIRS")]
    sensed: Option<String>,

    /// Replay recorded detections (JSON lines of [x, y, w, h] boxes)
    #[arg(long, value_name = "PATH", conflicts_with = "demo")]
    replay: Option<PathBuf>,

    /// Feed the sensed approaches with random blobs
    #[arg(long)]
    demo: bool,

    /// Status server address
    #[arg(long, default_value = "127.0.0.1:5000")]
    bind: String,

    /// Do not start the status server
    #[arg(long)]
    no_server: bool,

    /// Seed for synthetic traffic and the demo feed
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds instead of waiting for Ctrl-C
    #[arg(long)]
    duration_secs: Option<u64>,

    #[arg(long)]
    min_vehicle_area: Option<f64>,
    #[arg(long)]
    max_vehicle_area: Option<f64>,
    #[arg(long)]
    min_aspect_ratio: Option<f64>,
    #[arg(long)]
    max_aspect_ratio: Option<f64>,
    #[arg(long)]
    history_size: Option<usize>,

    #[arg(long)]
    min_green_time: Option<f64>,
    #[arg(long)]
    max_green_time: Option<f64>,
    #[arg(long)]
    base_green_time: Option<f64>,
    #[arg(long)]
    yellow_time: Option<f64>,
    #[arg(long)]
    all_red_time: Option<f64>,

    #[arg(long)]
    clearing_delay: Option<f64>,
    #[arg(long)]
    clearing_window: Option<f64>,
    #[arg(long)]
    clearing_floor: Option<f64>,

    #[arg(long)]
    tick_interval_ms: Option<u64>,
    #[arg(long)]
    event_queue_capacity: Option<usize>,
    #[arg(long)]
    frame_queue_capacity: Option<usize>,
}

fn set<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

/// Defaults, then the YAML file, then the environment, then the flags.
fn build_config(args: &Args) -> anyhow::Result<Config> {
    let mut config = match &args.config {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display()))?,
        None => Config::from_env().context("reading environment overrides")?,
    };

    let d = &mut config.detection;
    set(&mut d.min_area, args.min_vehicle_area);
    set(&mut d.max_area, args.max_vehicle_area);
    set(&mut d.min_aspect_ratio, args.min_aspect_ratio);
    set(&mut d.max_aspect_ratio, args.max_aspect_ratio);
    set(&mut d.history_size, args.history_size);

    let t = &mut config.timing;
    set(&mut t.min_green_time, args.min_green_time);
    set(&mut t.max_green_time, args.max_green_time);
    set(&mut t.base_green_time, args.base_green_time);
    set(&mut t.yellow_time, args.yellow_time);
    set(&mut t.all_red_time, args.all_red_time);

    let s = &mut config.simulation;
    set(&mut s.clearing_delay, args.clearing_delay);
    set(&mut s.clearing_window, args.clearing_window);
    set(&mut s.clearing_floor, args.clearing_floor);
    if let Some(seed) = args.seed {
        s.seed = Some(seed);
    }
    if let Some(raw) = &args.sensed {
        s.sensed_directions =
            parse_direction_list(raw).with_context(|| format!("invalid --sensed value {raw:?}"))?;
    }

    let c = &mut config.control;
    set(&mut c.tick_interval_ms, args.tick_interval_ms);
    set(&mut c.event_queue_capacity, args.event_queue_capacity);
    set(&mut c.frame_queue_capacity, args.frame_queue_capacity);

    config.validate()?;
    Ok(config)
}

async fn wait_for_stop(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::select! {
            _ = tokio::time::sleep(duration) => info!("Run time of {:?} reached", duration),
            _ = tokio::signal::ctrl_c() => info!("Shutdown signal received"),
        },
        None => {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Cannot listen for Ctrl-C ({}), stopping", e);
            } else {
                info!("Shutdown signal received");
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crossflow=info,crossflow_visualizer=info,crossflow_runner=info".into()),
        )
        .init();

    let args = Args::parse();
    let config = build_config(&args)?;
    info!(
        "Starting crossflow: sensed={:?}, tick={}ms, green {}..{}s",
        config.simulation.sensed_directions,
        config.control.tick_interval_ms,
        config.timing.min_green_time,
        config.timing.max_green_time
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let (sink, events_rx) = ChannelEventSink::channel(config.control.event_queue_capacity);
    let dropped_events = sink.dropped();
    let pipeline = ControlPipeline::new(config.clone(), Arc::clone(&clock), Box::new(sink))?;
    let sensed = pipeline.sensed_directions().to_vec();
    let reader = pipeline.reader();
    let handle = control_loop::spawn(pipeline);

    let events = EventLog::default();
    let drain = events.spawn_drain(events_rx);
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);

    let server = if args.no_server {
        None
    } else {
        let sources = StatusSources {
            reader,
            clock: Arc::clone(&clock),
            config: Arc::new(config.clone()),
            events: events.clone(),
            bus: StatusBus::new(16),
        };
        let cfg = ServerConfig {
            bind_addr: args.bind.clone(),
            ..ServerConfig::default()
        };
        Some(start_server(sources, cfg, shutdown_rx.clone()).await?)
    };

    let source: Option<Box<dyn FrameSource>> = match (&args.replay, args.demo) {
        (Some(path), _) => Some(Box::new(ReplayFeed::load(path)?)),
        (None, true) => Some(Box::new(DemoFeed::new(args.seed))),
        (None, false) => {
            info!("No feed given; sensed approaches will read zero vehicles");
            None
        }
    };
    let feed = source.map(|source| {
        feed::spawn_feed(
            source,
            sensed.clone(),
            handle.frames(),
            config.control.tick_interval(),
            shutdown_rx.clone(),
        )
    });

    wait_for_stop(args.duration_secs.map(Duration::from_secs)).await;
    let _ = shutdown_tx.send(true);

    if let Some(feed) = feed {
        let _ = feed.await;
    }
    let last = handle.reader().snapshot().report(clock.now(), clock.wall_time());
    let summary = handle.shutdown().await?;
    let logged = drain.await.context("event log task failed")?;
    if let Some(server) = server {
        // open WebSocket clients can hold a graceful shutdown open
        if tokio::time::timeout(Duration::from_secs(2), server).await.is_err() {
            warn!("Status server did not stop within 2s");
        }
    }

    info!(
        "Stopped after {} ticks: {} phase changes ({} logged, {} dropped), {} frames, {} vehicles counted",
        summary.ticks,
        summary.phase_changes,
        logged,
        dropped_events.get(),
        summary.frames_received,
        last.total_vehicles
    );
    info!("Final status: {}", serde_json::to_string(&last)?);
    Ok(())
}
