// THEORY:
// `crossflow_visualizer` is the read side of the system. It never writes to the
// engine; it only holds a `StateReader` and the receiving end of the phase-event
// queue, and turns them into something a dashboard can poll or subscribe to.
//
// Three pieces:
//   - `StatusBus`: a broadcast channel of `StatusReport`s fed by a publisher task
//     that snapshots the state store on a fixed interval. Slow subscribers lag
//     and skip reports, they never hold up the publisher.
//   - `EventLog`: a ring of the most recent phase-change events, filled by a
//     task that drains the engine's event queue and logs every change.
//   - `start_server` (feature `web`): the HTTP/WebSocket surface on top of both.

use crossflow::{Clock, Config, IntersectionState, PhaseChangeEvent, StateReader, StatusReport};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Number of phase changes `/api/events` can return.
pub const EVENT_LOG_CAPACITY: usize = 100;

/// A sensed approach counts as live if a frame arrived within this window.
pub const CAMERA_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    Active,
    Inactive,
}

/// Whether the sensed approaches are delivering frames right now.
pub fn camera_status(state: &IntersectionState, now: std::time::Instant, timeout: Duration) -> CameraStatus {
    match state.last_frame() {
        Some(frame) if now.saturating_duration_since(frame.received_at) <= timeout => CameraStatus::Active,
        _ => CameraStatus::Inactive,
    }
}

#[derive(Clone)]
pub struct StatusBus {
    pub reports_tx: broadcast::Sender<StatusReport>,
}

impl StatusBus {
    pub fn new(capacity: usize) -> Self {
        let (reports_tx, _) = broadcast::channel::<StatusReport>(capacity.max(1));
        Self { reports_tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusReport> {
        self.reports_tx.subscribe()
    }

    /// Publishes one report. Returns how many subscribers received it.
    pub fn publish(&self, report: StatusReport) -> usize {
        self.reports_tx.send(report).unwrap_or(0)
    }

    /// Snapshots `reader` every `interval` and broadcasts the report until the
    /// task is aborted.
    pub fn spawn_publisher(
        &self,
        reader: StateReader,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> JoinHandle<()> {
        let bus = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                let report = reader.snapshot().report(clock.now(), clock.wall_time());
                let receivers = bus.publish(report);
                debug!("status published to {} subscribers", receivers);
            }
        })
    }
}

/// Bounded history of phase changes, oldest first.
#[derive(Clone)]
pub struct EventLog {
    events: Arc<Mutex<VecDeque<PhaseChangeEvent>>>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, event: PhaseChangeEvent) {
        let mut events = self.events.lock();
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    pub fn recent(&self) -> Vec<PhaseChangeEvent> {
        self.events.lock().iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Drains the engine's event queue into the log until every sender is gone.
    /// The task returns the number of events it saw.
    pub fn spawn_drain(&self, mut rx: mpsc::Receiver<PhaseChangeEvent>) -> JoinHandle<u64> {
        let log = self.clone();
        tokio::spawn(async move {
            let mut seen = 0u64;
            while let Some(event) = rx.recv().await {
                info!(
                    from = %event.from_phase,
                    to = %event.to_phase,
                    trigger = ?event.trigger,
                    duration_secs = event.phase_duration,
                    "Signal change #{}: {}",
                    event.signal_changes,
                    event.reason
                );
                log.push(event);
                seen += 1;
            }
            seen
        })
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// How often `/ws/status` subscribers get a new report.
    pub publish_interval: Duration,
    pub camera_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5000".to_string(),
            publish_interval: Duration::from_millis(500),
            camera_timeout: CAMERA_TIMEOUT,
        }
    }
}

/// Everything the routes read from.
#[derive(Clone)]
pub struct StatusSources {
    pub reader: StateReader,
    pub clock: Arc<dyn Clock>,
    pub config: Arc<Config>,
    pub events: EventLog,
    pub bus: StatusBus,
}

#[cfg(feature = "web")]
mod web {
    use super::*;
    use axum::extract::State;
    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::response::IntoResponse;
    use axum::{Json, Router, routing::get};
    use tracing::warn;

    #[derive(Clone)]
    pub(crate) struct AppState {
        pub(crate) sources: StatusSources,
        pub(crate) camera_timeout: Duration,
    }

    pub(crate) fn router(state: AppState) -> Router {
        Router::new()
            .route("/healthz", get(|| async { "ok" }))
            .route("/api/health", get(health))
            .route("/api/live-data", get(live_data))
            .route("/api/config", get(config))
            .route("/api/events", get(events))
            .route("/ws/status", get(ws_status_handler))
            .with_state(state)
    }

    pub(crate) async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
        let snapshot = state.sources.reader.snapshot();
        let now = state.sources.clock.now();
        Json(serde_json::json!({
            "status": "healthy",
            "camera_status": camera_status(&snapshot, now, state.camera_timeout),
            "current_phase": snapshot.phase(),
            "ticks": snapshot.tick_count(),
            "subscribers": state.sources.bus.reports_tx.receiver_count(),
            "timestamp": state.sources.clock.wall_time(),
        }))
    }

    pub(crate) async fn live_data(State(state): State<AppState>) -> Json<StatusReport> {
        let clock = &state.sources.clock;
        Json(state.sources.reader.snapshot().report(clock.now(), clock.wall_time()))
    }

    pub(crate) async fn config(State(state): State<AppState>) -> Json<serde_json::Value> {
        let config = &state.sources.config;
        Json(serde_json::json!({
            "timing": config.timing,
            "detection": config.detection,
            "sensed_directions": config.simulation.sensed_directions,
        }))
    }

    pub(crate) async fn events(State(state): State<AppState>) -> Json<Vec<PhaseChangeEvent>> {
        Json(state.sources.events.recent())
    }

    async fn ws_status_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
        ws.on_upgrade(|socket| ws_status_client(socket, state))
    }

    async fn ws_status_client(socket: WebSocket, state: AppState) {
        use futures_util::{SinkExt, StreamExt};

        let mut rx = state.sources.bus.subscribe();
        let (mut ws_tx, mut ws_rx) = socket.split();
        info!("WebSocket client connected (status)");

        loop {
            tokio::select! {
                msg = rx.recv() => {
                    match msg {
                        Ok(report) => {
                            let Ok(json) = serde_json::to_string(&report) else { continue };
                            if ws_tx.send(Message::Text(json)).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!("status subscriber lagged, skipped {} reports", skipped);
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    }
                }
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                        _ => {}
                    }
                }
            }
        }

        info!("WebSocket client disconnected (status)");
    }
}

/// Binds `cfg.bind_addr`, starts the status publisher and serves until
/// `shutdown` flips to true.
#[cfg(feature = "web")]
pub async fn start_server(
    sources: StatusSources,
    cfg: ServerConfig,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    use anyhow::Context;

    let publisher = sources.bus.spawn_publisher(
        sources.reader.clone(),
        Arc::clone(&sources.clock),
        cfg.publish_interval,
    );
    let app = web::router(web::AppState {
        sources,
        camera_timeout: cfg.camera_timeout,
    });

    let listener = tokio::net::TcpListener::bind(&cfg.bind_addr)
        .await
        .with_context(|| format!("cannot bind status server to {}", cfg.bind_addr))?;
    info!("Status server listening on http://{}", cfg.bind_addr);

    let server = tokio::spawn(async move {
        let stop = async move {
            while shutdown.changed().await.is_ok() {
                if *shutdown.borrow() {
                    break;
                }
            }
        };
        if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(stop).await {
            tracing::error!("Status server failed: {}", e);
        }
        publisher.abort();
        info!("Status server stopped");
    });

    Ok(server)
}

#[cfg(not(feature = "web"))]
pub async fn start_server(
    _sources: StatusSources,
    _cfg: ServerConfig,
    _shutdown: tokio::sync::watch::Receiver<bool>,
) -> anyhow::Result<JoinHandle<()>> {
    Err(anyhow::anyhow!("web feature not enabled for crossflow_visualizer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossflow::core_modules::clock::ManualClock;
    use crossflow::events::TransitionTrigger;
    use crossflow::pipeline::SensorFrame;
    use crossflow::{ControlPipeline, Direction, NullSink, PerDirection, Phase};

    fn event(n: u64) -> PhaseChangeEvent {
        PhaseChangeEvent {
            timestamp: ManualClock::new().wall_time(),
            from_phase: Phase::EastWestGreen,
            to_phase: Phase::NorthSouthGreen,
            counts: PerDirection::default(),
            served_vehicles: 0,
            waiting_vehicles: 1,
            phase_duration: 6.0,
            trigger: TransitionTrigger::EarlyRelease,
            reason: "EW: 0 vehicles, NS: 1 waiting".to_string(),
            signal_changes: n,
        }
    }

    fn sources(clock: Arc<ManualClock>) -> (ControlPipeline, StatusSources) {
        let config = Config::default();
        let pipeline = ControlPipeline::new(config.clone(), clock.clone(), Box::new(NullSink)).unwrap();
        let sources = StatusSources {
            reader: pipeline.reader(),
            clock,
            config: Arc::new(config),
            events: EventLog::default(),
            bus: StatusBus::new(4),
        };
        (pipeline, sources)
    }

    #[test]
    fn event_log_keeps_the_newest_events() {
        let log = EventLog::new(3);
        for n in 1..=5 {
            log.push(event(n));
        }
        let kept: Vec<u64> = log.recent().iter().map(|e| e.signal_changes).collect();
        assert_eq!(kept, vec![3, 4, 5]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn camera_goes_inactive_after_timeout() {
        let clock = Arc::new(ManualClock::new());
        let (mut pipeline, _) = sources(clock.clone());
        assert_eq!(
            camera_status(&pipeline.snapshot(), clock.now(), CAMERA_TIMEOUT),
            CameraStatus::Inactive
        );

        pipeline.tick(&[SensorFrame::new(Direction::West, Vec::new())]);
        clock.advance(Duration::from_millis(1500));
        assert_eq!(
            camera_status(&pipeline.snapshot(), clock.now(), CAMERA_TIMEOUT),
            CameraStatus::Active
        );
        clock.advance(Duration::from_millis(600));
        assert_eq!(
            camera_status(&pipeline.snapshot(), clock.now(), CAMERA_TIMEOUT),
            CameraStatus::Inactive
        );
    }

    #[tokio::test]
    async fn drain_task_fills_the_log() {
        let (tx, rx) = mpsc::channel(8);
        let log = EventLog::default();
        let task = log.spawn_drain(rx);
        for n in 1..=3 {
            tx.send(event(n)).await.unwrap();
        }
        drop(tx);
        assert_eq!(task.await.unwrap(), 3);
        assert_eq!(log.len(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn publisher_broadcasts_reports() {
        let clock = Arc::new(ManualClock::new());
        let (mut pipeline, sources) = sources(clock.clone());
        let mut rx = sources.bus.subscribe();
        let publisher = sources
            .bus
            .spawn_publisher(sources.reader.clone(), sources.clock.clone(), Duration::from_millis(100));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.tick_count, 0);

        pipeline.tick(&[]);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.tick_count, 1);
        assert_eq!(second.current_phase, Phase::EastWestGreen);
        publisher.abort();
    }

    #[cfg(feature = "web")]
    #[tokio::test]
    async fn routes_serve_snapshots_and_events() {
        use axum::extract::State;

        let clock = Arc::new(ManualClock::new());
        let (mut pipeline, sources) = sources(clock.clone());
        pipeline.tick(&[SensorFrame::new(Direction::West, Vec::new())]);
        sources.events.push(event(1));
        let state = web::AppState {
            sources,
            camera_timeout: CAMERA_TIMEOUT,
        };

        let health = web::health(State(state.clone())).await.0;
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["camera_status"], "active");
        assert_eq!(health["current_phase"], "East_West_Green");

        let live = web::live_data(State(state.clone())).await.0;
        assert_eq!(live.tick_count, 1);

        let config = web::config(State(state.clone())).await.0;
        assert_eq!(config["timing"]["min_green_time"], 6.0);
        assert_eq!(config["sensed_directions"][0], "West");

        let events = web::events(State(state)).await.0;
        assert_eq!(events.len(), 1);
    }
}
