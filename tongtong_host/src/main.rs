use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tongtong_core::{MatchState, MotionPhase, Session, SessionConfig, SessionEvent};
use tongtong_stream::PoseUpdate;

mod animation_bridge;
mod chat_backend;
mod cli;
mod scenario;
mod stream;

use animation_bridge::{AnimationRecord, RecordingAnimationCallback};
use chat_backend::EchoBackend;
use scenario::Scenario;
use stream::StreamServer;

const CHAT_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Serialize)]
struct PoseSample {
    frame: u32,
    time: f32,
    position: [f32; 3],
    rotation: [f32; 4],
    yaw: f32,
    scale: [f32; 3],
    phase: Option<&'static str>,
    state: String,
    time_id: Option<String>,
    matched: bool,
}

#[derive(Serialize)]
struct LoggedEvent {
    frame: u32,
    time: f32,
    #[serde(flatten)]
    event: SessionEvent,
}

#[derive(Serialize)]
struct EventLog<'a> {
    events: &'a [LoggedEvent],
    animations: &'a [AnimationRecord],
}

fn phase_label(phase: MotionPhase) -> &'static str {
    match phase {
        MotionPhase::AtFallback => "at_fallback",
        MotionPhase::Idle => "idle",
        MotionPhase::Following { .. } => "following",
        MotionPhase::MovingForward => "moving_forward",
        MotionPhase::MovingReverse => "moving_reverse",
    }
}

fn event_label(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Reconciled(_) => "reconciled",
        SessionEvent::Motion(_) => "motion",
        SessionEvent::RegistryTracked { .. } => "registry_tracked",
        SessionEvent::RegistryLost { .. } => "registry_lost",
        SessionEvent::TimeSlotChanged { .. } => "time_slot_changed",
        SessionEvent::Collision(_) => "collision",
        SessionEvent::ChatSent { .. } => "chat_sent",
        SessionEvent::ChatReceived(_) => "chat_received",
    }
}

fn main() -> Result<()> {
    let args = cli::parse()?;

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let config = SessionConfig::from_json_file(&args.config)
        .with_context(|| format!("loading session config {}", args.config.display()))?;
    let scenario = match args.scenario.as_deref() {
        Some(path) => Scenario::from_json_file(path)?,
        None => Scenario::default(),
    };
    let duration = args.duration.unwrap_or_else(|| scenario.duration());

    let mut session = Session::new(config).context("building session")?;
    let recorder = RecordingAnimationCallback::new();
    session.set_animation_callback(Box::new(recorder.clone()));
    let mut backend = EchoBackend::spawn(session.inbox())?;
    let stream = match args.stream_bind.as_deref() {
        Some(addr) => Some(
            StreamServer::bind(addr, Some(env!("CARGO_PKG_VERSION").to_string()))
                .with_context(|| format!("starting pose stream on {addr}"))?,
        ),
        None => None,
    };

    let mut poses = Vec::new();
    let mut events = Vec::new();
    let mut pending_actions = scenario.actions.iter().peekable();
    let mut frame = 0u32;
    let mut time = 0.0f32;

    session.start();
    collect_events(&mut session, frame, time, stream.as_ref(), &mut events);

    while time < duration {
        recorder.set_time(time);
        while let Some(action) = pending_actions.next_if(|action| action.at <= time) {
            scenario::apply(&action.action, &mut session, &mut backend);
        }

        session.tick(args.tick_secs);
        frame += 1;
        time = frame as f32 * args.tick_secs;

        collect_events(&mut session, frame, time, stream.as_ref(), &mut events);
        if let Some(sample) = sample_pose(&session, frame, time) {
            if let Some(server) = stream.as_ref() {
                publish_pose(server, &sample);
            }
            poses.push(sample);
        }
    }

    // answers still in flight are delivered by one more zero-length tick
    if !backend.wait_idle(CHAT_DRAIN_TIMEOUT) {
        log::warn!("chat backend still busy after {CHAT_DRAIN_TIMEOUT:?}");
    }
    for action in pending_actions {
        log::warn!("scenario action at {:.2}s was never reached", action.at);
    }
    session.tick(0.0);
    collect_events(&mut session, frame, time, stream.as_ref(), &mut events);

    if let Some(path) = args.pose_log_json.as_deref() {
        write_json(path, &poses).context("writing pose log")?;
        println!("Saved {} pose samples to {}", poses.len(), path.display());
    }
    if let Some(path) = args.event_log_json.as_deref() {
        let animations = recorder.records();
        let log = EventLog {
            events: &events,
            animations: &animations,
        };
        write_json(path, &log).context("writing event log")?;
        println!("Saved {} session events to {}", events.len(), path.display());
    }

    println!("Simulated {frame} ticks ({time:.2}s)");
    println!("Status: {}", session.status_label());
    println!("Banner: {}", session.banner());
    println!(
        "Character: {} | state: {}",
        session
            .motion_phase()
            .map(phase_label)
            .unwrap_or("not spawned"),
        if session.current_state_name().is_empty() {
            "-"
        } else {
            session.current_state_name()
        }
    );
    if !session.last_answer().is_empty() {
        println!("Last answer: {}", session.last_answer());
    }
    Ok(())
}

fn collect_events(
    session: &mut Session,
    frame: u32,
    time: f32,
    stream: Option<&StreamServer>,
    events: &mut Vec<LoggedEvent>,
) {
    for event in session.drain_events() {
        if let Some(server) = stream {
            match serde_json::to_value(&event) {
                Ok(data) => {
                    if let Err(err) = server.send_event(event_label(&event), data) {
                        log::warn!("stream event dropped: {err}");
                    }
                }
                Err(err) => log::warn!("could not serialize session event: {err}"),
            }
        }
        events.push(LoggedEvent { frame, time, event });
    }
}

fn sample_pose(session: &Session, frame: u32, time: f32) -> Option<PoseSample> {
    let pose = session.character_pose()?;
    Some(PoseSample {
        frame,
        time,
        position: pose.position,
        rotation: pose.rotation,
        yaw: pose.yaw,
        scale: pose.scale,
        phase: session.motion_phase().map(phase_label),
        state: session.current_state_name().to_string(),
        time_id: session.time_id().map(str::to_string),
        matched: session.match_state() == MatchState::Matched,
    })
}

fn publish_pose(server: &StreamServer, sample: &PoseSample) {
    let update = PoseUpdate {
        seq: 0,
        host_time_ns: 0,
        frame: sample.frame,
        position: sample.position,
        rotation: sample.rotation,
        scale: sample.scale,
        yaw: sample.yaw,
        phase: sample.phase.map(str::to_string),
        animation_state: (!sample.state.is_empty()).then(|| sample.state.clone()),
        time_id: sample.time_id.clone(),
        matched: sample.matched,
    };
    if let Err(err) = server.send_pose(update) {
        log::warn!("pose update dropped: {err}");
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value).context("serializing to JSON")?;
    fs::write(path, json).with_context(|| format!("writing {}", path.display()))
}
