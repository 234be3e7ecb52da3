use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{Context, Result};
use serde::Deserialize;
use serde_json::Value;
use tempfile::tempdir;

#[derive(Debug, Deserialize, Clone)]
struct PoseSample {
    frame: u32,
    time: f32,
    position: [f32; 3],
    scale: [f32; 3],
    phase: Option<String>,
    matched: bool,
}

#[derive(Debug, Deserialize)]
struct EventLog {
    events: Vec<Value>,
    animations: Vec<Value>,
}

struct RunOutput {
    poses: Vec<PoseSample>,
    log: EventLog,
}

fn run_scenario(scenario: &str) -> Result<RunOutput> {
    let manifest_dir = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    let fixtures = manifest_dir.join("tests/fixtures");
    let temp_dir = tempdir().context("creating temporary directory for logs")?;
    let pose_path = temp_dir.path().join("poses.json");
    let event_path = temp_dir.path().join("events.json");

    let status = Command::new(env!("CARGO_BIN_EXE_tongtong_host"))
        .arg("--config")
        .arg(fixtures.join("session_config.json"))
        .arg("--scenario")
        .arg(fixtures.join(scenario))
        .arg("--pose-log-json")
        .arg(&pose_path)
        .arg("--event-log-json")
        .arg(&event_path)
        .status()
        .context("executing tongtong_host")?;
    assert!(status.success(), "tongtong_host exited with {status:?}");

    Ok(RunOutput {
        poses: read_json(&pose_path)?,
        log: read_json(&event_path)?,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let data = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&data).with_context(|| format!("parsing {}", path.display()))
}

fn approx(a: [f32; 3], b: [f32; 3], tolerance: f32) -> bool {
    a.iter().zip(b.iter()).all(|(x, y)| (x - y).abs() <= tolerance)
}

fn events_named<'a>(log: &'a EventLog, name: &str) -> Vec<&'a Value> {
    log.events
        .iter()
        .filter(|event| event["event"] == name)
        .collect()
}

fn transitions(log: &EventLog) -> Vec<String> {
    events_named(log, "reconciled")
        .iter()
        .filter_map(|event| event["transition"].as_str().map(str::to_string))
        .collect()
}

#[test]
fn walk_follow_and_return_home() -> Result<()> {
    let RunOutput { poses, log } = run_scenario("walk_and_return.json")?;
    assert!(!poses.is_empty(), "no pose samples recorded");

    let first = &poses[0];
    assert_eq!(first.phase.as_deref(), Some("at_fallback"));
    assert!(approx(first.position, [0.0; 3], 1e-4));

    let following: Vec<_> = poses
        .iter()
        .filter(|sample| sample.phase.as_deref() == Some("following"))
        .collect();
    assert!(!following.is_empty(), "character never started following");
    assert!(following.iter().all(|sample| sample.matched));
    assert!(following
        .iter()
        .filter(|sample| sample.time < 4.0)
        .all(|sample| approx(sample.position, [1.0, 0.0, 2.0], 1e-3)));
    assert!(following
        .iter()
        .filter(|sample| sample.time > 4.1)
        .any(|sample| approx(sample.position, [1.0, 0.0, 3.0], 1e-3)));

    let reversing = poses
        .iter()
        .find(|sample| sample.phase.as_deref() == Some("moving_reverse"))
        .context("character never reversed")?;
    assert!(reversing.time >= 5.0);
    assert!(!reversing.matched);

    let last = poses.last().context("pose log is empty")?;
    assert_eq!(last.phase.as_deref(), Some("at_fallback"));
    assert!(approx(last.position, [0.0; 3], 1e-4));
    assert!(approx(last.scale, [0.5; 3], 1e-6));
    assert!(poses.windows(2).all(|pair| pair[0].frame < pair[1].frame));

    assert_eq!(
        transitions(&log),
        [
            "unmatched_to_unmatched",
            "unmatched_to_unmatched",
            "unmatched_to_matched",
            "matched_to_unmatched",
        ]
    );
    let reverse = events_named(&log, "reconciled")
        .into_iter()
        .find(|event| event["transition"] == "matched_to_unmatched")
        .context("missing matched_to_unmatched reconciliation")?;
    assert_eq!(reverse["commands"][0]["command"], "move_reverse");
    assert_eq!(reverse["commands"][0]["time_id"], "A");

    let states: Vec<_> = log
        .animations
        .iter()
        .filter_map(|record| record["state"].as_str())
        .collect();
    assert_eq!(states, ["drawfwalk", "run", "drawfwalk", "run"]);

    let sent = events_named(&log, "chat_sent");
    assert_eq!(sent.len(), 1, "cooldown should drop the second send");
    assert_eq!(sent[0]["message"], "23:00 - B | run | what are you doing?");
    let received = events_named(&log, "chat_received");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0]["text"], "Tongtong heard: what are you doing?");

    let collisions = events_named(&log, "collision");
    assert_eq!(collisions.len(), 2);
    assert_eq!(collisions[0]["effect"], "show_message");
    assert_eq!(collisions[1]["effect"], "clear_message");

    Ok(())
}

#[test]
fn tracking_flicker_is_ignored_until_loss_expires() -> Result<()> {
    let RunOutput { poses, log } = run_scenario("tracking_lost.json")?;

    assert!(poses
        .iter()
        .filter(|sample| sample.time > 2.0 && sample.time < 5.0)
        .all(|sample| sample.matched && sample.phase.as_deref() == Some("following")));

    let lost = events_named(&log, "registry_lost");
    assert_eq!(lost.len(), 1);
    let lost_at = lost[0]["time"].as_f64().context("lost event without time")?;
    assert!(lost_at >= 5.9 && lost_at <= 6.2, "lost at {lost_at}");

    assert_eq!(
        transitions(&log),
        [
            "unmatched_to_unmatched",
            "unmatched_to_unmatched",
            "unmatched_to_matched",
            "matched_to_unmatched",
        ]
    );
    let cancel = events_named(&log, "reconciled")
        .into_iter()
        .last()
        .context("no reconciliation recorded")?;
    assert_eq!(cancel["commands"][0]["command"], "hard_cancel");

    let last = poses.last().context("pose log is empty")?;
    assert!(!last.matched);
    assert_eq!(last.phase.as_deref(), Some("at_fallback"));
    assert!(approx(last.position, [0.0; 3], 1e-4));

    Ok(())
}
