use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    about = "Headless host that drives a TongTong session from a scripted scenario",
    version
)]
pub struct Args {
    /// Path to the JSON session configuration
    #[arg(long)]
    pub config: PathBuf,

    /// Optional JSON scenario of timed inputs (tracking, time, spots, chat)
    #[arg(long)]
    pub scenario: Option<PathBuf>,

    /// Fixed simulation ticks per second
    #[arg(long, default_value_t = 30.0)]
    pub tick_rate: f32,

    /// Seconds to simulate; defaults to the scenario duration
    #[arg(long)]
    pub duration: Option<f32>,

    /// Path to write the per-tick character pose log as JSON
    #[arg(long)]
    pub pose_log_json: Option<PathBuf>,

    /// Path to write the session event log as JSON
    #[arg(long)]
    pub event_log_json: Option<PathBuf>,

    /// Address to publish TongStream pose updates on (e.g. 127.0.0.1:7788)
    #[arg(long, value_name = "ADDR")]
    pub stream_bind: Option<String>,

    /// Raise the default log filter to debug
    #[arg(long)]
    pub verbose: bool,
}

#[derive(Debug)]
pub struct RunArgs {
    pub config: PathBuf,
    pub scenario: Option<PathBuf>,
    pub tick_secs: f32,
    pub duration: Option<f32>,
    pub pose_log_json: Option<PathBuf>,
    pub event_log_json: Option<PathBuf>,
    pub stream_bind: Option<String>,
    pub verbose: bool,
}

pub fn parse() -> Result<RunArgs> {
    let args = Args::parse();
    args.into_run()
}

impl Args {
    fn into_run(self) -> Result<RunArgs> {
        if !self.tick_rate.is_finite() || self.tick_rate <= 0.0 {
            bail!("--tick-rate must be a positive number (got {})", self.tick_rate);
        }
        if let Some(duration) = self.duration {
            if !duration.is_finite() || duration < 0.0 {
                bail!("--duration must be a non-negative number (got {duration})");
            }
        }
        Ok(RunArgs {
            config: self.config,
            scenario: self.scenario,
            tick_secs: 1.0 / self.tick_rate,
            duration: self.duration,
            pose_log_json: self.pose_log_json,
            event_log_json: self.event_log_json,
            stream_bind: self.stream_bind,
            verbose: self.verbose,
        })
    }
}
