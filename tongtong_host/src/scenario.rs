use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tongtong_core::config::PoseConfig;
use tongtong_core::{
    AnchorRole, ChatTransport, ContactPhase, InboundMessage, Session, TrackingStatus,
};

/// Scripted inputs replayed against a session at fixed simulation times.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub duration_secs: Option<f32>,
    #[serde(default)]
    pub actions: Vec<TimedAction>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimedAction {
    pub at: f32,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Action {
    Tracking {
        registry: String,
        status: TrackingStatus,
    },
    SetHour {
        hour: f32,
    },
    SetSpot {
        registry: String,
        spot_id: String,
    },
    CycleSpot {
        registry: String,
    },
    ImagePose {
        registry: String,
        pose: PoseConfig,
    },
    ImageVisible {
        registry: String,
        visible: bool,
    },
    /// Places a node under the image root and hands it to the registry as
    /// an existing anchor.
    PlaceAnchor {
        registry: String,
        spot_id: String,
        role: AnchorRole,
        pose: PoseConfig,
    },
    Contact {
        phase: ContactPhase,
        #[serde(default = "default_contact_tag")]
        tag: String,
    },
    ChatInput {
        text: String,
    },
    ChatSend,
    Transcript {
        text: String,
    },
}

fn default_contact_tag() -> String {
    "Collision".to_string()
}

impl Scenario {
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading scenario {}", path.display()))?;
        let mut scenario: Scenario = serde_json::from_str(&text)
            .with_context(|| format!("parsing scenario {}", path.display()))?;
        scenario.validate()?;
        scenario.actions.sort_by(|a, b| a.at.total_cmp(&b.at));
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        for (index, action) in self.actions.iter().enumerate() {
            if !action.at.is_finite() || action.at < 0.0 {
                bail!("scenario action {index} has invalid time {}", action.at);
            }
        }
        if let Some(duration) = self.duration_secs {
            if !duration.is_finite() || duration < 0.0 {
                bail!("scenario duration {duration} is invalid");
            }
        }
        Ok(())
    }

    /// Explicit duration, else a few seconds past the last action.
    pub fn duration(&self) -> f32 {
        self.duration_secs.unwrap_or_else(|| {
            self.actions
                .last()
                .map(|action| action.at + 5.0)
                .unwrap_or(5.0)
        })
    }
}

pub fn apply(action: &Action, session: &mut Session, transport: &mut dyn ChatTransport) {
    log::debug!("scenario action {action:?}");
    match action {
        Action::Tracking { registry, status } => session.on_tracking_status(registry, *status),
        Action::SetHour { hour } => session.set_hour(*hour),
        Action::SetSpot { registry, spot_id } => {
            session.set_active_spot(registry, spot_id);
        }
        Action::CycleSpot { registry } => {
            session.cycle_next_spot(registry);
        }
        Action::ImagePose { registry, pose } => {
            session.set_image_pose(registry, pose);
        }
        Action::ImageVisible { registry, visible } => {
            session.set_image_visible(registry, *visible);
        }
        Action::PlaceAnchor {
            registry,
            spot_id,
            role,
            pose,
        } => {
            let Some(root) = session
                .registry_id(registry)
                .and_then(|id| session.registries().get(id))
                .map(|target| target.root())
            else {
                log::warn!("scenario: unknown registry {registry}");
                return;
            };
            let name = format!("{registry}_{spot_id}/{}", role.label());
            let node = session.scene_mut().spawn(name, Some(root), pose.to_local());
            if !session.adopt_anchor(registry, spot_id, *role, node) {
                log::warn!("scenario: {registry} has no spot {spot_id}");
            }
        }
        Action::Contact { phase, tag } => session.on_contact(*phase, tag),
        Action::ChatInput { text } => session.set_chat_input(text.clone()),
        Action::ChatSend => {
            if let Err(err) = session.send_chat(transport) {
                log::warn!("scenario chat send failed: {err}");
            }
        }
        Action::Transcript { text } => session
            .inbox()
            .push(InboundMessage::Transcript(text.clone())),
    }
}
