//! Session configuration loaded from JSON and passed into [`crate::Session`].

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::motion::MotionProfile;
use crate::scene::LocalTransform;
use crate::time_slots::TimeSlotRecord;
use crate::tracking::TrackingPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid session config: {0}")]
    Json(#[from] serde_json::Error),
    #[error("registry name {0:?} is used more than once")]
    DuplicateRegistry(String),
    #[error("registry entry without a name")]
    UnnamedRegistry,
    #[error("{field} must be {expected} (found {found})")]
    InvalidValue {
        field: String,
        expected: &'static str,
        found: f32,
    },
}

/// Position, Euler rotation in degrees, and scale.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub position: [f32; 3],
    pub rotation: [f32; 3],
    pub scale: [f32; 3],
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            rotation: [0.0; 3],
            scale: [1.0; 3],
        }
    }
}

impl PoseConfig {
    pub fn at(position: [f32; 3]) -> Self {
        Self {
            position,
            ..Self::default()
        }
    }

    pub fn to_local(&self) -> LocalTransform {
        LocalTransform::from_parts(self.position, self.rotation, self.scale)
    }

    fn is_finite(&self) -> bool {
        self.position
            .iter()
            .chain(&self.rotation)
            .chain(&self.scale)
            .all(|value| value.is_finite())
    }
}

/// Named local pose templates used when spawning spot anchors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefabLibrary(BTreeMap<String, PoseConfig>);

impl PrefabLibrary {
    pub fn insert(&mut self, name: impl Into<String>, pose: PoseConfig) {
        self.0.insert(name.into(), pose);
    }

    pub fn get(&self, name: &str) -> Option<&PoseConfig> {
        self.0.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnchorTemplate {
    pub prefab: Option<String>,
    /// Local transform re-applied every time the anchor is (re)activated.
    pub captured_local: Option<PoseConfig>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpotPairConfig {
    pub spot_id: String,
    #[serde(default)]
    pub start: AnchorTemplate,
    #[serde(default)]
    pub target: AnchorTemplate,
}

impl SpotPairConfig {
    pub fn new(spot_id: &str) -> Self {
        Self {
            spot_id: spot_id.to_string(),
            start: AnchorTemplate::default(),
            target: AnchorTemplate::default(),
        }
    }

    /// Pair whose anchors sit at fixed offsets from the image root.
    pub fn at(spot_id: &str, start: [f32; 3], target: [f32; 3]) -> Self {
        Self {
            spot_id: spot_id.to_string(),
            start: AnchorTemplate {
                prefab: None,
                captured_local: Some(PoseConfig::at(start)),
            },
            target: AnchorTemplate {
                prefab: None,
                captured_local: Some(PoseConfig::at(target)),
            },
        }
    }
}

fn default_lost_clear_delay() -> f32 {
    6.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub name: String,
    #[serde(default)]
    pub pose: PoseConfig,
    #[serde(default)]
    pub default_spot_id: Option<String>,
    #[serde(default = "default_lost_clear_delay")]
    pub lost_clear_delay_secs: f32,
    #[serde(flatten)]
    pub policy: TrackingPolicy,
    #[serde(default)]
    pub pairs: Vec<SpotPairConfig>,
}

impl RegistryConfig {
    pub fn new(name: &str, pairs: Vec<SpotPairConfig>) -> Self {
        Self {
            name: name.to_string(),
            pose: PoseConfig::default(),
            default_spot_id: None,
            lost_clear_delay_secs: default_lost_clear_delay(),
            policy: TrackingPolicy::default(),
            pairs,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CharacterConfig {
    pub prefab: Option<String>,
    pub scale: [f32; 3],
}

impl Default for CharacterConfig {
    fn default() -> Self {
        Self {
            prefab: Some("tongtong".to_string()),
            scale: [0.5; 3],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CollisionConfig {
    pub trigger_tag: String,
    pub message: String,
    pub display_secs: f32,
    pub retrigger_secs: f32,
    pub clip: Option<String>,
}

impl Default for CollisionConfig {
    fn default() -> Self {
        Self {
            trigger_tag: "Collision".to_string(),
            message: "TongTong hit the table, need to move back a bit".to_string(),
            display_secs: 5.0,
            retrigger_secs: 0.5,
            clip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub cooldown_secs: f32,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 0.25,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub initial_hour: f32,
    pub time_slots: Vec<TimeSlotRecord>,
    pub default_motion: MotionProfile,
    /// World pose of the fallback anchor; `None` leaves the character
    /// without a home and hard-cancels only stop motion.
    pub fallback: Option<PoseConfig>,
    pub character: CharacterConfig,
    pub prefabs: PrefabLibrary,
    pub registries: Vec<RegistryConfig>,
    pub collision: CollisionConfig,
    pub chat: ChatConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_hour: 9.0,
            time_slots: Vec::new(),
            default_motion: MotionProfile::default(),
            fallback: Some(PoseConfig::default()),
            character: CharacterConfig::default(),
            prefabs: PrefabLibrary::default(),
            registries: Vec::new(),
            collision: CollisionConfig::default(),
            chat: ChatConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: SessionConfig = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Rejects configurations that cannot be run at all. Softer gaps (unknown
    /// prefabs, unparsable slot hours) are only warned about when the session
    /// is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.initial_hour.is_finite() {
            return Err(invalid("initial_hour", "finite", self.initial_hour));
        }
        let mut names = BTreeSet::new();
        for registry in &self.registries {
            if registry.name.trim().is_empty() {
                return Err(ConfigError::UnnamedRegistry);
            }
            if !names.insert(registry.name.as_str()) {
                return Err(ConfigError::DuplicateRegistry(registry.name.clone()));
            }
            let delay = registry.lost_clear_delay_secs;
            if !delay.is_finite() || delay < 0.0 {
                return Err(invalid(
                    &format!("registries.{}.lost_clear_delay_secs", registry.name),
                    "a non-negative number",
                    delay,
                ));
            }
            if !registry.pose.is_finite() {
                return Err(invalid(
                    &format!("registries.{}.pose", registry.name),
                    "finite",
                    f32::NAN,
                ));
            }
        }
        if let Some(value) = self.character.scale.iter().find(|value| !value.is_finite()) {
            return Err(invalid("character.scale", "finite", *value));
        }
        let motion = &self.default_motion;
        for (field, value) in [
            ("default_motion.move_speed", motion.move_speed),
            ("default_motion.rotate_speed", motion.rotate_speed),
            ("default_motion.arrive_threshold", motion.arrive_threshold),
            ("default_motion.timeout_secs", motion.timeout_secs),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(field, "a non-negative number", value));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, expected: &'static str, found: f32) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        expected,
        found,
    }
}
