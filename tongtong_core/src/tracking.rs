//! Image-target registries: binary tracked state with a loss debounce, and
//! the start/target anchor pairs bound to each image.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::{AnchorTemplate, PrefabLibrary, RegistryConfig};
use crate::scene::{LocalTransform, NodeId, Scene};

pub const NO_SPOT: &str = "none";

/// Raw status reported by the image-tracking collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TrackingStatus {
    NoPose,
    Limited,
    Tracked,
    ExtendedTracked,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingPolicy {
    pub treat_limited_as_tracked: bool,
    pub treat_extended_as_tracked: bool,
}

impl TrackingPolicy {
    pub fn considers_tracked(&self, status: TrackingStatus) -> bool {
        match status {
            TrackingStatus::Tracked => true,
            TrackingStatus::ExtendedTracked => self.treat_extended_as_tracked,
            TrackingStatus::Limited => self.treat_limited_as_tracked,
            TrackingStatus::NoPose => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RegistryId(u32);

impl RegistryId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

impl fmt::Display for RegistryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorRole {
    Start,
    Target,
}

impl AnchorRole {
    pub fn label(self) -> &'static str {
        match self {
            AnchorRole::Start => "start",
            AnchorRole::Target => "target",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SpotPair {
    pub start: NodeId,
    pub target: NodeId,
}

impl SpotPair {
    /// Both anchors exist and are active in the hierarchy.
    pub fn is_live(&self, scene: &Scene) -> bool {
        scene.is_active_in_hierarchy(self.start) && scene.is_active_in_hierarchy(self.target)
    }
}

/// Outcome of feeding a tracking status or a tick into a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingTransition {
    /// Nothing observable changed.
    Unchanged,
    /// Tracking dropped; the loss countdown is running.
    LossPending,
    /// Tracking resumed inside the grace window; the countdown was dropped.
    LossCancelled,
    Acquired,
    Lost,
}

impl TrackingTransition {
    pub fn membership_changed(self) -> bool {
        matches!(self, TrackingTransition::Acquired | TrackingTransition::Lost)
    }
}

fn spot_key(id: &str) -> String {
    id.to_ascii_lowercase()
}

#[derive(Debug, Clone)]
struct SpotEntry {
    spot_id: String,
    start: AnchorTemplate,
    target: AnchorTemplate,
}

impl SpotEntry {
    fn template(&self, role: AnchorRole) -> &AnchorTemplate {
        match role {
            AnchorRole::Start => &self.start,
            AnchorRole::Target => &self.target,
        }
    }
}

/// One tracked image and the spot pairs bound to it.
///
/// `is_tracked` is the debounced state: it only turns false once the loss
/// countdown elapses without the raw status recovering.
#[derive(Debug)]
pub struct TrackedTargetRegistry {
    id: RegistryId,
    name: String,
    root: NodeId,
    policy: TrackingPolicy,
    lost_clear_delay: f32,
    default_spot_id: Option<String>,
    entries: Vec<SpotEntry>,
    ordered_ids: Vec<String>,
    observed_tracked: bool,
    is_tracked: bool,
    current_spot_id: String,
    instances: BTreeMap<(String, AnchorRole), NodeId>,
    loss_remaining: Option<f32>,
}

impl TrackedTargetRegistry {
    pub fn new(id: RegistryId, config: &RegistryConfig, scene: &mut Scene) -> Self {
        let root = scene.spawn(config.name.clone(), None, config.pose.to_local());
        let mut entries = Vec::new();
        let mut ordered_ids: Vec<String> = Vec::new();
        for pair in &config.pairs {
            let spot_id = pair.spot_id.trim();
            if spot_id.is_empty() {
                log::warn!("registry {}: spot pair without id skipped", config.name);
                continue;
            }
            if ordered_ids
                .iter()
                .any(|known| known.eq_ignore_ascii_case(spot_id))
            {
                log::warn!(
                    "registry {}: duplicate spot id {spot_id} ignored",
                    config.name
                );
                continue;
            }
            ordered_ids.push(spot_id.to_string());
            entries.push(SpotEntry {
                spot_id: spot_id.to_string(),
                start: pair.start.clone(),
                target: pair.target.clone(),
            });
        }

        Self {
            id,
            name: config.name.clone(),
            root,
            policy: config.policy,
            lost_clear_delay: config.lost_clear_delay_secs.max(0.0),
            default_spot_id: config.default_spot_id.clone(),
            entries,
            ordered_ids,
            observed_tracked: false,
            is_tracked: false,
            current_spot_id: NO_SPOT.to_string(),
            instances: BTreeMap::new(),
            loss_remaining: None,
        }
    }

    pub fn id(&self) -> RegistryId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scene node the tracking collaborator positions for this image.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_tracked(&self) -> bool {
        self.is_tracked
    }

    pub fn current_spot_id(&self) -> &str {
        &self.current_spot_id
    }

    pub fn loss_pending(&self) -> bool {
        self.loss_remaining.is_some()
    }

    /// Seeds the identity map with a node that already exists in the scene so
    /// it is reused instead of spawned.
    pub fn adopt_anchor(&mut self, spot_id: &str, role: AnchorRole, node: NodeId) -> bool {
        if !self.knows_spot(spot_id) {
            return false;
        }
        self.instances.insert((spot_key(spot_id), role), node);
        true
    }

    fn knows_spot(&self, spot_id: &str) -> bool {
        self.ordered_ids
            .iter()
            .any(|known| known.eq_ignore_ascii_case(spot_id))
    }

    fn canonical_spot(&self, spot_id: &str) -> Option<&str> {
        self.ordered_ids
            .iter()
            .find(|known| known.eq_ignore_ascii_case(spot_id))
            .map(String::as_str)
    }

    pub fn on_tracking_status_changed(
        &mut self,
        status: TrackingStatus,
        scene: &mut Scene,
        prefabs: &PrefabLibrary,
    ) -> TrackingTransition {
        let now_tracked = self.policy.considers_tracked(status);
        if now_tracked == self.observed_tracked {
            return TrackingTransition::Unchanged;
        }
        self.observed_tracked = now_tracked;

        if now_tracked {
            if self.loss_remaining.take().is_some() && self.is_tracked {
                log::debug!("registry {}: tracking recovered inside grace window", self.name);
                return TrackingTransition::LossCancelled;
            }
            self.acquire(scene, prefabs);
            return TrackingTransition::Acquired;
        }

        self.loss_remaining = Some(self.lost_clear_delay);
        if self.lost_clear_delay <= 0.0 {
            return self.expire(scene);
        }
        log::debug!(
            "registry {}: tracking dropped; clearing in {:.2}s",
            self.name,
            self.lost_clear_delay
        );
        TrackingTransition::LossPending
    }

    /// Advances the loss countdown.
    pub fn tick(&mut self, dt: f32, scene: &mut Scene) -> TrackingTransition {
        let Some(remaining) = self.loss_remaining.as_mut() else {
            return TrackingTransition::Unchanged;
        };
        *remaining -= dt;
        if *remaining > 0.0 {
            return TrackingTransition::Unchanged;
        }
        self.expire(scene)
    }

    fn acquire(&mut self, scene: &mut Scene, prefabs: &PrefabLibrary) {
        self.spawn_all_pairs(scene, prefabs);
        self.reapply_local_transforms(scene);
        self.activate_default_spot();
        self.is_tracked = true;
        log::info!(
            "registry {} tracked; active spot {}",
            self.name,
            self.current_spot_id
        );
    }

    fn expire(&mut self, scene: &mut Scene) -> TrackingTransition {
        self.loss_remaining = None;
        if self.observed_tracked {
            return TrackingTransition::Unchanged;
        }
        let was_tracked = self.is_tracked;
        self.is_tracked = false;
        self.current_spot_id = NO_SPOT.to_string();
        self.despawn_all_pairs(scene);
        if !was_tracked {
            return TrackingTransition::Unchanged;
        }
        log::info!("registry {} lost", self.name);
        TrackingTransition::Lost
    }

    fn spawn_all_pairs(&mut self, scene: &mut Scene, prefabs: &PrefabLibrary) {
        for index in 0..self.entries.len() {
            let spot_id = self.entries[index].spot_id.clone();
            for role in [AnchorRole::Start, AnchorRole::Target] {
                let key = (spot_key(&spot_id), role);
                if let Some(existing) = self.instances.get(&key) {
                    if scene.contains(*existing) {
                        continue;
                    }
                }
                let template = self.entries[index].template(role);
                let local = match template.prefab.as_deref() {
                    Some(prefab) => match prefabs.get(prefab) {
                        Some(pose) => pose.to_local(),
                        None => {
                            log::warn!(
                                "registry {}: prefab {prefab} for {spot_id}/{} missing; spawning empty anchor",
                                self.name,
                                role.label()
                            );
                            LocalTransform::IDENTITY
                        }
                    },
                    None => LocalTransform::IDENTITY,
                };
                let local = template
                    .captured_local
                    .map(|captured| captured.to_local())
                    .unwrap_or(local);
                let node_name = format!("{}_{}/{}", self.name, spot_id, role.label());
                let node = scene.spawn(node_name, Some(self.root), local);
                self.instances.insert(key, node);
            }
        }
    }

    fn despawn_all_pairs(&mut self, scene: &mut Scene) {
        for node in std::mem::take(&mut self.instances).into_values() {
            scene.despawn(node);
        }
    }

    /// Re-applies captured local transforms to every live anchor that has one.
    pub fn reapply_local_transforms(&self, scene: &mut Scene) {
        for entry in &self.entries {
            for role in [AnchorRole::Start, AnchorRole::Target] {
                let Some(captured) = entry.template(role).captured_local else {
                    continue;
                };
                if let Some(node) = self.instances.get(&(spot_key(&entry.spot_id), role)) {
                    scene.set_local(*node, captured.to_local());
                }
            }
        }
    }

    fn activate_default_spot(&mut self) {
        let default = self
            .default_spot_id
            .as_deref()
            .and_then(|id| self.canonical_spot(id))
            .map(str::to_string);
        self.current_spot_id = default
            .or_else(|| self.ordered_ids.first().cloned())
            .unwrap_or_else(|| NO_SPOT.to_string());
    }

    /// Returns true when the active spot changed and a re-match is due.
    pub fn set_active_spot_id(&mut self, spot_id: &str, scene: &mut Scene) -> bool {
        if !self.is_tracked {
            return false;
        }
        let Some(canonical) = self.canonical_spot(spot_id).map(str::to_string) else {
            log::warn!("registry {}: unknown spot id {spot_id}", self.name);
            return false;
        };
        self.current_spot_id = canonical;
        self.reapply_local_transforms(scene);
        true
    }

    pub fn cycle_next_spot(&mut self) -> bool {
        if !self.is_tracked || self.ordered_ids.is_empty() {
            return false;
        }
        let index = self
            .ordered_ids
            .iter()
            .position(|id| id.eq_ignore_ascii_case(&self.current_spot_id))
            .unwrap_or(0);
        let next = (index + 1) % self.ordered_ids.len();
        self.current_spot_id = self.ordered_ids[next].clone();
        true
    }

    /// The pair for `spot_id` when it is the active spot and both anchors
    /// are still live. Never returns half a pair.
    pub fn try_get_live_pair(&self, spot_id: &str, scene: &Scene) -> Option<SpotPair> {
        if !self.is_tracked || spot_id.is_empty() {
            return None;
        }
        if !spot_id.eq_ignore_ascii_case(&self.current_spot_id) {
            return None;
        }
        let key = spot_key(spot_id);
        let start = *self.instances.get(&(key.clone(), AnchorRole::Start))?;
        let target = *self.instances.get(&(key, AnchorRole::Target))?;
        let pair = SpotPair { start, target };
        pair.is_live(scene).then_some(pair)
    }

    pub fn live_pair(&self, scene: &Scene) -> Option<SpotPair> {
        self.try_get_live_pair(&self.current_spot_id, scene)
    }

    pub fn anchor(&self, spot_id: &str, role: AnchorRole) -> Option<NodeId> {
        self.instances.get(&(spot_key(spot_id), role)).copied()
    }
}

/// Owns every registry plus the set of currently tracked ones. Iteration
/// over the tracked set is in registration order.
#[derive(Debug, Default)]
pub struct RegistrySet {
    registries: BTreeMap<RegistryId, TrackedTargetRegistry>,
    names: BTreeMap<String, RegistryId>,
    active: BTreeSet<RegistryId>,
    next_id: u32,
}

impl RegistrySet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, config: &RegistryConfig, scene: &mut Scene) -> RegistryId {
        if let Some(existing) = self.names.get(&config.name) {
            log::warn!("registry {} already registered", config.name);
            return *existing;
        }
        let id = RegistryId(self.next_id);
        self.next_id += 1;
        let registry = TrackedTargetRegistry::new(id, config, scene);
        self.names.insert(config.name.clone(), id);
        self.registries.insert(id, registry);
        id
    }

    pub fn len(&self) -> usize {
        self.registries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registries.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Option<RegistryId> {
        self.names.get(name).copied()
    }

    pub fn get(&self, id: RegistryId) -> Option<&TrackedTargetRegistry> {
        self.registries.get(&id)
    }

    pub fn get_mut(&mut self, id: RegistryId) -> Option<&mut TrackedTargetRegistry> {
        self.registries.get_mut(&id)
    }

    pub fn is_active(&self, id: RegistryId) -> bool {
        self.active.contains(&id)
    }

    pub fn tracked(&self) -> impl Iterator<Item = &TrackedTargetRegistry> + '_ {
        self.active
            .iter()
            .filter_map(|id| self.registries.get(id))
            .filter(|registry| registry.is_tracked())
    }

    pub fn on_tracking_status_changed(
        &mut self,
        id: RegistryId,
        status: TrackingStatus,
        scene: &mut Scene,
        prefabs: &PrefabLibrary,
    ) -> TrackingTransition {
        let Some(registry) = self.registries.get_mut(&id) else {
            log::warn!("tracking status for unknown registry {id}");
            return TrackingTransition::Unchanged;
        };
        let transition = registry.on_tracking_status_changed(status, scene, prefabs);
        self.apply_membership(id, transition);
        transition
    }

    /// Advances every loss countdown; returns the registries that were lost.
    pub fn tick(&mut self, dt: f32, scene: &mut Scene) -> Vec<RegistryId> {
        let mut lost = Vec::new();
        for (id, registry) in self.registries.iter_mut() {
            if registry.tick(dt, scene) == TrackingTransition::Lost {
                lost.push(*id);
            }
        }
        for id in &lost {
            self.active.remove(id);
        }
        lost
    }

    fn apply_membership(&mut self, id: RegistryId, transition: TrackingTransition) {
        match transition {
            TrackingTransition::Acquired => {
                self.active.insert(id);
            }
            TrackingTransition::Lost => {
                self.active.remove(&id);
            }
            _ => {}
        }
    }
}
