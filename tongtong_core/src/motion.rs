//! Point-to-point character motion driven one tick at a time.
//!
//! Every state-changing call bumps the motion token before it does anything
//! else. Walks are queued as cooperative tasks that capture the token they
//! were started with; a task whose token is no longer current retires on its
//! next poll without touching the character.

use glam::{Mat3, Quat, Vec3};
use serde::{Deserialize, Serialize};

use crate::scene::{NodeId, Scene};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionProfile {
    pub move_state: String,
    pub arrive_state: String,
    pub idle_state: String,
    pub move_speed: f32,
    pub rotate_speed: f32,
    pub arrive_threshold: f32,
    pub smooth_stop: bool,
    pub arrive_on_backward: bool,
    pub follow_on_arrival: bool,
    pub follow_copy_rotation: bool,
    pub follow_copy_scale: bool,
    pub timeout_secs: f32,
}

impl Default for MotionProfile {
    fn default() -> Self {
        Self {
            move_state: "drawfwalk".to_string(),
            arrive_state: "run".to_string(),
            idle_state: String::new(),
            move_speed: 2.0,
            rotate_speed: 10.0,
            arrive_threshold: 0.06,
            smooth_stop: true,
            arrive_on_backward: false,
            follow_on_arrival: true,
            follow_copy_rotation: true,
            follow_copy_scale: true,
            timeout_secs: 30.0,
        }
    }
}

/// Per-slot overrides; unset fields inherit the session defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionProfileOverride {
    pub move_state: Option<String>,
    pub arrive_state: Option<String>,
    pub idle_state: Option<String>,
    pub move_speed: Option<f32>,
    pub rotate_speed: Option<f32>,
    pub arrive_threshold: Option<f32>,
    pub smooth_stop: Option<bool>,
    pub arrive_on_backward: Option<bool>,
}

impl MotionProfileOverride {
    pub fn apply_to(&self, defaults: &MotionProfile) -> MotionProfile {
        let mut profile = defaults.clone();
        if let Some(state) = &self.move_state {
            profile.move_state = state.clone();
        }
        if let Some(state) = &self.arrive_state {
            profile.arrive_state = state.clone();
        }
        if let Some(state) = &self.idle_state {
            profile.idle_state = state.clone();
        }
        if let Some(speed) = self.move_speed {
            profile.move_speed = speed;
        }
        if let Some(speed) = self.rotate_speed {
            profile.rotate_speed = speed;
        }
        if let Some(threshold) = self.arrive_threshold {
            profile.arrive_threshold = threshold;
        }
        if let Some(flag) = self.smooth_stop {
            profile.smooth_stop = flag;
        }
        if let Some(flag) = self.arrive_on_backward {
            profile.arrive_on_backward = flag;
        }
        profile
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MotionToken(u64);

impl MotionToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum MotionPhase {
    AtFallback,
    Idle,
    Following { target: NodeId },
    MovingForward,
    MovingReverse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Forward,
    Reverse,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "cue", rename_all = "snake_case")]
pub enum AnimationCue {
    Play { state: String },
    CrossFade { state: String, fade_secs: f32 },
}

impl AnimationCue {
    pub fn state(&self) -> &str {
        match self {
            AnimationCue::Play { state } | AnimationCue::CrossFade { state, .. } => state,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MotionEvent {
    Animation(AnimationCue),
    Arrived {
        token: MotionToken,
        direction: Direction,
    },
    Abandoned {
        token: MotionToken,
        direction: Direction,
    },
    FollowSuspended {
        target: NodeId,
    },
    /// A walk stopped because one of its anchors was destroyed or hidden.
    AnchorLost {
        token: MotionToken,
        direction: Direction,
    },
    ReturnedToFallback {
        token: MotionToken,
    },
}

const ARRIVE_FADE_SECS: f32 = 0.1;
const MIN_HEADING_SQR: f32 = 1e-6;

#[derive(Debug, Clone)]
struct MotionTask {
    token: MotionToken,
    direction: Direction,
    destination: Vec3,
    start: NodeId,
    target: NodeId,
    profile: MotionProfile,
    elapsed: f32,
}

enum TaskPoll {
    Pending(MotionTask),
    Arrived(MotionTask),
    Abandoned(MotionTask),
    AnchorLost(MotionTask),
    Stale,
}

#[derive(Debug, Clone, Copy)]
struct FollowState {
    target: NodeId,
    copy_rotation: bool,
    copy_scale: bool,
}

/// Drives one character node. The character is expected to stay parented to
/// the fallback anchor; all pose writes go through world-space setters.
#[derive(Debug)]
pub struct MotionOrchestrator {
    character: NodeId,
    fallback: Option<NodeId>,
    home_scale: Vec3,
    token: MotionToken,
    phase: MotionPhase,
    tasks: Vec<MotionTask>,
    follow: Option<FollowState>,
    events: Vec<MotionEvent>,
}

impl MotionOrchestrator {
    pub fn new(character: NodeId, fallback: Option<NodeId>, home_scale: Vec3) -> Self {
        Self {
            character,
            fallback,
            home_scale,
            token: MotionToken::default(),
            phase: MotionPhase::AtFallback,
            tasks: Vec::new(),
            follow: None,
            events: Vec::new(),
        }
    }

    pub fn character(&self) -> NodeId {
        self.character
    }

    pub fn token(&self) -> MotionToken {
        self.token
    }

    pub fn phase(&self) -> MotionPhase {
        self.phase
    }

    pub fn is_at_fallback(&self) -> bool {
        self.phase == MotionPhase::AtFallback
    }

    /// Tasks still queued, including cancelled ones that have not yet been
    /// polled.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn drain_events(&mut self) -> Vec<MotionEvent> {
        std::mem::take(&mut self.events)
    }

    fn bump_token(&mut self) -> MotionToken {
        self.token = MotionToken(self.token.0 + 1);
        self.token
    }

    /// Teleports the character onto `start` (position, rotation, world scale).
    pub fn align_to_start(&mut self, scene: &mut Scene, start: NodeId) -> MotionToken {
        let token = self.bump_token();
        self.follow = None;
        if scene.copy_world_pose(self.character, start) {
            self.phase = MotionPhase::Idle;
        } else {
            log::warn!("motion.align start anchor #{} missing", start.raw());
        }
        token
    }

    pub fn move_forward(
        &mut self,
        scene: &mut Scene,
        start: NodeId,
        target: NodeId,
        profile: &MotionProfile,
    ) -> MotionToken {
        self.begin_walk(scene, start, target, Direction::Forward, profile)
    }

    /// Walks target→start; arrival always ends with a return to the fallback.
    pub fn move_reverse(
        &mut self,
        scene: &mut Scene,
        start: NodeId,
        target: NodeId,
        profile: &MotionProfile,
    ) -> MotionToken {
        self.begin_walk(scene, start, target, Direction::Reverse, profile)
    }

    fn begin_walk(
        &mut self,
        scene: &mut Scene,
        start: NodeId,
        target: NodeId,
        direction: Direction,
        profile: &MotionProfile,
    ) -> MotionToken {
        let (origin, goal) = match direction {
            Direction::Forward => (start, target),
            Direction::Reverse => (target, start),
        };
        let live = scene.is_active_in_hierarchy(start) && scene.is_active_in_hierarchy(target);
        let endpoints = live
            .then(|| scene.world_position(origin).zip(scene.world_position(goal)))
            .flatten();
        let Some((from, to)) = endpoints else {
            log::warn!(
                "motion.{direction:?} anchors unavailable (start #{}, target #{}); \
                 returning to fallback",
                start.raw(),
                target.raw()
            );
            return self.hard_cancel_to_fallback(scene);
        };

        let token = self.bump_token();
        self.follow = None;

        scene.copy_world_pose(self.character, origin);
        let heading = to - from;
        if heading.length_squared() > MIN_HEADING_SQR {
            scene.set_world_rotation(self.character, look_rotation(heading));
        }

        self.play(&profile.move_state);
        self.phase = match direction {
            Direction::Forward => MotionPhase::MovingForward,
            Direction::Reverse => MotionPhase::MovingReverse,
        };
        log::debug!(
            "motion.{direction:?} token={} from {from:?} to {to:?}",
            token.0
        );
        self.tasks.push(MotionTask {
            token,
            direction,
            destination: to,
            start,
            target,
            profile: profile.clone(),
            elapsed: 0.0,
        });
        token
    }

    /// Cancels everything and snaps the character back onto the fallback
    /// anchor. Safe to call from any phase, any number of times.
    pub fn hard_cancel_to_fallback(&mut self, scene: &mut Scene) -> MotionToken {
        let token = self.bump_token();
        self.follow = None;
        self.phase = MotionPhase::AtFallback;

        let Some(fallback) = self.fallback.filter(|fallback| scene.contains(*fallback)) else {
            log::warn!("motion.fallback anchor missing; character left in place");
            return token;
        };

        if scene.parent(self.character) == Some(fallback) {
            if let Some(mut local) = scene.local(self.character) {
                local.position = Vec3::ZERO;
                local.rotation = Quat::IDENTITY;
                local.scale = self.home_scale;
                scene.set_local(self.character, local);
            }
        } else if let (Some(position), Some(rotation), Some(scale)) = (
            scene.world_position(fallback),
            scene.world_rotation(fallback),
            scene.world_scale(fallback),
        ) {
            scene.set_world_position(self.character, position);
            scene.set_world_rotation(self.character, rotation);
            scene.set_world_scale(self.character, scale * self.home_scale);
        }

        self.events.push(MotionEvent::ReturnedToFallback { token });
        token
    }

    pub fn start_following(
        &mut self,
        scene: &mut Scene,
        target: NodeId,
        copy_rotation: bool,
        copy_scale: bool,
    ) {
        if !scene.contains(target) || !scene.is_active_in_hierarchy(target) {
            self.follow = None;
            self.phase = MotionPhase::Idle;
            return;
        }
        let follow = FollowState {
            target,
            copy_rotation,
            copy_scale,
        };
        self.snap_to(scene, follow);
        self.follow = Some(follow);
        self.phase = MotionPhase::Following { target };
    }

    /// Advances queued walks by `dt` seconds, then syncs the follow target.
    pub fn tick(&mut self, scene: &mut Scene, dt: f32) {
        let tasks = std::mem::take(&mut self.tasks);
        let mut survivors = Vec::with_capacity(tasks.len());
        for task in tasks {
            match self.poll(scene, task, dt) {
                TaskPoll::Pending(task) => survivors.push(task),
                TaskPoll::Arrived(task) => self.finish(scene, task),
                TaskPoll::Abandoned(task) => {
                    log::debug!(
                        "motion.{:?} token={} abandoned after {:.1}s",
                        task.direction,
                        task.token.0,
                        task.elapsed
                    );
                    self.phase = MotionPhase::Idle;
                    self.events.push(MotionEvent::Abandoned {
                        token: task.token,
                        direction: task.direction,
                    });
                }
                TaskPoll::AnchorLost(task) => {
                    log::debug!(
                        "motion.{:?} token={} lost an anchor mid-walk",
                        task.direction,
                        task.token.0
                    );
                    self.phase = MotionPhase::Idle;
                    self.events.push(MotionEvent::AnchorLost {
                        token: task.token,
                        direction: task.direction,
                    });
                }
                TaskPoll::Stale => {}
            }
        }
        survivors.append(&mut self.tasks);
        self.tasks = survivors;

        self.update_follow(scene);
    }

    fn poll(&self, scene: &mut Scene, mut task: MotionTask, dt: f32) -> TaskPoll {
        if task.token != self.token {
            log::trace!("motion task token={} is stale; retiring", task.token.0);
            return TaskPoll::Stale;
        }
        if !scene.is_active_in_hierarchy(task.start) || !scene.is_active_in_hierarchy(task.target) {
            return TaskPoll::AnchorLost(task);
        }
        let Some(position) = scene.world_position(self.character) else {
            return TaskPoll::Abandoned(task);
        };

        let to_goal = task.destination - position;
        let distance = to_goal.length();
        if distance <= task.profile.arrive_threshold {
            return TaskPoll::Arrived(task);
        }
        if task.elapsed >= task.profile.timeout_secs {
            return TaskPoll::Abandoned(task);
        }

        if to_goal.length_squared() > MIN_HEADING_SQR {
            if let Some(current) = scene.world_rotation(self.character) {
                let blend = (dt * task.profile.rotate_speed).clamp(0.0, 1.0);
                let heading = current.slerp(look_rotation(to_goal), blend).normalize();
                scene.set_world_rotation(self.character, heading);
            }
        }

        let mut speed = task.profile.move_speed;
        if task.profile.smooth_stop {
            let factor = (distance / 1.0).clamp(0.0, 1.0);
            speed *= 0.5 + (1.0 - 0.5) * factor;
        }
        let next = move_towards(position, task.destination, speed * dt);
        scene.set_world_position(self.character, next);
        task.elapsed += dt;
        log::trace!(
            "motion task token={} at {next:?} ({distance:.3} remaining)",
            task.token.0
        );
        TaskPoll::Pending(task)
    }

    fn finish(&mut self, scene: &mut Scene, task: MotionTask) {
        self.events.push(MotionEvent::Arrived {
            token: task.token,
            direction: task.direction,
        });
        match task.direction {
            Direction::Forward => {
                self.cross_fade(&task.profile.arrive_state);
                self.phase = MotionPhase::Idle;
                if task.profile.follow_on_arrival {
                    self.start_following(
                        scene,
                        task.target,
                        task.profile.follow_copy_rotation,
                        task.profile.follow_copy_scale,
                    );
                }
            }
            Direction::Reverse => {
                let profile = &task.profile;
                if profile.arrive_on_backward {
                    self.cross_fade(&profile.arrive_state);
                } else {
                    let settle = [&profile.idle_state, &profile.arrive_state, &profile.move_state]
                        .into_iter()
                        .find(|state| !state.is_empty())
                        .cloned();
                    if let Some(state) = settle {
                        self.play(&state);
                    }
                }
                self.hard_cancel_to_fallback(scene);
            }
        }
    }

    fn update_follow(&mut self, scene: &mut Scene) {
        let Some(follow) = self.follow else {
            return;
        };
        if !scene.contains(follow.target) || !scene.is_active_in_hierarchy(follow.target) {
            log::debug!(
                "motion.follow target #{} inactive; suspending",
                follow.target.raw()
            );
            self.follow = None;
            self.phase = MotionPhase::Idle;
            self.events.push(MotionEvent::FollowSuspended {
                target: follow.target,
            });
            return;
        }
        self.snap_to(scene, follow);
    }

    fn snap_to(&self, scene: &mut Scene, follow: FollowState) {
        if let Some(position) = scene.world_position(follow.target) {
            scene.set_world_position(self.character, position);
        }
        if follow.copy_rotation {
            if let Some(rotation) = scene.world_rotation(follow.target) {
                scene.set_world_rotation(self.character, rotation);
            }
        }
        if follow.copy_scale {
            if let Some(scale) = scene.world_scale(follow.target) {
                scene.set_world_scale(self.character, scale);
            }
        }
    }

    fn play(&mut self, state: &str) {
        if state.is_empty() {
            return;
        }
        self.events.push(MotionEvent::Animation(AnimationCue::Play {
            state: state.to_string(),
        }));
    }

    fn cross_fade(&mut self, state: &str) {
        if state.is_empty() {
            return;
        }
        self.events
            .push(MotionEvent::Animation(AnimationCue::CrossFade {
                state: state.to_string(),
                fade_secs: ARRIVE_FADE_SECS,
            }));
    }
}

/// Rotation whose +Z axis points along `forward` with +Y kept as close to up
/// as possible.
pub fn look_rotation(forward: Vec3) -> Quat {
    let forward = forward.normalize_or_zero();
    if forward == Vec3::ZERO {
        return Quat::IDENTITY;
    }
    let mut right = Vec3::Y.cross(forward);
    if right.length_squared() < 1e-8 {
        right = Vec3::X;
    }
    let right = right.normalize();
    let up = forward.cross(right);
    Quat::from_mat3(&Mat3::from_cols(right, up, forward)).normalize()
}

pub fn move_towards(current: Vec3, goal: Vec3, max_delta: f32) -> Vec3 {
    let delta = goal - current;
    let distance = delta.length();
    if distance <= max_delta || distance == 0.0 {
        goal
    } else {
        current + delta / distance * max_delta
    }
}
