//! Host context owning the scene, the registries, the clock, the reconciler
//! and the character. Every external input enters through a `Session`
//! method and every state change happens on the caller's tick thread.

use glam::Vec3;
use serde::Serialize;

use crate::chat::{ChatComposer, ChatError, ChatInbox, ChatTransport, InboundMessage};
use crate::collision::{CollisionEffect, CollisionNotifier, ContactPhase};
use crate::config::{CharacterConfig, ConfigError, PoseConfig, PrefabLibrary, SessionConfig};
use crate::motion::{AnimationCue, MotionEvent, MotionOrchestrator, MotionPhase, MotionProfile};
use crate::reconciler::{
    CharacterStatus, MatchReconciler, MatchState, MotionCommand, Reconciliation,
};
use crate::scene::{yaw_degrees, LocalTransform, NodeId, Scene};
use crate::time_slots::{TimeController, TimeSlotTable};
use crate::tracking::{AnchorRole, RegistryId, RegistrySet, TrackingStatus, TrackingTransition};

/// Receives every animation cue the character emits.
pub trait AnimationCallback {
    fn on_cue(&mut self, cue: &AnimationCue);
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    Reconciled(Reconciliation),
    Motion(MotionEvent),
    RegistryTracked { registry: String, spot_id: String },
    RegistryLost { registry: String },
    TimeSlotChanged { hour: f32, time_id: Option<String> },
    Collision(CollisionEffect),
    ChatSent { message: String },
    ChatReceived(InboundMessage),
}

/// World-space pose of the character, flattened for logs and streaming.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CharacterPose {
    pub position: [f32; 3],
    pub rotation: [f32; 4],
    pub scale: [f32; 3],
    pub yaw: f32,
}

pub struct Session {
    scene: Scene,
    prefabs: PrefabLibrary,
    registries: RegistrySet,
    clock: TimeController,
    default_motion: MotionProfile,
    reconciler: MatchReconciler,
    fallback: Option<NodeId>,
    character_config: CharacterConfig,
    motion: Option<MotionOrchestrator>,
    collision: CollisionNotifier,
    chat: ChatComposer,
    inbox: ChatInbox,
    animation: Option<Box<dyn AnimationCallback>>,
    current_state: String,
    events: Vec<SessionEvent>,
    elapsed: f32,
}

impl Session {
    pub fn new(config: SessionConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let SessionConfig {
            initial_hour,
            time_slots,
            default_motion,
            fallback,
            character,
            prefabs,
            registries: registry_configs,
            collision,
            chat,
        } = config;

        let mut scene = Scene::new();
        let fallback = match fallback {
            Some(pose) => Some(scene.spawn("fallback", None, pose.to_local())),
            None => {
                log::warn!("no fallback anchor configured; the character will not spawn");
                None
            }
        };

        let mut registries = RegistrySet::new();
        for registry in &registry_configs {
            for pair in &registry.pairs {
                for template in [&pair.start, &pair.target] {
                    if let Some(prefab) = template.prefab.as_deref() {
                        if !prefabs.contains(prefab) {
                            log::warn!(
                                "registry {}: spot {} references unknown prefab {prefab}",
                                registry.name,
                                pair.spot_id
                            );
                        }
                    }
                }
            }
            registries.register(registry, &mut scene);
        }

        Ok(Self {
            scene,
            prefabs,
            registries,
            clock: TimeController::new(TimeSlotTable::new(time_slots), initial_hour),
            default_motion,
            reconciler: MatchReconciler::new(),
            fallback,
            character_config: character,
            motion: None,
            collision: CollisionNotifier::new(collision),
            chat: ChatComposer::new(&chat),
            inbox: ChatInbox::new(),
            animation: None,
            current_state: String::new(),
            events: Vec::new(),
            elapsed: 0.0,
        })
    }

    /// Runs the first reconciliation, which spawns the character at the
    /// fallback anchor.
    pub fn start(&mut self) {
        self.reconcile();
    }

    pub fn set_animation_callback(&mut self, callback: Box<dyn AnimationCallback>) {
        self.animation = Some(callback);
    }

    pub fn scene(&self) -> &Scene {
        &self.scene
    }

    /// Mutable scene access for collaborators that place nodes of their own,
    /// such as pre-existing anchors handed to [`Session::adopt_anchor`].
    pub fn scene_mut(&mut self) -> &mut Scene {
        &mut self.scene
    }

    pub fn registries(&self) -> &RegistrySet {
        &self.registries
    }

    pub fn registry_id(&self, name: &str) -> Option<RegistryId> {
        self.registries.lookup(name)
    }

    pub fn elapsed(&self) -> f32 {
        self.elapsed
    }

    pub fn hour(&self) -> f32 {
        self.clock.hour()
    }

    pub fn time_id(&self) -> Option<&str> {
        self.clock.time_id()
    }

    pub fn status_label(&self) -> String {
        self.clock.status_label()
    }

    pub fn banner(&self) -> String {
        self.clock.banner()
    }

    pub fn match_state(&self) -> MatchState {
        self.reconciler.state()
    }

    pub fn motion_phase(&self) -> Option<MotionPhase> {
        self.motion.as_ref().map(MotionOrchestrator::phase)
    }

    pub fn character(&self) -> Option<NodeId> {
        self.motion
            .as_ref()
            .map(MotionOrchestrator::character)
            .filter(|node| self.scene.contains(*node))
    }

    pub fn character_pose(&self) -> Option<CharacterPose> {
        let node = self.character()?;
        let position = self.scene.world_position(node)?;
        let rotation = self.scene.world_rotation(node)?;
        let scale = self.scene.world_scale(node)?;
        Some(CharacterPose {
            position: position.to_array(),
            rotation: rotation.to_array(),
            scale: scale.to_array(),
            yaw: yaw_degrees(rotation),
        })
    }

    /// Name of the last animation state the character was told to play.
    pub fn current_state_name(&self) -> &str {
        &self.current_state
    }

    pub fn collision_message(&self) -> Option<&str> {
        self.collision.message()
    }

    pub fn last_answer(&self) -> &str {
        self.chat.last_answer()
    }

    pub fn input_text(&self) -> &str {
        self.chat.input_text()
    }

    /// Handle producers use to push chat replies and transcripts from other
    /// threads.
    pub fn inbox(&self) -> ChatInbox {
        self.inbox.clone()
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn on_tracking_status(&mut self, registry: &str, status: TrackingStatus) {
        let Some(id) = self.registries.lookup(registry) else {
            log::warn!("tracking status for unknown registry {registry}");
            return;
        };
        let transition =
            self.registries
                .on_tracking_status_changed(id, status, &mut self.scene, &self.prefabs);
        match transition {
            TrackingTransition::Acquired => {
                let spot_id = self
                    .registries
                    .get(id)
                    .map(|registry| registry.current_spot_id().to_string())
                    .unwrap_or_default();
                self.events.push(SessionEvent::RegistryTracked {
                    registry: registry.to_string(),
                    spot_id,
                });
            }
            TrackingTransition::Lost => self.events.push(SessionEvent::RegistryLost {
                registry: registry.to_string(),
            }),
            _ => {}
        }
        if transition.membership_changed() {
            self.reconcile();
        }
    }

    /// Moves a registry's image root, as the tracker does every frame.
    pub fn set_image_pose(&mut self, registry: &str, pose: &PoseConfig) -> bool {
        let Some(root) = self.registry_root(registry) else {
            return false;
        };
        self.scene.set_local(root, pose.to_local())
    }

    /// Shows or hides a registry's image root and everything under it.
    /// Hidden anchors no longer form a live pair, so a visibility change
    /// re-runs reconciliation.
    pub fn set_image_visible(&mut self, registry: &str, visible: bool) -> bool {
        let Some(root) = self.registry_root(registry) else {
            return false;
        };
        let was_visible = self.scene.is_active_in_hierarchy(root);
        if !self.scene.set_active(root, visible) {
            return false;
        }
        if was_visible != self.scene.is_active_in_hierarchy(root) {
            self.reconcile();
        }
        true
    }

    fn registry_root(&self, name: &str) -> Option<NodeId> {
        let root = self
            .registries
            .lookup(name)
            .and_then(|id| self.registries.get(id))
            .map(|registry| registry.root());
        if root.is_none() {
            log::warn!("unknown registry {name}");
        }
        root
    }

    pub fn set_active_spot(&mut self, registry: &str, spot_id: &str) -> bool {
        let changed = match self
            .registries
            .lookup(registry)
            .and_then(|id| self.registries.get_mut(id))
        {
            Some(target) => target.set_active_spot_id(spot_id, &mut self.scene),
            None => {
                log::warn!("unknown registry {registry}");
                false
            }
        };
        if changed {
            self.reconcile();
        }
        changed
    }

    pub fn cycle_next_spot(&mut self, registry: &str) -> bool {
        let changed = match self
            .registries
            .lookup(registry)
            .and_then(|id| self.registries.get_mut(id))
        {
            Some(target) => target.cycle_next_spot(),
            None => {
                log::warn!("unknown registry {registry}");
                false
            }
        };
        if changed {
            self.reconcile();
        }
        changed
    }

    /// Registers an existing scene node as the anchor for a spot role so it
    /// is reused instead of spawned.
    pub fn adopt_anchor(
        &mut self,
        registry: &str,
        spot_id: &str,
        role: AnchorRole,
        node: NodeId,
    ) -> bool {
        if !self.scene.contains(node) {
            return false;
        }
        self.registries
            .lookup(registry)
            .and_then(|id| self.registries.get_mut(id))
            .is_some_and(|target| target.adopt_anchor(spot_id, role, node))
    }

    pub fn set_hour(&mut self, hour: f32) {
        if !self.clock.set_hour(hour) {
            return;
        }
        self.events.push(SessionEvent::TimeSlotChanged {
            hour: self.clock.hour(),
            time_id: self.clock.time_id().map(str::to_string),
        });
        self.reconcile();
    }

    pub fn on_contact(&mut self, phase: ContactPhase, tag: &str) {
        for effect in self.collision.on_contact(phase, tag) {
            self.events.push(SessionEvent::Collision(effect));
        }
    }

    pub fn set_chat_input(&mut self, text: impl Into<String>) {
        self.chat.set_input_text(text);
    }

    pub fn send_chat(&mut self, transport: &mut dyn ChatTransport) -> Result<String, ChatError> {
        let status = self.clock.status_label();
        let message = self.chat.send(transport, &status, &self.current_state)?;
        self.events.push(SessionEvent::ChatSent {
            message: message.clone(),
        });
        Ok(message)
    }

    /// Advances the session by `dt` seconds: inbound chat first, then loss
    /// countdowns, then motion, then transient notices.
    pub fn tick(&mut self, dt: f32) {
        let dt = if dt.is_finite() { dt.max(0.0) } else { 0.0 };
        self.elapsed += dt;

        for message in self.inbox.drain() {
            self.chat.apply_inbound(message.clone());
            self.events.push(SessionEvent::ChatReceived(message));
        }

        let lost = self.registries.tick(dt, &mut self.scene);
        if !lost.is_empty() {
            for id in &lost {
                let registry = self
                    .registries
                    .get(*id)
                    .map(|registry| registry.name().to_string())
                    .unwrap_or_default();
                self.events.push(SessionEvent::RegistryLost { registry });
            }
            self.reconcile();
        }

        if let Some(motion) = self.motion.as_mut() {
            motion.tick(&mut self.scene, dt);
        }
        if self.flush_motion_events() {
            self.reconcile();
        }

        if let Some(effect) = self.collision.tick(dt) {
            self.events.push(SessionEvent::Collision(effect));
        }
        self.chat.tick(dt);
    }

    fn character_status(&self) -> CharacterStatus {
        match &self.motion {
            Some(motion) if self.scene.contains(motion.character()) => CharacterStatus {
                spawned: true,
                at_fallback: motion.is_at_fallback(),
            },
            _ => CharacterStatus {
                spawned: false,
                at_fallback: false,
            },
        }
    }

    fn reconcile(&mut self) {
        let status = self.character_status();
        let reconciliation = self.reconciler.reconcile(
            &self.registries,
            &self.scene,
            self.clock.time_id(),
            status,
        );
        for command in &reconciliation.commands {
            self.execute(command);
        }
        self.events.push(SessionEvent::Reconciled(reconciliation));
        self.flush_motion_events();
    }

    fn execute(&mut self, command: &MotionCommand) {
        log::debug!("motion command {command:?}");
        if *command == MotionCommand::EnsureSpawned {
            self.ensure_spawned();
            return;
        }
        let Some(motion) = self.motion.as_mut() else {
            log::debug!("no character; {command:?} skipped");
            return;
        };
        match command {
            MotionCommand::EnsureSpawned => {}
            MotionCommand::HardCancel => {
                motion.hard_cancel_to_fallback(&mut self.scene);
            }
            MotionCommand::AlignToStart { start } => {
                motion.align_to_start(&mut self.scene, *start);
            }
            MotionCommand::MoveForward {
                start,
                target,
                time_id,
            } => {
                let profile = self.clock.table().motion_profile(time_id, &self.default_motion);
                motion.move_forward(&mut self.scene, *start, *target, &profile);
            }
            MotionCommand::MoveReverse {
                start,
                target,
                time_id,
            } => {
                let profile = self.clock.table().motion_profile(time_id, &self.default_motion);
                motion.move_reverse(&mut self.scene, *start, *target, &profile);
            }
        }
    }

    fn ensure_spawned(&mut self) {
        if self.character_status().spawned {
            return;
        }
        let Some(fallback) = self.fallback else {
            log::warn!("cannot spawn character without a fallback anchor");
            return;
        };
        let Some(prefab) = self.character_config.prefab.as_deref() else {
            log::warn!("cannot spawn character without a prefab");
            return;
        };
        let scale = Vec3::from_array(self.character_config.scale);
        let node = self
            .scene
            .spawn(prefab.to_string(), Some(fallback), LocalTransform::with_scale(scale));
        log::info!("character {prefab} spawned at fallback");
        self.motion = Some(MotionOrchestrator::new(node, Some(fallback), scale));
    }

    /// Forwards pending motion events. Returns true when one of them reports
    /// an anchor that stopped being live.
    fn flush_motion_events(&mut self) -> bool {
        let Some(motion) = self.motion.as_mut() else {
            return false;
        };
        let mut pair_lost = false;
        for event in motion.drain_events() {
            pair_lost |= matches!(
                event,
                MotionEvent::FollowSuspended { .. } | MotionEvent::AnchorLost { .. }
            );
            if let MotionEvent::Animation(cue) = &event {
                self.current_state = cue.state().to_string();
                if let Some(callback) = self.animation.as_mut() {
                    callback.on_cue(cue);
                }
            }
            self.events.push(SessionEvent::Motion(event));
        }
        pair_lost
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use super::*;
    use crate::config::{RegistryConfig, SpotPairConfig};
    use crate::reconciler::Transition;
    use crate::time_slots::TimeSlotRecord;

    const DT: f32 = 1.0 / 30.0;

    fn config() -> SessionConfig {
        let mut desk = RegistryConfig::new(
            "desk",
            vec![
                SpotPairConfig::at("A", [0.0, 0.0, 0.0], [1.0, 0.0, 0.0]),
                SpotPairConfig::at("B", [0.0, 0.0, 1.0], [-1.0, 0.0, 1.0]),
            ],
        );
        desk.pose = PoseConfig::at([0.0, 0.0, 2.0]);
        desk.lost_clear_delay_secs = 1.0;
        SessionConfig {
            initial_hour: 15.0,
            time_slots: vec![
                TimeSlotRecord::new("A", "08:00", "12:00"),
                TimeSlotRecord::new("B", "22:00", "06:00"),
            ],
            registries: vec![desk],
            ..SessionConfig::default()
        }
    }

    fn started() -> Session {
        let mut session = Session::new(config()).unwrap();
        session.start();
        session
    }

    fn run_until(session: &mut Session, max_secs: f32, done: impl Fn(&Session) -> bool) -> bool {
        let mut elapsed = 0.0;
        while elapsed < max_secs {
            if done(session) {
                return true;
            }
            session.tick(DT);
            elapsed += DT;
        }
        done(session)
    }

    fn position(session: &Session) -> Vec3 {
        Vec3::from_array(session.character_pose().unwrap().position)
    }

    fn is_following(session: &Session) -> bool {
        matches!(session.motion_phase(), Some(MotionPhase::Following { .. }))
    }

    struct Recorder(Rc<RefCell<Vec<String>>>);

    impl AnimationCallback for Recorder {
        fn on_cue(&mut self, cue: &AnimationCue) {
            self.0.borrow_mut().push(cue.state().to_string());
        }
    }

    #[test]
    fn start_spawns_character_at_fallback() {
        let session = started();
        assert_eq!(session.motion_phase(), Some(MotionPhase::AtFallback));
        let pose = session.character_pose().unwrap();
        assert_eq!(pose.position, [0.0; 3]);
        assert_eq!(pose.scale, [0.5; 3]);
        assert_eq!(session.status_label(), "15:00 - -");
    }

    #[test]
    fn missing_fallback_leaves_character_unspawned() {
        let mut session = Session::new(SessionConfig {
            fallback: None,
            ..config()
        })
        .unwrap();
        session.start();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        session.tick(DT);
        assert!(session.character().is_none());
    }

    #[test]
    fn walks_follows_then_reverses_home() {
        let mut session = started();
        let cues = Rc::new(RefCell::new(Vec::new()));
        session.set_animation_callback(Box::new(Recorder(cues.clone())));

        session.on_tracking_status("desk", TrackingStatus::Tracked);
        assert_eq!(session.match_state(), MatchState::Unmatched);

        session.set_hour(9.0);
        assert_eq!(session.match_state(), MatchState::Matched);
        assert_eq!(session.current_state_name(), "drawfwalk");
        assert!(position(&session).abs_diff_eq(Vec3::new(0.0, 0.0, 2.0), 1e-4));

        assert!(run_until(&mut session, 5.0, is_following));
        assert!(position(&session).abs_diff_eq(Vec3::new(1.0, 0.0, 2.0), 0.07));
        assert_eq!(session.current_state_name(), "run");

        session.set_image_pose("desk", &PoseConfig::at([0.0, 0.0, 3.0]));
        session.tick(DT);
        assert!(position(&session).abs_diff_eq(Vec3::new(1.0, 0.0, 3.0), 1e-4));

        session.set_hour(23.0);
        assert_eq!(session.match_state(), MatchState::Unmatched);
        assert_eq!(session.motion_phase(), Some(MotionPhase::MovingReverse));

        assert!(run_until(&mut session, 5.0, |s| {
            s.motion_phase() == Some(MotionPhase::AtFallback)
        }));
        let pose = session.character_pose().unwrap();
        assert!(Vec3::from_array(pose.position).abs_diff_eq(Vec3::ZERO, 1e-5));
        assert_eq!(pose.scale, [0.5; 3]);
        assert_eq!(
            cues.borrow().as_slice(),
            ["drawfwalk", "run", "drawfwalk", "run"]
        );

        let transitions: Vec<_> = session
            .drain_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::Reconciled(reconciliation) => Some(reconciliation.transition),
                _ => None,
            })
            .collect();
        assert_eq!(
            transitions,
            vec![
                Transition::UnmatchedToUnmatched,
                Transition::UnmatchedToUnmatched,
                Transition::UnmatchedToMatched,
                Transition::MatchedToUnmatched,
            ]
        );
    }

    #[test]
    fn tracking_flicker_does_not_interrupt_walk() {
        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        session.tick(DT);

        session.on_tracking_status("desk", TrackingStatus::NoPose);
        session.tick(0.5);
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        assert_eq!(session.match_state(), MatchState::Matched);
        assert!(run_until(&mut session, 5.0, is_following));
    }

    #[test]
    fn lost_image_returns_character_home() {
        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        assert!(run_until(&mut session, 5.0, is_following));

        session.on_tracking_status("desk", TrackingStatus::NoPose);
        session.tick(0.5);
        assert_eq!(session.match_state(), MatchState::Matched);
        session.tick(0.6);
        assert_eq!(session.match_state(), MatchState::Unmatched);
        assert_eq!(session.motion_phase(), Some(MotionPhase::AtFallback));
        assert!(position(&session).abs_diff_eq(Vec3::ZERO, 1e-5));
        let lost = session.drain_events().into_iter().any(|event| {
            matches!(event, SessionEvent::RegistryLost { registry } if registry == "desk")
        });
        assert!(lost);
    }

    #[test]
    fn switching_picture_mid_walk_hard_cancels() {
        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        session.tick(DT);
        assert_eq!(session.motion_phase(), Some(MotionPhase::MovingForward));

        assert!(session.cycle_next_spot("desk"));
        assert_eq!(session.motion_phase(), Some(MotionPhase::AtFallback));
        for _ in 0..10 {
            session.tick(DT);
        }
        assert!(position(&session).abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    fn spot_anchor(session: &Session, spot_id: &str, role: AnchorRole) -> NodeId {
        let id = session.registry_id("desk").unwrap();
        session
            .registries()
            .get(id)
            .unwrap()
            .anchor(spot_id, role)
            .unwrap()
    }

    fn assert_home(session: &Session) {
        assert_eq!(session.match_state(), MatchState::Unmatched);
        assert_eq!(session.motion_phase(), Some(MotionPhase::AtFallback));
        assert!(position(session).abs_diff_eq(Vec3::ZERO, 1e-5));
    }

    #[test]
    fn hidden_follow_target_sends_character_home() {
        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        assert!(run_until(&mut session, 5.0, is_following));

        let target = spot_anchor(&session, "A", AnchorRole::Target);
        session.scene_mut().set_active(target, false);
        session.drain_events();
        session.tick(DT);

        assert_home(&session);
        let events = session.drain_events();
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::Motion(MotionEvent::FollowSuspended { .. })
        )));
        assert!(events.iter().any(|event| matches!(
            event,
            SessionEvent::Reconciled(Reconciliation {
                transition: Transition::MatchedToUnmatched,
                ..
            })
        )));
    }

    #[test]
    fn hiding_image_while_following_returns_home() {
        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        assert!(run_until(&mut session, 5.0, is_following));

        assert!(session.set_image_visible("desk", false));
        for _ in 0..60 {
            session.tick(DT);
        }
        assert_home(&session);

        assert!(session.set_image_visible("desk", true));
        assert_eq!(session.match_state(), MatchState::Matched);
        assert!(run_until(&mut session, 5.0, is_following));
    }

    #[test]
    fn destroyed_target_mid_walk_returns_home() {
        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.0);
        session.tick(DT);
        assert_eq!(session.motion_phase(), Some(MotionPhase::MovingForward));

        let target = spot_anchor(&session, "A", AnchorRole::Target);
        session.scene_mut().despawn(target);
        for _ in 0..200 {
            session.tick(DT);
        }
        assert_home(&session);
        assert_eq!(session.scene().world_position(target), None);
    }

    #[test]
    fn chat_uses_status_and_state() {
        struct Loopback(Vec<String>);
        impl ChatTransport for Loopback {
            fn is_connected(&self) -> bool {
                true
            }
            fn send(&mut self, message: &str) -> Result<(), ChatError> {
                self.0.push(message.to_string());
                Ok(())
            }
        }

        let mut session = started();
        session.on_tracking_status("desk", TrackingStatus::Tracked);
        session.set_hour(9.5);
        session.set_chat_input("hello");
        let mut transport = Loopback(Vec::new());
        let sent = session.send_chat(&mut transport).unwrap();
        assert_eq!(sent, "09:30 - A | drawfwalk | hello");

        session.inbox().push(InboundMessage::Answer("hi there".to_string()));
        assert_eq!(session.last_answer(), "");
        session.tick(DT);
        assert_eq!(session.last_answer(), "hi there");
    }

    #[test]
    fn collision_message_times_out() {
        let mut session = started();
        session.on_contact(ContactPhase::Enter, "Collision");
        assert!(session.collision_message().is_some());
        session.tick(5.0);
        assert!(session.collision_message().is_none());
    }
}
