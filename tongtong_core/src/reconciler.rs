//! Matched/unmatched state machine over (tracked image, time slot).
//!
//! The reconciler never touches the scene. Each invocation inspects the
//! tracked registries, decides which of the four transitions applies, and
//! returns the motion commands the session must execute in order.

use serde::Serialize;

use crate::scene::{NodeId, Scene};
use crate::tracking::{RegistryId, RegistrySet, TrackedTargetRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchState {
    Matched,
    Unmatched,
}

/// Last known matched pair. Exists only while the reconciler is matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MatchSnapshot {
    pub registry: RegistryId,
    pub picture_id: String,
    pub time_id: String,
    pub start: NodeId,
    pub target: NodeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub registry: RegistryId,
    pub picture_id: String,
    pub start: NodeId,
    pub target: NodeId,
}

/// Picks the registry to act on. A tracked registry whose active spot names
/// the time slot wins; otherwise the lowest-id tracked registry that exposes
/// a live pair.
pub fn select_candidate(
    registries: &RegistrySet,
    scene: &Scene,
    time_id: Option<&str>,
) -> Option<Candidate> {
    let to_candidate = |registry: &TrackedTargetRegistry| {
        registry.live_pair(scene).map(|pair| Candidate {
            registry: registry.id(),
            picture_id: registry.current_spot_id().to_string(),
            start: pair.start,
            target: pair.target,
        })
    };

    if let Some(time_id) = time_id {
        let exact = registries
            .tracked()
            .filter(|registry| registry.current_spot_id().eq_ignore_ascii_case(time_id))
            .find_map(to_candidate);
        if exact.is_some() {
            return exact;
        }
    }
    registries.tracked().find_map(to_candidate)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum MotionCommand {
    EnsureSpawned,
    HardCancel,
    AlignToStart {
        start: NodeId,
    },
    MoveForward {
        start: NodeId,
        target: NodeId,
        time_id: String,
    },
    MoveReverse {
        start: NodeId,
        target: NodeId,
        time_id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Transition {
    MatchedToMatched,
    MatchedToUnmatched,
    UnmatchedToMatched,
    UnmatchedToUnmatched,
}

impl Transition {
    fn between(was_matched: bool, now_matched: bool) -> Self {
        match (was_matched, now_matched) {
            (true, true) => Transition::MatchedToMatched,
            (true, false) => Transition::MatchedToUnmatched,
            (false, true) => Transition::UnmatchedToMatched,
            (false, false) => Transition::UnmatchedToUnmatched,
        }
    }
}

/// What the reconciler needs to know about the character besides the
/// registries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CharacterStatus {
    pub spawned: bool,
    pub at_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Reconciliation {
    pub transition: Transition,
    pub time_id: Option<String>,
    pub picture_id: Option<String>,
    pub commands: Vec<MotionCommand>,
}

#[derive(Debug, Clone)]
pub struct MatchReconciler {
    state: MatchState,
    snapshot: Option<MatchSnapshot>,
}

impl Default for MatchReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchReconciler {
    pub fn new() -> Self {
        Self {
            state: MatchState::Unmatched,
            snapshot: None,
        }
    }

    pub fn state(&self) -> MatchState {
        self.state
    }

    pub fn snapshot(&self) -> Option<&MatchSnapshot> {
        self.snapshot.as_ref()
    }

    pub fn reconcile(
        &mut self,
        registries: &RegistrySet,
        scene: &Scene,
        time_id: Option<&str>,
        character: CharacterStatus,
    ) -> Reconciliation {
        let candidate = select_candidate(registries, scene, time_id);
        let now_matched = match (&candidate, time_id) {
            (Some(candidate), Some(time_id)) => candidate.picture_id.eq_ignore_ascii_case(time_id),
            _ => false,
        };
        let transition = Transition::between(self.state == MatchState::Matched, now_matched);

        let mut commands = Vec::new();
        if !character.spawned && transition != Transition::MatchedToMatched {
            commands.push(MotionCommand::EnsureSpawned);
        }

        match transition {
            Transition::MatchedToMatched => {
                if let (Some(candidate), Some(time_id)) = (&candidate, time_id) {
                    self.store_snapshot(candidate, time_id);
                }
            }
            Transition::MatchedToUnmatched => {
                let snapshot = self.snapshot.take();
                let current_picture = candidate.as_ref().map(|c| c.picture_id.as_str());
                match snapshot {
                    Some(snapshot)
                        if !picture_changed(&snapshot, current_picture)
                            && scene.is_active_in_hierarchy(snapshot.start)
                            && scene.is_active_in_hierarchy(snapshot.target) =>
                    {
                        commands.push(MotionCommand::MoveReverse {
                            start: snapshot.start,
                            target: snapshot.target,
                            time_id: snapshot.time_id,
                        });
                    }
                    _ => commands.push(MotionCommand::HardCancel),
                }
                self.state = MatchState::Unmatched;
            }
            Transition::UnmatchedToMatched => match (&candidate, time_id) {
                (Some(candidate), Some(time_id))
                    if scene.is_active_in_hierarchy(candidate.start)
                        && scene.is_active_in_hierarchy(candidate.target) =>
                {
                    commands.push(MotionCommand::AlignToStart {
                        start: candidate.start,
                    });
                    commands.push(MotionCommand::MoveForward {
                        start: candidate.start,
                        target: candidate.target,
                        time_id: time_id.to_string(),
                    });
                    self.store_snapshot(candidate, time_id);
                    self.state = MatchState::Matched;
                }
                _ => {
                    commands.push(MotionCommand::HardCancel);
                    self.snapshot = None;
                }
            },
            Transition::UnmatchedToUnmatched => {
                if !(character.spawned && character.at_fallback) {
                    commands.push(MotionCommand::HardCancel);
                }
                self.snapshot = None;
            }
        }

        log::debug!(
            "reconcile {:?}: time={} picture={} commands={}",
            transition,
            time_id.unwrap_or("-"),
            candidate
                .as_ref()
                .map(|c| c.picture_id.as_str())
                .unwrap_or("none"),
            commands.len()
        );

        Reconciliation {
            transition,
            time_id: time_id.map(str::to_string),
            picture_id: candidate.map(|c| c.picture_id),
            commands,
        }
    }

    fn store_snapshot(&mut self, candidate: &Candidate, time_id: &str) {
        self.snapshot = Some(MatchSnapshot {
            registry: candidate.registry,
            picture_id: candidate.picture_id.clone(),
            time_id: time_id.to_string(),
            start: candidate.start,
            target: candidate.target,
        });
    }
}

fn picture_changed(snapshot: &MatchSnapshot, current: Option<&str>) -> bool {
    match current {
        Some(current) => !snapshot.picture_id.eq_ignore_ascii_case(current),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PrefabLibrary, RegistryConfig, SpotPairConfig};
    use crate::tracking::TrackingStatus;

    const AT_HOME: CharacterStatus = CharacterStatus {
        spawned: true,
        at_fallback: true,
    };
    const AWAY: CharacterStatus = CharacterStatus {
        spawned: true,
        at_fallback: false,
    };

    struct Fixture {
        scene: Scene,
        registries: RegistrySet,
        prefabs: PrefabLibrary,
        desk: RegistryId,
        shelf: RegistryId,
    }

    impl Fixture {
        fn new() -> Self {
            let mut scene = Scene::new();
            let mut registries = RegistrySet::new();
            let mut desk = RegistryConfig::new(
                "desk",
                vec![SpotPairConfig::new("A"), SpotPairConfig::new("B")],
            );
            desk.lost_clear_delay_secs = 0.0;
            let mut shelf = RegistryConfig::new("shelf", vec![SpotPairConfig::new("C")]);
            shelf.lost_clear_delay_secs = 0.0;
            let desk = registries.register(&desk, &mut scene);
            let shelf = registries.register(&shelf, &mut scene);
            Self {
                scene,
                registries,
                prefabs: PrefabLibrary::default(),
                desk,
                shelf,
            }
        }

        fn track(&mut self, id: RegistryId, status: TrackingStatus) {
            self.registries
                .on_tracking_status_changed(id, status, &mut self.scene, &self.prefabs);
        }

        fn select(&mut self, id: RegistryId, spot: &str) {
            self.registries
                .get_mut(id)
                .unwrap()
                .set_active_spot_id(spot, &mut self.scene);
        }

        fn run(
            &self,
            reconciler: &mut MatchReconciler,
            time_id: Option<&str>,
            character: CharacterStatus,
        ) -> Reconciliation {
            reconciler.reconcile(&self.registries, &self.scene, time_id, character)
        }
    }

    fn matched(fixture: &mut Fixture) -> MatchReconciler {
        fixture.track(fixture.desk, TrackingStatus::Tracked);
        let mut reconciler = MatchReconciler::new();
        let result = fixture.run(&mut reconciler, Some("A"), AT_HOME);
        assert_eq!(result.transition, Transition::UnmatchedToMatched);
        reconciler
    }

    #[test]
    fn unmatched_to_matched_aligns_then_walks() {
        let mut fixture = Fixture::new();
        fixture.track(fixture.desk, TrackingStatus::Tracked);
        let pair = fixture
            .registries
            .get(fixture.desk)
            .unwrap()
            .live_pair(&fixture.scene)
            .unwrap();

        let mut reconciler = MatchReconciler::new();
        let result = fixture.run(&mut reconciler, Some("a"), AT_HOME);
        assert_eq!(result.transition, Transition::UnmatchedToMatched);
        assert_eq!(
            result.commands,
            vec![
                MotionCommand::AlignToStart { start: pair.start },
                MotionCommand::MoveForward {
                    start: pair.start,
                    target: pair.target,
                    time_id: "a".to_string(),
                },
            ]
        );
        assert_eq!(reconciler.state(), MatchState::Matched);
        let snapshot = reconciler.snapshot().unwrap();
        assert_eq!(snapshot.picture_id, "A");
        assert_eq!(snapshot.registry, fixture.desk);
    }

    #[test]
    fn matched_to_matched_only_refreshes_snapshot() {
        let mut fixture = Fixture::new();
        let mut reconciler = matched(&mut fixture);
        let result = fixture.run(&mut reconciler, Some("A"), AWAY);
        assert_eq!(result.transition, Transition::MatchedToMatched);
        assert!(result.commands.is_empty());
        assert!(reconciler.snapshot().is_some());
    }

    #[test]
    fn time_change_on_same_picture_reverses() {
        let mut fixture = Fixture::new();
        let mut reconciler = matched(&mut fixture);
        let snapshot = reconciler.snapshot().cloned().unwrap();

        let result = fixture.run(&mut reconciler, Some("B"), AWAY);
        assert_eq!(result.transition, Transition::MatchedToUnmatched);
        assert_eq!(
            result.commands,
            vec![MotionCommand::MoveReverse {
                start: snapshot.start,
                target: snapshot.target,
                time_id: "A".to_string(),
            }]
        );
        assert_eq!(reconciler.state(), MatchState::Unmatched);
        assert!(reconciler.snapshot().is_none());
    }

    #[test]
    fn picture_change_hard_cancels() {
        let mut fixture = Fixture::new();
        let mut reconciler = matched(&mut fixture);
        fixture.select(fixture.desk, "B");

        let result = fixture.run(&mut reconciler, Some("A"), AWAY);
        assert_eq!(result.transition, Transition::MatchedToUnmatched);
        assert_eq!(result.commands, vec![MotionCommand::HardCancel]);
    }

    #[test]
    fn losing_tracking_hard_cancels() {
        let mut fixture = Fixture::new();
        let mut reconciler = matched(&mut fixture);
        fixture.track(fixture.desk, TrackingStatus::NoPose);

        let result = fixture.run(&mut reconciler, Some("A"), AWAY);
        assert_eq!(result.transition, Transition::MatchedToUnmatched);
        assert_eq!(result.picture_id, None);
        assert_eq!(result.commands, vec![MotionCommand::HardCancel]);
    }

    #[test]
    fn hidden_image_counts_as_lost_pair() {
        let mut fixture = Fixture::new();
        let mut reconciler = matched(&mut fixture);
        let root = fixture.registries.get(fixture.desk).unwrap().root();
        fixture.scene.set_active(root, false);

        let result = fixture.run(&mut reconciler, Some("A"), AWAY);
        assert_eq!(result.transition, Transition::MatchedToUnmatched);
        assert_eq!(result.picture_id, None);
        assert_eq!(result.commands, vec![MotionCommand::HardCancel]);
        assert_eq!(reconciler.state(), MatchState::Unmatched);
    }

    #[test]
    fn unmatched_to_unmatched_settles() {
        let fixture = Fixture::new();
        let mut reconciler = MatchReconciler::new();

        let first = fixture.run(
            &mut reconciler,
            Some("A"),
            CharacterStatus {
                spawned: false,
                at_fallback: false,
            },
        );
        assert_eq!(first.transition, Transition::UnmatchedToUnmatched);
        assert_eq!(
            first.commands,
            vec![MotionCommand::EnsureSpawned, MotionCommand::HardCancel]
        );

        let second = fixture.run(&mut reconciler, Some("A"), AT_HOME);
        assert!(second.commands.is_empty());
        let away = fixture.run(&mut reconciler, None, AWAY);
        assert_eq!(away.commands, vec![MotionCommand::HardCancel]);
    }

    #[test]
    fn repeated_reconcile_is_idempotent() {
        let mut fixture = Fixture::new();
        let mut reconciler = matched(&mut fixture);
        for _ in 0..3 {
            assert!(fixture.run(&mut reconciler, Some("A"), AWAY).commands.is_empty());
        }

        fixture.run(&mut reconciler, Some("B"), AWAY);
        for _ in 0..3 {
            assert!(fixture.run(&mut reconciler, Some("B"), AT_HOME).commands.is_empty());
        }
    }

    #[test]
    fn exact_match_beats_registry_order() {
        let mut fixture = Fixture::new();
        fixture.track(fixture.desk, TrackingStatus::Tracked);
        fixture.track(fixture.shelf, TrackingStatus::Tracked);

        let exact = select_candidate(&fixture.registries, &fixture.scene, Some("C")).unwrap();
        assert_eq!(exact.registry, fixture.shelf);

        let fallback = select_candidate(&fixture.registries, &fixture.scene, Some("Z")).unwrap();
        assert_eq!(fallback.registry, fixture.desk);
        assert_eq!(fallback.picture_id, "A");

        let no_slot = select_candidate(&fixture.registries, &fixture.scene, None).unwrap();
        assert_eq!(no_slot.registry, fixture.desk);
    }

    #[test]
    fn no_slot_never_matches() {
        let mut fixture = Fixture::new();
        fixture.track(fixture.desk, TrackingStatus::Tracked);
        let mut reconciler = MatchReconciler::new();
        let result = fixture.run(&mut reconciler, None, AWAY);
        assert_eq!(result.transition, Transition::UnmatchedToUnmatched);
        assert_eq!(result.picture_id.as_deref(), Some("A"));
    }
}
