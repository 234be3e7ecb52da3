pub mod chat;
pub mod collision;
pub mod config;
pub mod motion;
pub mod reconciler;
pub mod scene;
pub mod session;
pub mod time_slots;
pub mod tracking;

pub use chat::{
    compose_message, ChatComposer, ChatError, ChatInbox, ChatTransport, InboundMessage,
};
pub use collision::{CollisionEffect, CollisionNotifier, ContactPhase};
pub use config::{ConfigError, PoseConfig, RegistryConfig, SessionConfig, SpotPairConfig};
pub use motion::{
    AnimationCue, MotionEvent, MotionOrchestrator, MotionPhase, MotionProfile, MotionToken,
};
pub use reconciler::{MatchReconciler, MatchState, MotionCommand, Reconciliation, Transition};
pub use scene::{LocalTransform, NodeId, Scene};
pub use session::{AnimationCallback, CharacterPose, Session, SessionEvent};
pub use time_slots::{TimeController, TimeSlotRecord, TimeSlotTable};
pub use tracking::{AnchorRole, RegistryId, RegistrySet, TrackingPolicy, TrackingStatus};
