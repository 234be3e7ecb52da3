//! Transient "bumped into something" notices driven by contact events.

use serde::{Deserialize, Serialize};

use crate::config::CollisionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContactPhase {
    Enter,
    Stay,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "effect", rename_all = "snake_case")]
pub enum CollisionEffect {
    ShowMessage { text: String, display_secs: f32 },
    PlayClip { clip: String },
    ClearMessage,
}

#[derive(Debug, Clone)]
pub struct CollisionNotifier {
    config: CollisionConfig,
    clock: f32,
    inside: bool,
    last_trigger: Option<f32>,
    message: Option<String>,
    message_remaining: Option<f32>,
}

impl CollisionNotifier {
    pub fn new(config: CollisionConfig) -> Self {
        Self {
            config,
            clock: 0.0,
            inside: false,
            last_trigger: None,
            message: None,
            message_remaining: None,
        }
    }

    /// Message currently on screen, if any.
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    fn accepts(&self, tag: &str) -> bool {
        self.config.trigger_tag.is_empty() || self.config.trigger_tag == tag
    }

    pub fn on_contact(&mut self, phase: ContactPhase, tag: &str) -> Vec<CollisionEffect> {
        if !self.accepts(tag) {
            return Vec::new();
        }
        match phase {
            ContactPhase::Enter => {
                self.inside = true;
                self.trigger()
            }
            ContactPhase::Stay => {
                if !self.inside {
                    return Vec::new();
                }
                let due = self
                    .last_trigger
                    .map_or(true, |last| self.clock - last >= self.config.retrigger_secs);
                if due {
                    self.trigger()
                } else {
                    Vec::new()
                }
            }
            ContactPhase::Exit => {
                self.inside = false;
                Vec::new()
            }
        }
    }

    fn trigger(&mut self) -> Vec<CollisionEffect> {
        self.last_trigger = Some(self.clock);
        self.message = Some(self.config.message.clone());
        self.message_remaining =
            (self.config.display_secs > 0.0).then_some(self.config.display_secs);
        log::debug!("collision notice shown");

        let mut effects = vec![CollisionEffect::ShowMessage {
            text: self.config.message.clone(),
            display_secs: self.config.display_secs,
        }];
        if let Some(clip) = &self.config.clip {
            effects.push(CollisionEffect::PlayClip { clip: clip.clone() });
        }
        effects
    }

    pub fn tick(&mut self, dt: f32) -> Option<CollisionEffect> {
        self.clock += dt;
        let remaining = self.message_remaining.as_mut()?;
        *remaining -= dt;
        if *remaining > 0.0 {
            return None;
        }
        self.message_remaining = None;
        self.message = None;
        Some(CollisionEffect::ClearMessage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn notifier() -> CollisionNotifier {
        CollisionNotifier::new(CollisionConfig {
            clip: Some("bump".to_string()),
            display_secs: 2.0,
            retrigger_secs: 0.5,
            ..CollisionConfig::default()
        })
    }

    #[test]
    fn ignores_other_tags() {
        let mut notifier = notifier();
        assert!(notifier.on_contact(ContactPhase::Enter, "Floor").is_empty());
        assert!(notifier.message().is_none());
    }

    #[test]
    fn enter_shows_message_and_plays_clip() {
        let mut notifier = notifier();
        let effects = notifier.on_contact(ContactPhase::Enter, "Collision");
        assert_eq!(effects.len(), 2);
        assert_eq!(
            effects[1],
            CollisionEffect::PlayClip {
                clip: "bump".to_string()
            }
        );
        assert!(notifier.message().is_some());
        assert_eq!(notifier.tick(1.0), None);
        assert_eq!(notifier.tick(1.0), Some(CollisionEffect::ClearMessage));
        assert!(notifier.message().is_none());
    }

    #[test]
    fn stay_retriggers_at_most_every_interval() {
        let mut notifier = notifier();
        notifier.on_contact(ContactPhase::Enter, "Collision");
        notifier.tick(0.25);
        assert!(notifier.on_contact(ContactPhase::Stay, "Collision").is_empty());
        notifier.tick(0.25);
        assert!(!notifier.on_contact(ContactPhase::Stay, "Collision").is_empty());
        assert!(notifier.on_contact(ContactPhase::Stay, "Collision").is_empty());

        notifier.on_contact(ContactPhase::Exit, "Collision");
        notifier.tick(1.0);
        assert!(notifier.on_contact(ContactPhase::Stay, "Collision").is_empty());
    }

    #[test]
    fn zero_display_time_keeps_message() {
        let mut notifier = CollisionNotifier::new(CollisionConfig {
            display_secs: 0.0,
            ..CollisionConfig::default()
        });
        notifier.on_contact(ContactPhase::Enter, "Collision");
        assert_eq!(notifier.tick(100.0), None);
        assert!(notifier.message().is_some());
    }
}
