use std::{cell::RefCell, rc::Rc};

use serde::Serialize;
use tongtong_core::{AnimationCallback, AnimationCue};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AnimationRecord {
    pub time: f32,
    #[serde(flatten)]
    pub cue: AnimationCue,
}

/// Stands in for the animator: remembers every cue with the simulation time
/// it was issued at.
#[derive(Clone, Default)]
pub struct RecordingAnimationCallback {
    clock: Rc<RefCell<f32>>,
    records: Rc<RefCell<Vec<AnimationRecord>>>,
}

impl RecordingAnimationCallback {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, time: f32) {
        *self.clock.borrow_mut() = time;
    }

    pub fn records(&self) -> Vec<AnimationRecord> {
        self.records.borrow().clone()
    }
}

impl AnimationCallback for RecordingAnimationCallback {
    fn on_cue(&mut self, cue: &AnimationCue) {
        log::debug!("animation cue {cue:?}");
        let time = *self.clock.borrow();
        self.records.borrow_mut().push(AnimationRecord {
            time,
            cue: cue.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_record() {
        let recorder = RecordingAnimationCallback::new();
        let mut handle = recorder.clone();
        recorder.set_time(1.5);
        handle.on_cue(&AnimationCue::Play {
            state: "drawfwalk".to_string(),
        });
        let records = recorder.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].time, 1.5);
        assert_eq!(records[0].cue.state(), "drawfwalk");
    }
}
