//! Target selection over a detection set
//!
//! Candidates are ranked by label priority first and box area second. A label
//! earlier in the priority list always beats a later one, whatever the areas.
//! Equal-ranked candidates resolve to the first one seen.

use crate::messages::Detection;

/// Pick at most one detection to track
pub fn select<S: AsRef<str>>(detections: &[Detection], label_priority: &[S]) -> Option<Detection> {
    let mut best: Option<(&Detection, (usize, f64))> = None;

    for detection in detections {
        let Some(rank) = priority_rank(&detection.label, label_priority) else {
            continue;
        };
        let key = (rank, finite_area(detection));

        let replace = match best {
            None => true,
            Some((_, best_key)) => outranks(key, best_key),
        };
        if replace {
            best = Some((detection, key));
        }
    }

    best.map(|(detection, _)| detection.clone())
}

/// `len - index` for labels in the list, `None` otherwise
pub fn priority_rank<S: AsRef<str>>(label: &str, label_priority: &[S]) -> Option<usize> {
    label_priority
        .iter()
        .position(|l| l.as_ref() == label)
        .map(|index| label_priority.len() - index)
}

fn finite_area(detection: &Detection) -> f64 {
    let area = detection.area();
    if area.is_finite() {
        area
    } else {
        0.0
    }
}

fn outranks(candidate: (usize, f64), best: (usize, f64)) -> bool {
    candidate.0 > best.0 || (candidate.0 == best.0 && candidate.1 > best.1)
}

/// Selector bound to a fixed priority list
#[derive(Debug, Clone)]
pub struct TargetSelector {
    labels: Vec<String>,
}

impl TargetSelector {
    pub fn new(labels: Vec<String>) -> Self {
        Self { labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn select(&self, detections: &[Detection]) -> Option<Detection> {
        select(detections, &self.labels)
    }

    pub fn priority_rank(&self, label: &str) -> Option<usize> {
        priority_rank(label, &self.labels)
    }
}
