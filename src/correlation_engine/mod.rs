//! CorrelationEngine - Weapon to Face Association
//!
//! Picks, for every weapon box, the nearest face box whose center lies within
//! the correlation threshold. A face is claimed by at most one weapon; weapons
//! are served in the order given.

use crate::models::BoundingBox;

/// Spatial weapon/face correlator
#[derive(Debug, Clone, Copy)]
pub struct CorrelationEngine {
    threshold: f32,
}

impl CorrelationEngine {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    /// Shooter face boxes, in weapon order, without duplicates
    pub fn correlate(&self, weapon_boxes: &[BoundingBox], face_boxes: &[BoundingBox]) -> Vec<BoundingBox> {
        let mut claimed = vec![false; face_boxes.len()];
        let mut shooters = Vec::new();

        for weapon in weapon_boxes {
            let mut best: Option<(usize, f32)> = None;

            for (idx, face) in face_boxes.iter().enumerate() {
                if claimed[idx] {
                    continue;
                }
                let distance = weapon.center_distance(face);
                if distance >= self.threshold {
                    continue;
                }
                // strict `<` keeps the earliest face on equal distance
                if best.map_or(true, |(_, d)| distance < d) {
                    best = Some((idx, distance));
                }
            }

            if let Some((idx, distance)) = best {
                tracing::debug!(distance = distance, face_index = idx, "Shooter candidate selected");
                claimed[idx] = true;
                shooters.push(face_boxes[idx]);
            }
        }

        shooters
    }
}

impl Default for CorrelationEngine {
    fn default() -> Self {
        Self::new(400.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 10x10 box centered on (cx, cy)
    fn centered(cx: f32, cy: f32) -> BoundingBox {
        BoundingBox::new(cx - 5.0, cy - 5.0, cx + 5.0, cy + 5.0)
    }

    #[test]
    fn test_nearest_face_wins() {
        let engine = CorrelationEngine::new(400.0);
        let weapon = centered(500.0, 500.0);
        let near = centered(600.0, 500.0); // 100
        let far = centered(500.0, 750.0); // 250

        let shooters = engine.correlate(&[weapon], &[far, near]);
        assert_eq!(shooters, vec![near]);
    }

    #[test]
    fn test_nothing_within_threshold() {
        let engine = CorrelationEngine::new(400.0);
        let shooters = engine.correlate(&[centered(0.0, 0.0)], &[centered(400.0, 0.0), centered(0.0, 900.0)]);
        assert!(shooters.is_empty());
    }

    #[test]
    fn test_face_claimed_once_first_weapon_wins() {
        let engine = CorrelationEngine::new(400.0);
        let w1 = centered(100.0, 100.0);
        let w2 = centered(120.0, 100.0);
        let shared = centered(110.0, 100.0);
        let other = centered(300.0, 100.0);

        let shooters = engine.correlate(&[w1, w2], &[shared, other]);
        // w1 takes the shared face, w2 falls back to the next nearest
        assert_eq!(shooters, vec![shared, other]);
    }

    #[test]
    fn test_second_weapon_without_free_face() {
        let engine = CorrelationEngine::new(400.0);
        let face = centered(10.0, 10.0);
        let shooters = engine.correlate(&[centered(0.0, 0.0), centered(20.0, 20.0)], &[face]);
        assert_eq!(shooters, vec![face]);
    }

    #[test]
    fn test_empty_inputs() {
        let engine = CorrelationEngine::default();
        assert!(engine.correlate(&[], &[centered(0.0, 0.0)]).is_empty());
        assert!(engine.correlate(&[centered(0.0, 0.0)], &[]).is_empty());
    }
}
