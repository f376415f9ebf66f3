//! Consecutive-frame weapon debounce

/// Fires once a weapon has been seen on `required` consecutive sampled frames.
/// A miss resets the streak.
#[derive(Debug, Clone)]
pub struct WeaponDebouncer {
    required: u32,
    streak: u32,
}

impl WeaponDebouncer {
    pub fn new(required: u32) -> Self {
        Self {
            required: required.max(1),
            streak: 0,
        }
    }

    /// Feed one sampled frame. Every hit at or past the threshold counts as a
    /// corroborated detection.
    pub fn observe(&mut self, weapon_seen: bool) -> bool {
        if weapon_seen {
            self.streak = self.streak.saturating_add(1);
            self.streak >= self.required
        } else {
            self.streak = 0;
            false
        }
    }

    pub fn streak(&self) -> u32 {
        self.streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fired(frames: &[bool]) -> Vec<bool> {
        let mut d = WeaponDebouncer::new(5);
        frames.iter().map(|f| d.observe(*f)).collect()
    }

    #[test]
    fn test_fires_on_fifth_consecutive_hit() {
        let out = fired(&[true; 6]);
        assert_eq!(out, vec![false, false, false, false, true, true]);
    }

    #[test]
    fn test_miss_resets_streak() {
        let out = fired(&[true, true, true, true, false, true, true, true, true]);
        assert!(out.iter().all(|f| !f));

        let mut d = WeaponDebouncer::new(5);
        for _ in 0..4 {
            d.observe(true);
        }
        d.observe(false);
        assert_eq!(d.streak(), 0);
    }

    #[test]
    fn test_single_frame_trigger() {
        let mut d = WeaponDebouncer::new(1);
        assert!(d.observe(true));
        assert!(!d.observe(false));
    }
}
