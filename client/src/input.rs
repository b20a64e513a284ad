//! Movement input for a headless peer

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::Vec2;

/// Ticks a heading is held before picking a new one.
const MIN_HOLD_TICKS: u32 = 20;
const MAX_HOLD_TICKS: u32 = 90;

/// Wanders around by holding a random direction for a random number of
/// ticks. Stands in for the keyboard so the client runs without a window.
#[derive(Debug)]
pub struct Autopilot {
    rng: StdRng,
    heading: Vec2,
    ticks_left: u32,
}

impl Autopilot {
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            heading: Vec2::ZERO,
            ticks_left: 0,
        }
    }

    /// Intent for the next tick. Each axis is -1, 0 or 1, like arrow keys.
    pub fn next_intent(&mut self) -> Vec2 {
        if self.ticks_left == 0 {
            self.heading = Vec2::new(
                self.rng.gen_range(-1..=1) as f32,
                self.rng.gen_range(-1..=1) as f32,
            );
            self.ticks_left = self.rng.gen_range(MIN_HOLD_TICKS..=MAX_HOLD_TICKS);
        }
        self.ticks_left -= 1;
        self.heading
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intents_are_unit_steps() {
        let mut autopilot = Autopilot::new(Some(5));
        for _ in 0..1_000 {
            let intent = autopilot.next_intent();
            assert!([-1.0, 0.0, 1.0].contains(&intent.x));
            assert!([-1.0, 0.0, 1.0].contains(&intent.y));
        }
    }

    #[test]
    fn test_heading_is_held() {
        let mut autopilot = Autopilot::new(Some(11));
        let first = autopilot.next_intent();
        for _ in 1..MIN_HOLD_TICKS {
            assert_eq!(autopilot.next_intent(), first);
        }
    }

    #[test]
    fn test_same_seed_same_path() {
        let mut a = Autopilot::new(Some(3));
        let mut b = Autopilot::new(Some(3));
        for _ in 0..500 {
            assert_eq!(a.next_intent(), b.next_intent());
        }
    }
}
