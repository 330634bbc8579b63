use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

/// Session-scoped deterministic RNG. Every random decision in a session
/// draws from this generator, so an identical seed and call sequence
/// replays the identical decision sequence.
#[derive(Debug, Clone)]
pub struct SessionRng {
    rng: ChaCha8Rng,
}

impl SessionRng {
    pub fn seed_from(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }

    /// Uniform f64 in [0, 1).
    pub fn uniform(&mut self) -> f64 {
        self.rng.gen()
    }

    /// Uniform index below `len`. `len` must be non-zero.
    pub fn pick_index(&mut self, len: usize) -> usize {
        debug_assert!(len > 0);
        self.rng.gen_range(0..len)
    }

    /// Standard normal draw via Box-Muller.
    pub fn standard_normal(&mut self) -> f64 {
        let u1: f64 = self.rng.gen::<f64>().max(1e-10);
        let u2: f64 = self.rng.gen();
        (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
    }

    pub fn normal(&mut self, mean: f64, sd: f64) -> f64 {
        mean + sd.max(0.0) * self.standard_normal()
    }
}
