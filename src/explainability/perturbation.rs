//! Gaussian perturbations of feature vectors

use ndarray::Array1;
use rand::SeedableRng;
use rand_distr::{Distribution, StandardNormal};
use rand_xoshiro::Xoshiro256PlusPlus;

/// Random source for perturbing query points.
///
/// Every trial owns its own generator, created at task start, so concurrently
/// running trials never share a stream.
#[derive(Debug, Clone)]
pub struct PerturbationGenerator {
    rng: Xoshiro256PlusPlus,
}

impl PerturbationGenerator {
    /// Deterministic generator
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
        }
    }

    /// Generator seeded from OS entropy
    pub fn from_entropy() -> Self {
        Self {
            rng: Xoshiro256PlusPlus::from_entropy(),
        }
    }

    /// `d` independent standard-normal draws, each multiplied by `scale`
    pub fn generate(&mut self, d: usize, scale: f64) -> Array1<f64> {
        self.noise(d) * scale
    }

    /// `d` independent standard-normal draws
    pub fn noise(&mut self, d: usize) -> Array1<f64> {
        Array1::from_shape_simple_fn(d, || StandardNormal.sample(&mut self.rng))
    }

    /// Underlying stream, for explainers that sample their own neighbourhoods
    pub fn rng_mut(&mut self) -> &mut Xoshiro256PlusPlus {
        &mut self.rng
    }
}
