use candle_core::{Device, Result, Tensor};
use std::time::{SystemTime, UNIX_EPOCH};

const DEFAULT_STREAM: u64 = 54;

fn clock_seed() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

/// PCG32 random number generator.
///
/// The single random source for noise, timestep and shuffle draws. Seed it to make
/// a run reproducible; [`Pcg32::from_clock`] gives an unseeded run.
#[derive(Debug, Clone)]
pub struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    pub fn new(seed: u64, inc: u64) -> Self {
        let mut rng = Self {
            state: 0,
            inc: (inc << 1) | 1,
        };
        rng.next_u32();
        rng.state = rng.state.wrapping_add(seed);
        rng.next_u32();
        rng
    }

    pub fn seeded(seed: u64) -> Self {
        Self::new(seed, DEFAULT_STREAM)
    }

    /// Seed from the wall clock.
    pub fn from_clock() -> Self {
        Self::seeded(clock_seed())
    }

    pub fn from_optional_seed(seed: Option<u64>) -> Self {
        Self::from_optional_seed_on_stream(seed, DEFAULT_STREAM)
    }

    /// Like [`Pcg32::from_optional_seed`], on an explicit stream.
    ///
    /// Generators on different streams never share a sequence, even with the same seed.
    pub fn from_optional_seed_on_stream(seed: Option<u64>, stream: u64) -> Self {
        Self::new(seed.unwrap_or_else(clock_seed), stream)
    }

    pub fn next_u32(&mut self) -> u32 {
        let oldstate = self.state;
        self.state = oldstate
            .wrapping_mul(6364136223846793005)
            .wrapping_add(self.inc);
        // XSH-RR output
        let xorshifted = ((oldstate >> 18) ^ oldstate) >> 27;
        let rot = (oldstate >> 59) as u32;
        let xorshifted = xorshifted as u32;
        (xorshifted >> rot) | (xorshifted << ((0u32).wrapping_sub(rot) & 31))
    }

    pub fn next_f32(&mut self) -> f32 {
        // 2^{-24}
        (self.next_u32() >> 8) as f32 * 5.9604645e-8
    }

    /// Uniform integer in `[0, bound)` without modulo bias.
    pub fn next_below(&mut self, bound: u32) -> u32 {
        assert!(bound > 0, "next_below requires a non-zero bound");
        let threshold = bound.wrapping_neg() % bound;
        loop {
            let r = self.next_u32();
            if r >= threshold {
                return r % bound;
            }
        }
    }

    /// Two standard normal draws via Box-Muller.
    pub fn next_gaussian(&mut self) -> (f32, f32) {
        let u1 = loop {
            let x = self.next_f32();
            if x > 1e-7 {
                break x;
            }
        };
        let u2 = self.next_f32();

        let mag = (-2.0 * u1.ln()).sqrt();
        let z0 = mag * (2.0 * std::f32::consts::PI * u2).cos();
        let z1 = mag * (2.0 * std::f32::consts::PI * u2).sin();

        (z0, z1)
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.next_below(i as u32 + 1) as usize;
            items.swap(i, j);
        }
    }

    /// F32 tensor of standard normal noise.
    pub fn randn(
        &mut self,
        shape: impl Into<candle_core::Shape>,
        device: &Device,
    ) -> Result<Tensor> {
        let shape = shape.into();
        let elem_count = shape.elem_count();
        let mut data = Vec::with_capacity(elem_count);

        let mut i = 0;
        while i < elem_count {
            let (z0, z1) = self.next_gaussian();
            data.push(z0);
            if i + 1 < elem_count {
                data.push(z1);
            }
            i += 2;
        }

        Tensor::from_vec(data, shape, device)
    }
}
