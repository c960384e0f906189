// ============================================================================
// sampler.rs — atomfield
// Importance sampler: draws N positions in NDC from a density grid via an
// inverse-CDF lookup. The CDF workspace is preallocated once; sampling makes
// no host allocations beyond the caller's output mirror.
// ============================================================================

use rand::Rng;

/// Interior box used when the density grid carries no mass at all.
const FALLBACK_BOX: f32 = 0.85;

pub struct Sampler {
    grid_w: usize,
    grid_h: usize,
    cdf: Vec<f64>,
}

impl Sampler {
    pub fn new(grid_w: u32, grid_h: u32) -> Self {
        let cells = (grid_w * grid_h) as usize;
        Self {
            grid_w: grid_w as usize,
            grid_h: grid_h as usize,
            cdf: vec![0.0; cells],
        }
    }

    /// Fill `out` with `count` positions distributed like `density`.
    /// Row 0 maps to y = -1, column 0 to x = -1; each sample carries uniform
    /// sub-cell jitter. A zero grid falls back to uniform positions in a safe
    /// interior box, which downstream assignment handles like any other cloud.
    pub fn sample_into(
        &mut self,
        density: &[f32],
        count: usize,
        rng: &mut impl Rng,
        out: &mut Vec<[f32; 2]>,
    ) {
        assert_eq!(density.len(), self.grid_w * self.grid_h);
        out.clear();

        let mut running = 0.0f64;
        for (cell, &d) in density.iter().enumerate() {
            running += d.max(0.0) as f64;
            self.cdf[cell] = running;
        }

        if running <= 0.0 {
            for _ in 0..count {
                out.push([
                    rng.gen_range(-FALLBACK_BOX..FALLBACK_BOX),
                    rng.gen_range(-FALLBACK_BOX..FALLBACK_BOX),
                ]);
            }
            return;
        }

        let w = self.grid_w as f32;
        let h = self.grid_h as f32;
        for _ in 0..count {
            let u = rng.gen::<f64>() * running;
            // First cell whose cumulative value exceeds the draw.
            let cell = self.cdf.partition_point(|&c| c <= u).min(self.cdf.len() - 1);
            let row = cell / self.grid_w;
            let col = cell % self.grid_w;
            let jx: f32 = rng.gen();
            let jy: f32 = rng.gen();
            out.push([
                (col as f32 + jx) / w * 2.0 - 1.0,
                (row as f32 + jy) / h * 2.0 - 1.0,
            ]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn single_cell_grid_lands_every_sample_in_that_cell() {
        let mut sampler = Sampler::new(8, 8);
        let mut density = vec![0.0f32; 64];
        density[3 * 8 + 5] = 1.0; // row 3, col 5
        let mut rng = StdRng::seed_from_u64(7);
        let mut out = Vec::new();
        sampler.sample_into(&density, 10_000, &mut rng, &mut out);

        let x_lo = 5.0 / 8.0 * 2.0 - 1.0;
        let x_hi = 6.0 / 8.0 * 2.0 - 1.0;
        let y_lo = 3.0 / 8.0 * 2.0 - 1.0;
        let y_hi = 4.0 / 8.0 * 2.0 - 1.0;
        for [x, y] in out {
            assert!(x >= x_lo && x <= x_hi);
            assert!(y >= y_lo && y <= y_hi);
        }
    }

    #[test]
    fn zero_grid_falls_back_to_safe_interior_box() {
        let mut sampler = Sampler::new(16, 16);
        let density = vec![0.0f32; 256];
        let mut rng = StdRng::seed_from_u64(1);
        let mut out = Vec::new();
        sampler.sample_into(&density, 5_000, &mut rng, &mut out);
        assert_eq!(out.len(), 5_000);
        for [x, y] in out {
            assert!(x.abs() <= 0.85 && y.abs() <= 0.85);
        }
    }

    #[test]
    fn histogram_tracks_density_ratio() {
        let mut sampler = Sampler::new(2, 1);
        let density = vec![1.0f32, 3.0];
        let mut rng = StdRng::seed_from_u64(42);
        let mut out = Vec::new();
        sampler.sample_into(&density, 100_000, &mut rng, &mut out);

        let right = out.iter().filter(|[x, _]| *x >= 0.0).count() as f64;
        let fraction = right / out.len() as f64;
        assert!((fraction - 0.75).abs() < 0.01, "got {fraction}");
    }

    #[test]
    fn samples_stay_inside_ndc() {
        let mut sampler = Sampler::new(32, 32);
        let density = vec![1.0f32; 1024];
        let mut rng = StdRng::seed_from_u64(3);
        let mut out = Vec::new();
        sampler.sample_into(&density, 20_000, &mut rng, &mut out);
        for [x, y] in out {
            assert!((-1.0..=1.0).contains(&x));
            assert!((-1.0..=1.0).contains(&y));
        }
    }

    #[test]
    fn repeated_use_reuses_the_workspace() {
        let mut sampler = Sampler::new(4, 4);
        let density = vec![1.0f32; 16];
        let mut rng = StdRng::seed_from_u64(9);
        let mut out = Vec::with_capacity(128);
        sampler.sample_into(&density, 64, &mut rng, &mut out);
        let ptr = out.as_ptr();
        sampler.sample_into(&density, 128, &mut rng, &mut out);
        assert_eq!(out.len(), 128);
        assert_eq!(out.as_ptr(), ptr);
    }
}
