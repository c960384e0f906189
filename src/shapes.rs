// ============================================================================
// shapes.rs — atomfield
// Shape library: pure generators from canonical name to a density grid in
// [0,1]. Row 0 is NDC y=-1 (bottom), column 0 is x=-1. Every output passes a
// separable Gaussian blur so the sampler sees smooth gradients; results are
// cached per canonical name.
// ============================================================================

use std::collections::HashMap;
use std::f32::consts::{PI, TAU};
use std::sync::Arc;

/// Fallback for unknown names.
pub const DEFAULT_SHAPE: &str = "circle";

/// Canonical registry, in auto-cycle order: geometric primitives, then
/// mathematical curves/attractors/fractals, then molecular/lattice shapes.
pub const CANONICAL_SHAPES: &[&str] = &[
    "circle",
    "ring",
    "square",
    "triangle",
    "star",
    "heart",
    "cross",
    "spiral",
    "lissajous",
    "rose",
    "butterfly",
    "lorenz",
    "dejong",
    "clifford",
    "sierpinski",
    "fern",
    "dna",
    "benzene",
    "graphene",
    "fullerene",
];

/// Each alias maps one non-canonical word to exactly one canonical name.
const ALIASES: &[(&str, &str)] = &[
    ("helix", "dna"),
    ("double helix", "dna"),
    ("hex", "benzene"),
    ("hexagon", "benzene"),
    ("ball", "fullerene"),
    ("buckyball", "fullerene"),
    ("donut", "ring"),
    ("torus", "ring"),
    ("heartbeat", "heart"),
    ("galaxy", "spiral"),
    ("attractor", "clifford"),
    ("flower", "rose"),
    ("leaf", "fern"),
    ("snowflake", "sierpinski"),
    ("box", "square"),
];

/// Resolve free text to a canonical shape name: exact lowercase/trim match,
/// then alias, then longest canonical prefix of the input, then prefix
/// completion, then the default.
pub fn resolve(input: &str) -> &'static str {
    let needle = input.trim().to_lowercase();
    if needle.is_empty() {
        return DEFAULT_SHAPE;
    }
    if let Some(name) = CANONICAL_SHAPES.iter().find(|c| **c == needle) {
        return name;
    }
    if let Some((_, name)) = ALIASES.iter().find(|(alias, _)| *alias == needle) {
        return name;
    }
    // "circle please" -> "circle": longest canonical that prefixes the input.
    if let Some(name) = CANONICAL_SHAPES
        .iter()
        .filter(|c| needle.starts_with(**c))
        .max_by_key(|c| c.len())
    {
        return name;
    }
    // "benz" -> "benzene": completion, first registry hit.
    if needle.len() >= 3 {
        if let Some(name) = CANONICAL_SHAPES.iter().find(|c| c.starts_with(&needle)) {
            return name;
        }
    }
    DEFAULT_SHAPE
}

// ======================== Library ========================

pub struct ShapeLibrary {
    width: usize,
    height: usize,
    cache: HashMap<&'static str, Arc<Vec<f32>>>,
}

impl ShapeLibrary {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width as usize,
            height: height as usize,
            cache: HashMap::new(),
        }
    }

    /// Density grid for a canonical (or free-text) name; generated on first
    /// use and cached.
    pub fn generate(&mut self, name: &str) -> Arc<Vec<f32>> {
        let canonical = resolve(name);
        if let Some(grid) = self.cache.get(canonical) {
            return Arc::clone(grid);
        }
        let mut grid = self.raw_density(canonical);
        gaussian_blur(&mut grid, self.width, self.height, 1.5);
        normalize_peak(&mut grid);
        let grid = Arc::new(grid);
        self.cache.insert(canonical, Arc::clone(&grid));
        grid
    }

    fn raw_density(&self, canonical: &str) -> Vec<f32> {
        let mut painter = Painter::new(self.width, self.height);
        match canonical {
            "circle" => painter.fill(|x, y| soft_edge(0.68 - (x * x + y * y).sqrt())),
            "ring" => painter.fill(|x, y| {
                let r = (x * x + y * y).sqrt();
                soft_edge(0.14 - (r - 0.58).abs())
            }),
            "square" => painter.fill(|x, y| soft_edge(0.62 - x.abs().max(y.abs()))),
            "triangle" => painter.fill(triangle_density),
            "star" => painter.fill(|x, y| {
                let r = (x * x + y * y).sqrt();
                let theta = y.atan2(x);
                let spikes = 0.36 + 0.34 * (5.0 * theta).cos().max(0.0).powf(3.0);
                soft_edge(spikes - r)
            }),
            "heart" => painter.fill(|x, y| {
                let (hx, hy) = (x * 1.45, y * 1.45 + 0.12);
                let q = hx * hx + hy * hy - 1.0;
                soft_edge(-(q * q * q - hx * hx * hy * hy * hy) * 0.45)
            }),
            "cross" => painter.fill(|x, y| {
                let bar_a = soft_edge(0.2 - x.abs()).min(soft_edge(0.72 - y.abs()));
                let bar_b = soft_edge(0.2 - y.abs()).min(soft_edge(0.72 - x.abs()));
                bar_a.max(bar_b)
            }),
            "spiral" => {
                for arm in 0..2 {
                    let offset = PI * arm as f32;
                    painter.curve(2400, |t| {
                        let theta = t * 3.0 * TAU + offset;
                        let r = 0.05 + 0.78 * t;
                        (r * theta.cos(), r * theta.sin())
                    });
                }
                painter.into_grid()
            }
            "lissajous" => painter.weighted_curve(4000, |t| {
                let theta = t * TAU;
                (
                    0.8 * (3.0 * theta + PI / 2.0).sin(),
                    0.8 * (2.0 * theta).sin(),
                )
            }),
            "rose" => painter.weighted_curve(5000, |t| {
                let theta = t * TAU;
                let r = 0.82 * (4.0 * theta).cos();
                (r * theta.cos(), r * theta.sin())
            }),
            "butterfly" => painter.weighted_curve(8000, |t| {
                let theta = t * 12.0 * PI;
                let r = theta.sin().exp() - 2.0 * (4.0 * theta).cos()
                    + ((2.0 * theta - PI) / 24.0).sin().powi(5);
                (r * theta.sin() * 0.22, r * theta.cos() * 0.22 - 0.1)
            }),
            "lorenz" => painter.lorenz(),
            "dejong" => painter.iterated_map(220_000, (-2.24, 0.43, -0.65, -2.43), |x, y, p| {
                ((p.0 * y).sin() - (p.1 * x).cos(), (p.2 * x).sin() - (p.3 * y).cos())
            }),
            "clifford" => painter.iterated_map(220_000, (-1.4, 1.6, 1.0, 0.7), |x, y, p| {
                (
                    (p.0 * y).sin() + p.2 * (p.0 * x).cos(),
                    (p.1 * x).sin() + p.3 * (p.1 * y).cos(),
                )
            }),
            "sierpinski" => painter.sierpinski(),
            "fern" => painter.fern(),
            "dna" => painter.dna(),
            "benzene" => painter.benzene(),
            "graphene" => painter.graphene(),
            "fullerene" => painter.fullerene(),
            other => {
                // Registry and generators are maintained together; a canonical
                // name without a generator is a build defect.
                unreachable!("no generator for canonical shape {other}")
            }
        }
    }
}

fn soft_edge(signed: f32) -> f32 {
    // ~2 grid cells of falloff on a 128 grid.
    (signed / 0.03).clamp(0.0, 1.0)
}

fn triangle_density(x: f32, y: f32) -> f32 {
    // Triangle with apex up: vertices (0, 0.7), (±0.65, -0.55). Density is
    // the minimum of the three inward half-plane distances.
    let d0 = y + 0.55;
    let d1 = 0.887 * (x + 0.65) - 0.461 * (y + 0.55);
    let d2 = 0.887 * (0.65 - x) - 0.461 * (y + 0.55);
    soft_edge(d0).min(soft_edge(d1)).min(soft_edge(d2))
}

// ======================== Painter ========================

/// Accumulates analytic fields or stamped point clouds into a grid.
struct Painter {
    width: usize,
    height: usize,
    grid: Vec<f32>,
    rng_state: u64,
}

impl Painter {
    fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            grid: vec![0.0; width * height],
            // Fixed seed: generators are pure functions of the name.
            rng_state: 0x9e3779b97f4a7c15,
        }
    }

    fn next_f32(&mut self) -> f32 {
        // xorshift64*; deterministic so cached grids are reproducible.
        let mut x = self.rng_state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.rng_state = x;
        (x.wrapping_mul(0x2545f4914f6cdd1d) >> 40) as f32 / (1u64 << 24) as f32
    }

    /// Evaluate an analytic density at every cell center.
    fn fill(mut self, f: impl Fn(f32, f32) -> f32) -> Vec<f32> {
        for row in 0..self.height {
            let y = (row as f32 + 0.5) / self.height as f32 * 2.0 - 1.0;
            for col in 0..self.width {
                let x = (col as f32 + 0.5) / self.width as f32 * 2.0 - 1.0;
                self.grid[row * self.width + col] = f(x, y).clamp(0.0, 1.0);
            }
        }
        self.grid
    }

    /// Deposit a unit of density at an NDC position (bilinear over 4 cells).
    fn stamp(&mut self, x: f32, y: f32, amount: f32) {
        if !(-1.0..=1.0).contains(&x) || !(-1.0..=1.0).contains(&y) {
            return;
        }
        let fx = (x + 1.0) * 0.5 * self.width as f32 - 0.5;
        let fy = (y + 1.0) * 0.5 * self.height as f32 - 0.5;
        let cx = fx.floor();
        let cy = fy.floor();
        let tx = fx - cx;
        let ty = fy - cy;
        for (ox, oy, w) in [
            (0, 0, (1.0 - tx) * (1.0 - ty)),
            (1, 0, tx * (1.0 - ty)),
            (0, 1, (1.0 - tx) * ty),
            (1, 1, tx * ty),
        ] {
            let col = cx as i64 + ox;
            let row = cy as i64 + oy;
            if col >= 0 && row >= 0 && (col as usize) < self.width && (row as usize) < self.height {
                self.grid[row as usize * self.width + col as usize] += amount * w;
            }
        }
    }

    fn curve(&mut self, samples: usize, f: impl Fn(f32) -> (f32, f32)) {
        for i in 0..samples {
            let t = i as f32 / samples as f32;
            let (x, y) = f(t);
            self.stamp(x, y, 1.0);
        }
    }

    fn weighted_curve(mut self, samples: usize, f: impl Fn(f32) -> (f32, f32)) -> Vec<f32> {
        self.curve(samples, f);
        self.grid
    }

    fn into_grid(self) -> Vec<f32> {
        self.grid
    }

    fn iterated_map(
        mut self,
        iterations: usize,
        params: (f32, f32, f32, f32),
        step: impl Fn(f32, f32, (f32, f32, f32, f32)) -> (f32, f32),
    ) -> Vec<f32> {
        let mut x = 0.1f32;
        let mut y = 0.0f32;
        for i in 0..iterations {
            let (nx, ny) = step(x, y, params);
            x = nx;
            y = ny;
            if i > 32 {
                // Attractor coordinates live in roughly [-2, 2].
                self.stamp(x * 0.44, y * 0.44, 1.0);
            }
        }
        self.grid
    }

    fn lorenz(mut self) -> Vec<f32> {
        let (sigma, rho, beta) = (10.0f32, 28.0f32, 8.0 / 3.0f32);
        let dt = 0.004f32;
        let (mut x, mut y, mut z) = (0.1f32, 0.0f32, 0.0f32);
        for i in 0..160_000 {
            let dx = sigma * (y - x);
            let dy = x * (rho - z) - y;
            let dz = x * y - beta * z;
            x += dx * dt;
            y += dy * dt;
            z += dz * dt;
            if i > 200 {
                // Project (x, z): the classic butterfly, centered vertically.
                self.stamp(x * 0.042, (z - 25.4) * 0.038, 1.0);
            }
        }
        self.grid
    }

    fn sierpinski(mut self) -> Vec<f32> {
        let corners = [(0.0f32, 0.82f32), (-0.88, -0.7), (0.88, -0.7)];
        let (mut x, mut y) = (0.0f32, 0.0f32);
        for i in 0..180_000 {
            let pick = (self.next_f32() * 3.0) as usize % 3;
            x = (x + corners[pick].0) * 0.5;
            y = (y + corners[pick].1) * 0.5;
            if i > 16 {
                self.stamp(x, y, 1.0);
            }
        }
        self.grid
    }

    fn fern(mut self) -> Vec<f32> {
        let (mut x, mut y) = (0.0f32, 0.0f32);
        for i in 0..200_000 {
            let r = self.next_f32();
            let (nx, ny) = if r < 0.01 {
                (0.0, 0.16 * y)
            } else if r < 0.86 {
                (0.85 * x + 0.04 * y, -0.04 * x + 0.85 * y + 1.6)
            } else if r < 0.93 {
                (0.20 * x - 0.26 * y, 0.23 * x + 0.22 * y + 1.6)
            } else {
                (-0.15 * x + 0.28 * y, 0.26 * x + 0.24 * y + 0.44)
            };
            x = nx;
            y = ny;
            if i > 16 {
                // Native fern occupies x in [-2.2, 2.7], y in [0, 10].
                self.stamp(x * 0.33, y * 0.18 - 0.92, 1.0);
            }
        }
        self.grid
    }

    fn dna(mut self) -> Vec<f32> {
        let turns = 2.25f32;
        // Two phase-shifted strands.
        for strand in 0..2 {
            let phase = PI * strand as f32;
            self.curve(2600, |t| {
                let y = t * 1.7 - 0.85;
                let x = 0.5 * (t * turns * TAU + phase).sin();
                (x, y)
            });
        }
        // Base-pair rungs between the strands.
        let rungs = 14;
        for r in 0..rungs {
            let t = (r as f32 + 0.5) / rungs as f32;
            let y = t * 1.7 - 0.85;
            let x0 = 0.5 * (t * turns * TAU).sin();
            let x1 = 0.5 * (t * turns * TAU + PI).sin();
            for s in 0..40 {
                let u = s as f32 / 39.0;
                self.stamp(x0 + (x1 - x0) * u, y, 0.7);
            }
        }
        self.grid
    }

    fn blob(&mut self, x: f32, y: f32, radius: f32, amount: f32) {
        let steps = 22;
        for i in 0..steps {
            for j in 0..steps {
                let dx = (i as f32 / (steps - 1) as f32 - 0.5) * 2.0 * radius;
                let dy = (j as f32 / (steps - 1) as f32 - 0.5) * 2.0 * radius;
                let d2 = dx * dx + dy * dy;
                if d2 <= radius * radius {
                    let falloff = (-d2 / (0.35 * radius * radius)).exp();
                    self.stamp(x + dx, y + dy, amount * falloff);
                }
            }
        }
    }

    fn bond(&mut self, a: (f32, f32), b: (f32, f32), amount: f32) {
        let steps = 48;
        for i in 0..=steps {
            let t = i as f32 / steps as f32;
            self.stamp(a.0 + (b.0 - a.0) * t, a.1 + (b.1 - a.1) * t, amount);
        }
    }

    fn benzene(mut self) -> Vec<f32> {
        let ring: Vec<(f32, f32)> = (0..6)
            .map(|i| {
                let theta = TAU * i as f32 / 6.0 + PI / 6.0;
                (0.55 * theta.cos(), 0.55 * theta.sin())
            })
            .collect();
        for i in 0..6 {
            let a = ring[i];
            let b = ring[(i + 1) % 6];
            self.blob(a.0, a.1, 0.09, 1.0);
            self.bond(a, b, 0.5);
            // Hydrogens point outward.
            let h = (a.0 * 1.55, a.1 * 1.55);
            self.blob(h.0, h.1, 0.05, 0.6);
            self.bond(a, h, 0.3);
        }
        // Aromatic inner circle.
        self.curve(700, |t| {
            let theta = t * TAU;
            (0.3 * theta.cos(), 0.3 * theta.sin())
        });
        self.grid
    }

    fn graphene(mut self) -> Vec<f32> {
        // Honeycomb lattice clipped to the canvas: hexagon outlines tiled on a
        // triangular lattice of centers (shared edges simply overdraw).
        let bond = 0.16f32;
        let step_x = bond * 3.0f32.sqrt();
        let step_y = bond * 1.5;
        let mut row = 0i32;
        let mut cy = -0.9f32;
        while cy < 0.9 {
            let offset = if row % 2 == 0 { 0.0 } else { step_x * 0.5 };
            let mut cx = -0.9f32 + offset;
            while cx < 0.9 {
                let hexagon: Vec<(f32, f32)> = (0..6)
                    .map(|i| {
                        let theta = TAU * i as f32 / 6.0 + PI / 6.0;
                        (cx + bond * theta.cos(), cy + bond * theta.sin())
                    })
                    .collect();
                for i in 0..6 {
                    self.blob(hexagon[i].0, hexagon[i].1, 0.03, 0.8);
                    self.bond(hexagon[i], hexagon[(i + 1) % 6], 0.3);
                }
                cx += step_x;
            }
            cy += step_y;
            row += 1;
        }
        self.grid
    }

    fn fullerene(mut self) -> Vec<f32> {
        // Stylized C60 projection: pentagon core, two carbon rings, and the
        // sphere silhouette.
        let rings = [(5usize, 0.22f32, 0.0f32), (10, 0.5, PI / 10.0), (10, 0.74, 0.0)];
        let mut shells: Vec<Vec<(f32, f32)>> = Vec::new();
        for (count, radius, rot) in rings {
            let shell: Vec<(f32, f32)> = (0..count)
                .map(|i| {
                    let theta = TAU * i as f32 / count as f32 + rot;
                    (radius * theta.cos(), radius * theta.sin())
                })
                .collect();
            for &(x, y) in &shell {
                self.blob(x, y, 0.05, 0.9);
            }
            for i in 0..count {
                self.bond(shell[i], shell[(i + 1) % count], 0.3);
            }
            shells.push(shell);
        }
        // Spokes between adjacent shells.
        for pair in shells.windows(2) {
            let (inner, outer) = (&pair[0], &pair[1]);
            for &a in inner {
                let nearest = outer
                    .iter()
                    .min_by(|p, q| {
                        let dp = (p.0 - a.0).powi(2) + (p.1 - a.1).powi(2);
                        let dq = (q.0 - a.0).powi(2) + (q.1 - a.1).powi(2);
                        dp.total_cmp(&dq)
                    })
                    .copied()
                    .unwrap();
                self.bond(a, nearest, 0.25);
            }
        }
        self.curve(1200, |t| {
            let theta = t * TAU;
            (0.86 * theta.cos(), 0.86 * theta.sin())
        });
        self.grid
    }
}

// ======================== Post-processing ========================

/// Separable Gaussian blur with clamp-to-edge, in place.
pub fn gaussian_blur(grid: &mut Vec<f32>, width: usize, height: usize, sigma: f32) {
    let radius = (3.0 * sigma).ceil() as i64;
    let mut kernel = Vec::with_capacity((2 * radius + 1) as usize);
    let mut total = 0.0f32;
    for k in -radius..=radius {
        let w = (-(k * k) as f32 / (2.0 * sigma * sigma)).exp();
        kernel.push(w);
        total += w;
    }
    for w in &mut kernel {
        *w /= total;
    }

    let mut scratch = vec![0.0f32; grid.len()];

    // Horizontal.
    for row in 0..height {
        for col in 0..width {
            let mut acc = 0.0;
            for (ki, w) in kernel.iter().enumerate() {
                let c = (col as i64 + ki as i64 - radius).clamp(0, width as i64 - 1) as usize;
                acc += grid[row * width + c] * w;
            }
            scratch[row * width + col] = acc;
        }
    }
    // Vertical.
    for row in 0..height {
        for col in 0..width {
            let mut acc = 0.0;
            for (ki, w) in kernel.iter().enumerate() {
                let r = (row as i64 + ki as i64 - radius).clamp(0, height as i64 - 1) as usize;
                acc += scratch[r * width + col] * w;
            }
            grid[row * width + col] = acc;
        }
    }
}

fn normalize_peak(grid: &mut [f32]) {
    let peak = grid.iter().fold(0.0f32, |m, &v| m.max(v));
    if peak > 0.0 {
        let inv = 1.0 / peak;
        for v in grid.iter_mut() {
            *v = (*v * inv).clamp(0.0, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_is_idempotent_and_canonical() {
        for input in ["DNA", "dna", " DNA ", "helix", "gibberish", "", "circle please"] {
            let once = resolve(input);
            assert!(CANONICAL_SHAPES.contains(&once));
            assert_eq!(resolve(once), once);
        }
    }

    #[test]
    fn resolve_matches_expected_names() {
        assert_eq!(resolve("DNA"), "dna");
        assert_eq!(resolve(" DNA "), "dna");
        assert_eq!(resolve("helix"), "dna");
        assert_eq!(resolve("gibberish"), "circle");
        assert_eq!(resolve("torus"), "ring");
        assert_eq!(resolve("benz"), "benzene");
        assert_eq!(resolve(""), "circle");
    }

    #[test]
    fn aliases_map_into_canonical_set_without_cycles() {
        for (alias, target) in ALIASES {
            assert!(CANONICAL_SHAPES.contains(target), "{target} not canonical");
            assert!(
                !CANONICAL_SHAPES.contains(alias),
                "{alias} shadows a canonical name"
            );
        }
    }

    #[test]
    fn every_canonical_generates_a_valid_grid() {
        let mut library = ShapeLibrary::new(64, 64);
        for name in CANONICAL_SHAPES {
            let grid = library.generate(name);
            assert_eq!(grid.len(), 64 * 64, "{name}");
            let mass: f32 = grid.iter().sum();
            assert!(mass > 0.0, "{name} produced an empty grid");
            assert!(
                grid.iter().all(|v| (0.0..=1.0).contains(v)),
                "{name} out of range"
            );
        }
    }

    #[test]
    fn generation_is_cached() {
        let mut library = ShapeLibrary::new(32, 32);
        let a = library.generate("circle");
        let b = library.generate("circle");
        assert!(Arc::ptr_eq(&a, &b));
    }

    #[test]
    fn circle_peaks_at_center_row_zero_is_bottom() {
        let mut library = ShapeLibrary::new(64, 64);
        let grid = library.generate("circle");
        let center = grid[32 * 64 + 32];
        let corner = grid[0];
        assert!(center > 0.9);
        assert!(corner < 0.05);

        // The fern is rooted near the bottom of the canvas: the stem region
        // in low rows must carry density.
        let fern = library.generate("fern");
        let bottom_mass: f32 = fern[..8 * 64].iter().sum();
        assert!(bottom_mass > 0.0);
    }

    #[test]
    fn blur_preserves_interior_mass() {
        let mut grid = vec![0.0f32; 32 * 32];
        grid[16 * 32 + 16] = 1.0;
        gaussian_blur(&mut grid, 32, 32, 1.5);
        let mass: f32 = grid.iter().sum();
        assert!((mass - 1.0).abs() < 1e-3);
        // Smooth gradients: the impulse must have spread off its cell.
        assert!(grid[16 * 32 + 16] < 0.3);
        assert!(grid[16 * 32 + 17] > 0.01);
    }
}
