// ============================================================================
// config.rs — atomfield
// Runtime configuration: every tunable of the field, with defaults and the
// fixed-point scale derivation used by the k-means accumulators.
// ============================================================================

use serde::Serialize;

/// Linear compute kernels (physics, splat, k-means) run 256 threads wide.
pub const WORKGROUP_LINEAR: u32 = 256;
/// Grid kernels (NCA, decay, bloom) run 16×16.
pub const WORKGROUP_X: u32 = 16;
pub const WORKGROUP_Y: u32 = 16;

/// MLP back-end state channels; channel 0 is the alpha output.
pub const NCA_CHANNELS: u32 = 16;
/// MLP hidden layer width.
pub const NCA_HIDDEN: u32 = 64;
/// Perception features per cell: 16 channels × {identity, sobel-x, sobel-y}
/// plus 8 goal features.
pub const NCA_FEATURES: u32 = NCA_CHANNELS * 3 + 8;

/// Fixed-point splat weights sum to this per atom; trail decay divides the
/// raw density counter by it so trail reads in atoms-per-pixel.
pub const SPLAT_WEIGHT_SUM: u32 = 256;

/// Frame dt is clamped to this (seconds) so a stalled window or debugger
/// cannot teleport atoms through walls.
pub const MAX_DT: f32 = 1.0 / 30.0;

/// All host-provided tunables. Parsed from the CLI in `main.rs`, serialized
/// into capture manifests.
#[derive(Clone, Debug, Serialize)]
pub struct FieldConfig {
    /// Atom count N.
    pub atom_count: u32,
    /// Display accumulator grid (density/velocity/trail), not the window size.
    pub display_w: u32,
    pub display_h: u32,
    /// Shape/NCA grid.
    pub grid_w: u32,
    pub grid_h: u32,
    /// k-means centroid count K.
    pub centroids: u32,
    /// k-means iterations per cloud.
    pub kmeans_iters: u32,
    /// NCA steps per transition.
    pub nca_steps: u32,
    /// Per-cell update probability of the MLP back-end.
    pub fire_rate: f32,
    /// Seconds for a full smoothstep morph.
    pub morph_duration: f32,
    /// Seconds a completed shape holds before auto-advance.
    pub hold_duration: f32,
    /// Trail decay factor per frame, in (0, 1).
    pub decay: f32,
    /// Speed clamp in NDC units per second.
    pub max_vel: f32,
    /// Soft wall boundary; wander repulsion starts at |coord| > bound.
    pub bound: f32,
    /// Expected peak trail value; anchors the log tone map.
    pub trail_ref: f32,
    /// Trail level above which bloom extracts highlights.
    pub bloom_threshold: f32,
    /// Whether the bloom pass runs at all.
    pub bloom: bool,
    /// NCA weight file; missing or malformed falls back to reaction–diffusion.
    pub weights_path: String,
    /// Directory for frame captures.
    pub capture_dir: String,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            atom_count: 1_500_000,
            display_w: 2560,
            display_h: 1440,
            grid_w: 128,
            grid_h: 128,
            centroids: 512,
            kmeans_iters: 6,
            nca_steps: 64,
            fire_rate: 0.5,
            morph_duration: 2.0,
            hold_duration: 3.5,
            decay: 0.90,
            max_vel: 0.55,
            bound: 0.92,
            trail_ref: 16.0,
            bloom_threshold: 6.0,
            bloom: true,
            weights_path: String::from("assets/nca_weights.json"),
            capture_dir: String::from("captures"),
        }
    }
}

impl FieldConfig {
    pub fn grid_cells(&self) -> u32 {
        self.grid_w * self.grid_h
    }

    pub fn display_pixels(&self) -> u32 {
        self.display_w * self.display_h
    }

    /// Fixed-point multiplier for the k-means accumulators: the largest power
    /// of two such that `N * scale` still fits in i32 when every atom lands
    /// in a single cluster at |coord| = 1.
    pub fn fixed_point_scale(&self) -> u32 {
        let headroom = i32::MAX as u64 / self.atom_count.max(1) as u64;
        let mut scale = 1u32;
        while (scale as u64) * 2 <= headroom {
            scale *= 2;
        }
        scale
    }

    /// Startup sanity pass. Violations here are configuration errors, not
    /// recoverable states.
    pub fn validate(&self) -> Result<(), String> {
        if self.atom_count == 0 {
            return Err(String::from("atom count must be positive"));
        }
        if self.grid_w < 8 || self.grid_h < 8 {
            return Err(format!(
                "shape grid {}x{} too small (minimum 8x8)",
                self.grid_w, self.grid_h
            ));
        }
        if self.display_w == 0 || self.display_h == 0 {
            return Err(String::from("display grid must be non-empty"));
        }
        if self.centroids == 0 || self.centroids > self.atom_count {
            return Err(format!(
                "centroid count {} must be in 1..={}",
                self.centroids, self.atom_count
            ));
        }
        if !(self.decay > 0.0 && self.decay < 1.0) {
            return Err(format!("decay {} must be in (0, 1)", self.decay));
        }
        if !(self.fire_rate > 0.0 && self.fire_rate <= 1.0) {
            return Err(format!("fire rate {} must be in (0, 1]", self.fire_rate));
        }
        if self.morph_duration <= 0.0 || self.hold_duration < 0.0 {
            return Err(String::from("morph/hold durations must be positive"));
        }
        let scale = self.fixed_point_scale();
        let worst = self.atom_count as u64 * scale as u64;
        if worst > i32::MAX as u64 {
            return Err(format!(
                "fixed-point scale {} overflows i32 for {} atoms",
                scale, self.atom_count
            ));
        }
        if scale < 64 {
            return Err(format!(
                "atom count {} leaves fixed-point scale {} with too little precision",
                self.atom_count, scale
            ));
        }
        Ok(())
    }

    /// Trail half-life in frames, for the startup log line.
    pub fn trail_half_life(&self) -> f32 {
        (0.5f32).ln() / self.decay.ln()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        FieldConfig::default().validate().unwrap();
    }

    #[test]
    fn scale_respects_i32_headroom() {
        for n in [1_000u32, 100_000, 1_500_000, 4_000_000] {
            let cfg = FieldConfig {
                atom_count: n,
                ..FieldConfig::default()
            };
            let scale = cfg.fixed_point_scale();
            assert!(n as u64 * scale as u64 <= i32::MAX as u64);
            assert!(n as u64 * (scale as u64 * 2) > i32::MAX as u64);
            assert!(scale.is_power_of_two());
        }
    }

    #[test]
    fn scale_for_default_atom_count() {
        // 2^31 / 1.5M ≈ 1431, so the derived power of two is 1024.
        assert_eq!(FieldConfig::default().fixed_point_scale(), 1024);
    }

    #[test]
    fn rejects_degenerate_configs() {
        let mut cfg = FieldConfig::default();
        cfg.decay = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = FieldConfig::default();
        cfg.centroids = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = FieldConfig::default();
        cfg.grid_w = 4;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn half_life_matches_decay() {
        let cfg = FieldConfig {
            decay: 0.5,
            ..FieldConfig::default()
        };
        assert!((cfg.trail_half_life() - 1.0).abs() < 1e-6);
    }
}
