// ============================================================================
// capture.rs — atomfield
// Frame capture: reads the trail accumulator back, tone-maps it on the CPU
// with the same phosphor curve the render shader uses, and writes PNGs plus
// a config manifest into a timestamped directory.
// ============================================================================

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Local;

use crate::buffers::FieldBuffers;
use crate::config::FieldConfig;

pub struct CaptureSink {
    run_dir: PathBuf,
    trail_scratch: Vec<f32>,
    rgba_scratch: Vec<u8>,
    counter: u32,
    manifest_written: bool,
}

impl CaptureSink {
    pub fn new(config: &FieldConfig) -> Self {
        let run_dir = Path::new(&config.capture_dir)
            .join(Local::now().format("%Y%m%d_%H%M%S").to_string());
        let pixels = config.display_pixels() as usize;
        Self {
            run_dir,
            trail_scratch: Vec::with_capacity(pixels),
            rgba_scratch: vec![0u8; pixels * 4],
            counter: 0,
            manifest_written: false,
        }
    }

    /// Read the trail back and save one tone-mapped PNG. `label` lands in the
    /// file name (the current shape, typically).
    pub fn capture(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffers: &FieldBuffers,
        config: &FieldConfig,
        label: &str,
    ) -> Result<PathBuf, String> {
        if !buffers.readback_trail(device, queue, &mut self.trail_scratch) {
            return Err(String::from("trail readback failed"));
        }

        fs::create_dir_all(&self.run_dir)
            .map_err(|e| format!("create {:?}: {e}", self.run_dir))?;
        if !self.manifest_written {
            self.write_manifest(config)?;
            self.manifest_written = true;
        }

        tone_map_into(
            &self.trail_scratch,
            config.display_w as usize,
            config.display_h as usize,
            config.trail_ref,
            &mut self.rgba_scratch,
        );

        let filename = format!("frame{:04}_{}.png", self.counter, sanitize(label));
        let path = self.run_dir.join(filename);
        image::save_buffer(
            &path,
            &self.rgba_scratch,
            config.display_w,
            config.display_h,
            image::ColorType::Rgba8,
        )
        .map_err(|e| format!("save {path:?}: {e}"))?;

        self.counter += 1;
        log::info!("capture saved: {path:?}");
        Ok(path)
    }

    fn write_manifest(&self, config: &FieldConfig) -> Result<(), String> {
        let manifest = serde_json::json!({
            "app_version": env!("CARGO_PKG_VERSION"),
            "timestamp": Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            "config": config,
        });
        let path = self.run_dir.join("manifest.json");
        let json = serde_json::to_string_pretty(&manifest)
            .map_err(|e| format!("serialize manifest: {e}"))?;
        fs::write(&path, json).map_err(|e| format!("write {path:?}: {e}"))
    }
}

fn sanitize(label: &str) -> String {
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// CPU mirror of the render shader's phosphor curve. Trail row 0 is the
/// bottom of the canvas, PNG row 0 the top, so rows flip here.
pub fn tone_map_into(trail: &[f32], width: usize, height: usize, tref: f32, out: &mut [u8]) {
    assert_eq!(trail.len(), width * height);
    assert_eq!(out.len(), width * height * 4);

    let log_ref = (1.0 + tref).ln();
    for row in 0..height {
        let src_row = height - 1 - row;
        for col in 0..width {
            let t = trail[src_row * width + col].max(0.0);
            let n = ((1.0 + t).ln() / log_ref).clamp(0.0, 1.0);
            let r = n * n * (0.30 + 0.50 * n);
            let g = n * (0.62 + 0.38 * n);
            let b = n * n * (0.25 + 0.65 * n * n);
            let p = (row * width + col) * 4;
            out[p] = (r * 255.0) as u8;
            out[p + 1] = (g * 255.0) as u8;
            out[p + 2] = (b * 255.0) as u8;
            out[p + 3] = 255;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tone_map_is_monotonic_and_bounded() {
        let trail = vec![0.0f32, 1.0, 4.0, 16.0];
        let mut out = vec![0u8; 16];
        tone_map_into(&trail, 4, 1, 16.0, &mut out);

        // Alpha opaque everywhere.
        assert!(out.chunks_exact(4).all(|p| p[3] == 255));
        // Zero trail stays black; brighter trail stays brighter (green).
        assert_eq!(out[1], 0);
        let greens: Vec<u8> = out.chunks_exact(4).map(|p| p[1]).collect();
        assert!(greens[0] < greens[1] && greens[1] < greens[2] && greens[2] < greens[3]);
        // At the reference level, green saturates.
        assert_eq!(greens[3], 255);
    }

    #[test]
    fn tone_map_flips_rows_for_png() {
        // Bottom row (trail row 0) bright, top row dark.
        let trail = vec![16.0f32, 16.0, 0.0, 0.0];
        let mut out = vec![0u8; 16];
        tone_map_into(&trail, 2, 2, 16.0, &mut out);
        // PNG row 0 (top of image) must be the dark trail row.
        assert_eq!(out[1], 0);
        assert!(out[8 + 1] > 200);
    }

    #[test]
    fn png_writes_to_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("probe.png");
        let rgba = vec![0u8; 4 * 4 * 4];
        image::save_buffer(&path, &rgba, 4, 4, image::ColorType::Rgba8).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn labels_are_sanitized() {
        assert_eq!(sanitize("dna"), "dna");
        assert_eq!(sanitize("a b/c"), "a_b_c");
    }
}
