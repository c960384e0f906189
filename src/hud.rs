// ============================================================================
// hud.rs — atomfield
// Phosphor-green status overlay via glyphon: resolved shape name, transition
// phase, and FPS.
// ============================================================================

use glyphon::{
    Attrs, Buffer as TextBuffer, Cache as GlyphCache, Color as GlyphColor, Family, FontSystem,
    Metrics, Resolution, Shaping, SwashCache, TextArea, TextAtlas, TextBounds, TextRenderer,
    Viewport as GlyphViewport,
};

// ======================== FPS Counter ========================

/// Exponential moving average over wall-clock frame deltas.
pub struct FpsCounter {
    last_ms: Option<f64>,
    fps: f32,
}

impl FpsCounter {
    pub fn new() -> Self {
        Self {
            last_ms: None,
            fps: 0.0,
        }
    }

    pub fn tick_fps(&mut self, now_ms: f64) {
        if let Some(last) = self.last_ms {
            let dt = ((now_ms - last) / 1000.0).max(1e-4) as f32;
            let instant = 1.0 / dt;
            self.fps = if self.fps == 0.0 {
                instant
            } else {
                self.fps * 0.95 + instant * 0.05
            };
        }
        self.last_ms = Some(now_ms);
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

// ======================== HUD Renderer ========================

/// All glyphon resources needed for HUD text rendering.
pub struct HudRenderer {
    font_system: FontSystem,
    swash_cache: SwashCache,
    glyph_viewport: GlyphViewport,
    text_atlas: TextAtlas,
    text_renderer: TextRenderer,
}

impl HudRenderer {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let mut font_system = FontSystem::new();
        let swash_cache = SwashCache::new();
        let glyph_cache = GlyphCache::new(device);
        let glyph_viewport = GlyphViewport::new(device, &glyph_cache);
        let mut text_atlas = TextAtlas::new(device, queue, &glyph_cache, surface_format);
        let text_renderer =
            TextRenderer::new(&mut text_atlas, device, wgpu::MultisampleState::default(), None);

        // Prime the font system so the first frame renders correctly.
        let mut primer = TextBuffer::new(&mut font_system, Metrics::new(16.0, 20.0));
        primer.set_text(
            &mut font_system,
            "atomfield",
            Attrs::new().family(Family::Monospace),
            Shaping::Basic,
        );

        Self {
            font_system,
            swash_cache,
            glyph_viewport,
            text_atlas,
            text_renderer,
        }
    }

    /// Prepare HUD text for the current frame.
    pub fn prepare(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        status: &str,
        phase: &str,
        fps: f32,
        win_w: u32,
        win_h: u32,
    ) {
        self.glyph_viewport.update(
            queue,
            Resolution {
                width: win_w,
                height: win_h,
            },
        );

        let hud_text =
            format!("{status}\n{phase}\nfps {fps:.0}\nF1 panel · Enter submit · P capture");

        let mut text_buf = TextBuffer::new(&mut self.font_system, Metrics::new(14.0, 18.0));
        text_buf.set_size(&mut self.font_system, Some(win_w as f32), Some(win_h as f32));
        text_buf.set_text(
            &mut self.font_system,
            &hud_text,
            Attrs::new().family(Family::Monospace),
            Shaping::Basic,
        );
        text_buf.shape_until_scroll(&mut self.font_system, false);

        self.text_renderer
            .prepare(
                device,
                queue,
                &mut self.font_system,
                &mut self.text_atlas,
                &self.glyph_viewport,
                [TextArea {
                    buffer: &text_buf,
                    left: 10.0,
                    top: 10.0,
                    scale: 1.0,
                    bounds: TextBounds {
                        left: 0,
                        top: 0,
                        right: win_w as i32,
                        bottom: win_h as i32,
                    },
                    default_color: GlyphColor::rgb(120, 245, 160),
                    custom_glyphs: &[],
                }],
                &mut self.swash_cache,
            )
            .unwrap();
    }

    /// Render the HUD overlay into an active render pass.
    pub fn render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        self.text_renderer
            .render(&self.text_atlas, &self.glyph_viewport, pass)
            .unwrap();
    }

    /// Trim the glyph atlas after presenting.
    pub fn trim(&mut self) {
        self.text_atlas.trim();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fps_counter_converges_to_frame_rate() {
        let mut counter = FpsCounter::new();
        let mut now = 0.0f64;
        for _ in 0..500 {
            counter.tick_fps(now);
            now += 16.0; // ~62.5 fps
        }
        assert!((counter.fps() - 62.5).abs() < 2.0, "got {}", counter.fps());
    }

    #[test]
    fn first_tick_reports_zero() {
        let mut counter = FpsCounter::new();
        counter.tick_fps(100.0);
        assert_eq!(counter.fps(), 0.0);
    }
}
