// ============================================================================
// panel.rs — atomfield
// egui control panel: shape text input, canonical shape list, phase/status
// readout, FPS plot, and the egui-wgpu/winit plumbing that paints it over
// the field.
// ============================================================================

use egui_plot::{Line, Plot, PlotPoints};
use winit::window::Window;

use crate::shapes::CANONICAL_SHAPES;

const FPS_HISTORY_LEN: usize = 240;

// ======================== Panel state & actions ========================

/// What the user asked for this frame.
#[derive(Default)]
pub struct PanelActions {
    pub submit: Option<String>,
    pub clear: bool,
    pub capture: bool,
}

pub struct PanelState {
    pub visible: bool,
    pub input_text: String,
    pub feedback: String,
    fps_history: Vec<f32>,
}

impl PanelState {
    pub fn new() -> Self {
        Self {
            visible: true,
            input_text: String::new(),
            feedback: String::new(),
            fps_history: Vec::with_capacity(FPS_HISTORY_LEN),
        }
    }

    pub fn push_fps(&mut self, fps: f32) {
        if self.fps_history.len() == FPS_HISTORY_LEN {
            self.fps_history.remove(0);
        }
        self.fps_history.push(fps);
    }
}

/// Build the side panel UI. Pure egui; the caller applies the actions.
pub fn render_panel(
    ctx: &egui::Context,
    state: &mut PanelState,
    status: &str,
    phase: &str,
    backend: &str,
    transitioning: bool,
) -> PanelActions {
    let mut actions = PanelActions::default();
    if !state.visible {
        return actions;
    }

    egui::SidePanel::left("control_panel")
        .default_width(240.0)
        .min_width(200.0)
        .max_width(340.0)
        .show(ctx, |ui| {
            egui::ScrollArea::vertical().show(ui, |ui| {
                ui.heading("atomfield");
                ui.separator();

                ui.label(egui::RichText::new(format!("shape: {status}")).strong());
                ui.label(format!("phase: {phase}"));
                ui.label(format!("nca: {backend}"));
                if !state.feedback.is_empty() {
                    ui.label(
                        egui::RichText::new(&state.feedback)
                            .small()
                            .color(egui::Color32::from_rgb(150, 220, 150)),
                    );
                }
                ui.separator();

                ui.horizontal(|ui| {
                    let edit = ui.add(
                        egui::TextEdit::singleline(&mut state.input_text)
                            .hint_text("shape name…")
                            .desired_width(140.0),
                    );
                    let submitted =
                        edit.lost_focus() && ui.input(|i| i.key_pressed(egui::Key::Enter));
                    if (ui.button("Go").clicked() || submitted) && !state.input_text.is_empty() {
                        actions.submit = Some(state.input_text.clone());
                    }
                });
                ui.horizontal(|ui| {
                    if ui.button("Clear").clicked() {
                        actions.clear = true;
                    }
                    if ui.button("Capture").clicked() {
                        actions.capture = true;
                    }
                    if transitioning {
                        ui.spinner();
                    }
                });
                ui.separator();

                ui.collapsing("Shapes", |ui| {
                    ui.horizontal_wrapped(|ui| {
                        for name in CANONICAL_SHAPES {
                            if ui.small_button(*name).clicked() {
                                actions.submit = Some((*name).to_string());
                            }
                        }
                    });
                });
                ui.separator();

                ui.label("fps");
                let points: PlotPoints = state
                    .fps_history
                    .iter()
                    .enumerate()
                    .map(|(i, &f)| [i as f64, f as f64])
                    .collect();
                Plot::new("fps_plot")
                    .height(60.0)
                    .show_axes([false, true])
                    .allow_drag(false)
                    .allow_zoom(false)
                    .allow_scroll(false)
                    .show(ui, |plot| {
                        plot.line(Line::new(points).name("fps"));
                    });

                ui.add_space(8.0);
            });
        });

    actions
}

// ======================== egui <-> wgpu plumbing ========================

/// Owns the egui context, winit state, and wgpu renderer for the panel layer.
pub struct PanelLayer {
    pub ctx: egui::Context,
    winit_state: egui_winit::State,
    renderer: egui_wgpu::Renderer,
}

impl PanelLayer {
    pub fn new(device: &wgpu::Device, surface_format: wgpu::TextureFormat, window: &Window) -> Self {
        let ctx = egui::Context::default();
        let winit_state = egui_winit::State::new(
            ctx.clone(),
            egui::ViewportId::ROOT,
            window,
            None,
            None,
            None,
        );
        let renderer = egui_wgpu::Renderer::new(device, surface_format, None, 1, false);
        Self {
            ctx,
            winit_state,
            renderer,
        }
    }

    /// Feed a window event; returns true when egui consumed it.
    pub fn on_window_event(&mut self, window: &Window, event: &winit::event::WindowEvent) -> bool {
        self.winit_state.on_window_event(window, event).consumed
    }

    /// Run the UI closure and paint the result on top of the frame.
    #[allow(clippy::too_many_arguments)]
    pub fn paint(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        encoder: &mut wgpu::CommandEncoder,
        window: &Window,
        view: &wgpu::TextureView,
        width: u32,
        height: u32,
        mut ui: impl FnMut(&egui::Context),
    ) {
        let raw_input = self.winit_state.take_egui_input(window);
        let output = self.ctx.run(raw_input, |ctx| ui(ctx));
        self.winit_state
            .handle_platform_output(window, output.platform_output);

        let pixels_per_point = self.ctx.pixels_per_point();
        let paint_jobs = self.ctx.tessellate(output.shapes, pixels_per_point);
        let screen = egui_wgpu::ScreenDescriptor {
            size_in_pixels: [width, height],
            pixels_per_point,
        };

        for (id, delta) in &output.textures_delta.set {
            self.renderer.update_texture(device, queue, *id, delta);
        }
        self.renderer
            .update_buffers(device, queue, encoder, &paint_jobs, &screen);

        {
            let mut pass = encoder
                .begin_render_pass(&wgpu::RenderPassDescriptor {
                    label: Some("panel_pass"),
                    color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                        view,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    })],
                    depth_stencil_attachment: None,
                    timestamp_writes: None,
                    occlusion_query_set: None,
                })
                .forget_lifetime();
            self.renderer.render(&mut pass, &paint_jobs, &screen);
        }

        for id in &output.textures_delta.free {
            self.renderer.free_texture(id);
        }
    }
}
