// ============================================================================
// app.rs — atomfield
// Application state and winit event-loop handler: GPU bootstrap, per-frame
// glue between the orchestrator, HUD overlay and control panel.
// ============================================================================

use std::sync::Arc;
use std::time::Instant;

use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    keyboard::{Key, NamedKey},
    window::{Window, WindowAttributes},
};

use crate::capture::CaptureSink;
use crate::config::FieldConfig;
use crate::hud::{FpsCounter, HudRenderer};
use crate::orchestrator::Orchestrator;
use crate::panel::{render_panel, PanelLayer, PanelState};

// ======================== Application ========================

pub struct App {
    config: FieldConfig,
    state: Option<AppState>,
}

struct AppState {
    // GPU
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface: wgpu::Surface<'static>,
    surface_config: wgpu::SurfaceConfiguration,

    // Core
    orchestrator: Orchestrator,

    // Window
    window: Arc<Window>,
    started: Instant,

    // Overlays
    hud: HudRenderer,
    fps: FpsCounter,
    panel: PanelState,
    panel_layer: PanelLayer,

    // Capture
    capture: CaptureSink,
    capture_requested: bool,
}

impl App {
    pub fn new(config: FieldConfig) -> Self {
        Self {
            config,
            state: None,
        }
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &winit::event_loop::ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        let window_attrs = WindowAttributes::default()
            .with_title("atomfield")
            .with_inner_size(winit::dpi::LogicalSize::new(1280u32, 800u32));

        let window = Arc::new(event_loop.create_window(window_attrs).unwrap());

        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let surface = instance.create_surface(window.clone()).unwrap();

        let (device, queue, surface_config) =
            pollster::block_on(init_gpu(&instance, &surface, &window));

        surface.configure(&device, &surface_config);

        device.set_device_lost_callback(|reason, message| {
            log::error!("GPU device lost ({reason:?}): {message}");
        });

        let orchestrator =
            Orchestrator::new(&device, &queue, self.config.clone(), surface_config.format);
        let hud = HudRenderer::new(&device, &queue, surface_config.format);
        let panel_layer = PanelLayer::new(&device, surface_config.format, &window);
        let capture = CaptureSink::new(&self.config);

        self.state = Some(AppState {
            device,
            queue,
            surface,
            surface_config,
            orchestrator,
            window: window.clone(),
            started: Instant::now(),
            hud,
            fps: FpsCounter::new(),
            panel: PanelState::new(),
            panel_layer,
            capture,
            capture_requested: false,
        });

        // Initial redraw — required on macOS with winit 0.30.
        window.request_redraw();
    }

    fn about_to_wait(&mut self, _event_loop: &winit::event_loop::ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.window.request_redraw();
        }
    }

    fn window_event(
        &mut self,
        event_loop: &winit::event_loop::ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        let Some(state) = &mut self.state else {
            return;
        };

        let consumed = state.panel_layer.on_window_event(&state.window, &event);

        match event {
            WindowEvent::CloseRequested => event_loop.exit(),

            WindowEvent::KeyboardInput { event, .. } if !consumed => {
                handle_keyboard(state, event_loop, &event);
            }

            WindowEvent::Resized(new_size) => {
                if new_size.width > 0 && new_size.height > 0 {
                    state.surface_config.width = new_size.width;
                    state.surface_config.height = new_size.height;
                    state.surface.configure(&state.device, &state.surface_config);
                }
            }

            WindowEvent::RedrawRequested => {
                redraw(state);
            }

            _ => {}
        }
    }
}

// ======================== GPU Initialization ========================

async fn init_gpu(
    instance: &wgpu::Instance,
    surface: &wgpu::Surface<'_>,
    window: &Window,
) -> (wgpu::Device, wgpu::Queue, wgpu::SurfaceConfiguration) {
    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: Some(surface),
            force_fallback_adapter: false,
        })
        .await
        .expect(
            "Failed to find a suitable GPU adapter.\n\
             atomfield requires compute + atomics support via Vulkan, Metal, or DX12.",
        );

    log::info!("GPU: {}", adapter.get_info().name);

    let (device, queue) = adapter
        .request_device(
            &wgpu::DeviceDescriptor {
                label: Some("atomfield_device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits {
                    max_storage_buffers_per_shader_stage: 12,
                    max_storage_buffer_binding_size: 256 * 1024 * 1024,
                    ..Default::default()
                },
                memory_hints: Default::default(),
            },
            None,
        )
        .await
        .expect("Failed to create device");

    let size = window.inner_size();
    let surface_caps = surface.get_capabilities(&adapter);
    let surface_format = surface_caps
        .formats
        .iter()
        .find(|f| f.is_srgb())
        .copied()
        .unwrap_or(surface_caps.formats[0]);

    // Mailbox (uncapped, no tearing) if available, else Immediate, else Fifo.
    let present_mode = if surface_caps.present_modes.contains(&wgpu::PresentMode::Mailbox) {
        wgpu::PresentMode::Mailbox
    } else if surface_caps
        .present_modes
        .contains(&wgpu::PresentMode::Immediate)
    {
        wgpu::PresentMode::Immediate
    } else {
        wgpu::PresentMode::Fifo
    };
    log::info!("Present mode: {present_mode:?}");

    let surface_config = wgpu::SurfaceConfiguration {
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        format: surface_format,
        width: size.width.max(1),
        height: size.height.max(1),
        present_mode,
        alpha_mode: surface_caps.alpha_modes[0],
        view_formats: vec![],
        desired_maximum_frame_latency: 2,
    };

    (device, queue, surface_config)
}

// ======================== Keyboard Handling ========================

fn handle_keyboard(
    state: &mut AppState,
    event_loop: &winit::event_loop::ActiveEventLoop,
    event: &winit::event::KeyEvent,
) {
    if !event.state.is_pressed() {
        return;
    }

    match &event.logical_key {
        Key::Named(NamedKey::Escape) => event_loop.exit(),

        Key::Named(NamedKey::F1) => {
            state.panel.visible = !state.panel.visible;
        }

        Key::Named(NamedKey::Enter) => {
            let text = state.panel.input_text.clone();
            if !text.is_empty() {
                apply_submit(state, &text);
            }
        }

        Key::Character(c) => match c.as_str() {
            "p" | "P" => state.capture_requested = true,
            _ => {}
        },

        _ => {}
    }
}

fn apply_submit(state: &mut AppState, text: &str) {
    match state.orchestrator.submit(text) {
        Some(canonical) => {
            state.panel.feedback = format!("→ {canonical}");
            state.panel.input_text.clear();
        }
        None => {
            state.panel.feedback = String::from("transition in flight — try again");
        }
    }
}

// ======================== Frame Rendering ========================

fn redraw(state: &mut AppState) {
    let now_ms = state.started.elapsed().as_secs_f64() * 1000.0;
    state.fps.tick_fps(now_ms);

    // Advance the field: writes uniforms, clears accumulators, submits the
    // physics/splat/decay/bloom chain.
    state
        .orchestrator
        .tick(&state.device, &state.queue, now_ms);

    let win_w = state.surface_config.width;
    let win_h = state.surface_config.height;
    let status = state.orchestrator.status_label();
    let phase = state.orchestrator.phase_label();
    state.hud.prepare(
        &state.device,
        &state.queue,
        status,
        &phase,
        state.fps.fps(),
        win_w,
        win_h,
    );

    let output = match state.surface.get_current_texture() {
        Ok(t) => t,
        Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
            state.surface.configure(&state.device, &state.surface_config);
            return;
        }
        Err(e) => {
            log::error!("Surface error: {e:?}");
            return;
        }
    };

    let view = output
        .texture
        .create_view(&wgpu::TextureViewDescriptor::default());

    let mut encoder = state
        .device
        .create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("render_encoder"),
        });

    {
        let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("render_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &view,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            timestamp_writes: None,
            occlusion_query_set: None,
        });
        state.orchestrator.render(&mut pass);
        state.hud.render(&mut pass);
    }

    // Control panel on its own pass, composited over the field.
    let mut actions = crate::panel::PanelActions::default();
    {
        let orchestrator = &state.orchestrator;
        let panel = &mut state.panel;
        let fps = state.fps.fps();
        let transitioning = orchestrator.transitioning();
        let backend = orchestrator.nca_backend();
        panel.push_fps(fps);
        let actions_out = &mut actions;
        state.panel_layer.paint(
            &state.device,
            &state.queue,
            &mut encoder,
            &state.window,
            &view,
            win_w,
            win_h,
            |ctx| {
                *actions_out = render_panel(ctx, panel, status, &phase, backend, transitioning);
            },
        );
    }

    state.queue.submit(std::iter::once(encoder.finish()));
    output.present();
    state.hud.trim();

    // Apply panel actions after the frame is on its way.
    if let Some(text) = actions.submit {
        apply_submit(state, &text);
    }
    if actions.clear {
        state.orchestrator.clear();
        state.panel.feedback = String::from("auto-cycle resumed");
    }
    if actions.capture || state.capture_requested {
        state.capture_requested = false;
        let label = state.orchestrator.status_label();
        match state.capture.capture(
            &state.device,
            &state.queue,
            &state.orchestrator.buffers,
            &state.orchestrator.config,
            label,
        ) {
            Ok(path) => state.panel.feedback = format!("saved {}", path.display()),
            Err(e) => {
                log::error!("capture failed: {e}");
                state.panel.feedback = format!("capture failed: {e}");
            }
        }
    }

    state.window.request_redraw();
}
