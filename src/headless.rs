// ============================================================================
// headless.rs — atomfield
// Windowless batch runner: drives the full frame loop and auto-cycle with a
// synthetic clock, for soak runs and capture sequences on machines without a
// display.
// ============================================================================

use std::time::Instant;

use crate::capture::CaptureSink;
use crate::config::FieldConfig;
use crate::orchestrator::Orchestrator;

#[derive(Clone, Debug)]
pub struct HeadlessConfig {
    pub frames: u32,
    pub progress_interval: u32,
    pub capture_every: u32,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            frames: 3_600,
            progress_interval: 600,
            capture_every: 0,
        }
    }
}

pub fn run_headless(field_config: &FieldConfig, config: &HeadlessConfig) -> Result<(), String> {
    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });

    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| String::from("Failed to get GPU adapter for headless mode"))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            label: Some("atomfield_headless_device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits {
                max_storage_buffers_per_shader_stage: 12,
                max_storage_buffer_binding_size: 256 * 1024 * 1024,
                ..Default::default()
            },
            memory_hints: Default::default(),
        },
        None,
    ))
    .map_err(|e| format!("Failed to create headless device: {e}"))?;

    let mut orchestrator = Orchestrator::new(
        &device,
        &queue,
        field_config.clone(),
        wgpu::TextureFormat::Rgba8Unorm,
    );
    let mut capture = CaptureSink::new(field_config);

    // Kick the auto-cycle immediately; nobody is around to type a shape.
    orchestrator.clear();

    log::info!(
        "Headless run started: {} frames, capture every {}",
        config.frames,
        config.capture_every
    );

    let started = Instant::now();
    let mut last_report = Instant::now();
    let mut last_report_frame = 0u32;
    let mut now_ms = 0.0f64;

    for step in 0..config.frames {
        now_ms += 1000.0 / 60.0;
        orchestrator.tick(&device, &queue, now_ms);

        if config.capture_every > 0 && step > 0 && step % config.capture_every == 0 {
            let label = orchestrator.status_label();
            if let Err(e) = capture.capture(
                &device,
                &queue,
                &orchestrator.buffers,
                &orchestrator.config,
                label,
            ) {
                log::error!("capture failed at frame {step}: {e}");
            }
        }

        if config.progress_interval > 0 && (step + 1) % config.progress_interval == 0 {
            let done = step + 1;
            let total_elapsed = started.elapsed().as_secs_f64().max(1e-6);
            let total_fps = done as f64 / total_elapsed;

            let window_elapsed = last_report.elapsed().as_secs_f64().max(1e-6);
            let window_frames = done - last_report_frame;
            let window_fps = window_frames as f64 / window_elapsed;

            let remaining = config.frames.saturating_sub(done);
            let eta_secs = if total_fps > 1e-6 {
                remaining as f64 / total_fps
            } else {
                0.0
            };

            log::info!(
                "Headless progress: {}/{} | fps={:.0} (window {:.0}) | ETA={:.1} min | {} [{}]",
                done,
                config.frames,
                total_fps,
                window_fps,
                eta_secs / 60.0,
                orchestrator.status_label(),
                orchestrator.phase_label(),
            );

            last_report = Instant::now();
            last_report_frame = done;
        }
    }

    log::info!(
        "Headless run finished: {} frames in {:.1}s",
        config.frames,
        started.elapsed().as_secs_f64()
    );
    Ok(())
}
