// ============================================================================
// orchestrator.rs — atomfield
// Owns the control state machine (wander -> transition -> morph -> hold ->
// auto-advance), pumps the staged transition pipeline, and coordinates all
// GPU submissions. Exactly one transition may be in flight at a time; new
// requests are rejected, never queued.
// ============================================================================

use rand::rngs::ThreadRng;

use crate::buffers::{FieldBuffers, SimParams};
use crate::config::{FieldConfig, MAX_DT};
use crate::nca::NcaEngine;
use crate::ot::{match_centroids, pair_targets, OtEngine, PairingScratch};
use crate::pipeline::{create_frame_pipelines, FramePipelines};
use crate::sampler::Sampler;
use crate::shaders::ShaderDefines;
use crate::shapes::{resolve, ShapeLibrary, CANONICAL_SHAPES};

/// NCA steps dispatched per tick while a transition grows its density field.
const NCA_STEPS_PER_TICK: u32 = 16;

/// Reference smoothstep; the physics kernel computes the same curve.
pub fn smoothstep(t: f32) -> f32 {
    let t = t.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

// ======================== Clock (pure state machine) ========================

/// What the clock wants done after a tick.
#[derive(Debug, PartialEq, Eq)]
pub enum ClockAction {
    None,
    AutoAdvance,
}

/// Morph/hold bookkeeping, separated from GPU concerns. `has_targets` mirrors
/// the kernel-side mode switch; `morph_t` only ever moves forward until a new
/// morph resets it.
pub struct FieldClock {
    pub time: f32,
    pub dt: f32,
    pub has_targets: bool,
    pub morph_t: f32,
    pub hold: f32,
    pub user_controlled: bool,
    morph_duration: f32,
    hold_duration: f32,
}

impl FieldClock {
    pub fn new(morph_duration: f32, hold_duration: f32) -> Self {
        Self {
            time: 0.0,
            dt: 0.0,
            has_targets: false,
            morph_t: 0.0,
            hold: 0.0,
            user_controlled: false,
            morph_duration,
            hold_duration,
        }
    }

    /// Advance by a raw frame delta (seconds). `transitioning` suppresses
    /// auto-advance while a transition pipeline is in flight.
    pub fn tick(&mut self, raw_dt: f32, transitioning: bool) -> ClockAction {
        let dt = raw_dt.clamp(0.0, MAX_DT);
        self.dt = dt;
        self.time += dt;

        if !self.has_targets {
            // Wander: the auto-cycle timer is not running.
            return ClockAction::None;
        }
        if self.morph_t < 1.0 {
            self.morph_t = (self.morph_t + dt / self.morph_duration).min(1.0);
            return ClockAction::None;
        }
        self.hold += dt;
        if !self.user_controlled && !transitioning && self.hold >= self.hold_duration {
            return ClockAction::AutoAdvance;
        }
        ClockAction::None
    }

    /// Commit a new morph: endpoints are in place, restart the ramp.
    pub fn begin_morph(&mut self) {
        self.has_targets = true;
        self.morph_t = 0.0;
        self.hold = 0.0;
    }

    pub fn sim_params(&self) -> SimParams {
        SimParams {
            dt: self.dt,
            time: self.time,
            has_targets: if self.has_targets { 1.0 } else { 0.0 },
            morph_t: self.morph_t,
        }
    }
}

// ======================== Transition task ========================

#[derive(Copy, Clone)]
enum TransitionStage {
    /// Read current atom positions back as the morph source cloud.
    CaptureSource,
    /// Pump NCA growth, a chunk of steps per tick.
    Grow,
    /// Extract channel 0 and read the alpha grid back.
    ExtractAlpha,
    /// Importance-sample raw target positions, upload the source cloud.
    Sample,
    /// k-means on the source cloud, one iteration per tick.
    ClusterSource { iter: u32 },
    /// k-means on the target cloud.
    ClusterTarget { iter: u32 },
    /// Centroid matching + round-robin pairing, then commit endpoints.
    MatchAndPair,
}

struct TransitionTask {
    shape: &'static str,
    stage: TransitionStage,
}

// ======================== Orchestrator ========================

pub struct Orchestrator {
    pub config: FieldConfig,
    pub buffers: FieldBuffers,
    pipelines: FramePipelines,
    nca: NcaEngine,
    ot: OtEngine,
    library: ShapeLibrary,
    sampler: Sampler,

    pub clock: FieldClock,
    frame: u64,
    last_tick_ms: Option<f64>,
    current_shape: Option<&'static str>,
    cycle_index: usize,
    task: Option<TransitionTask>,

    // Preallocated CPU mirrors and scratch; the frame loop allocates nothing.
    cpu_source: Vec<[f32; 2]>,
    cpu_raw_targets: Vec<[f32; 2]>,
    cpu_assigned: Vec<[f32; 2]>,
    alpha: Vec<f32>,
    source_labels: Vec<u32>,
    target_labels: Vec<u32>,
    source_centroids: Vec<[f32; 2]>,
    target_centroids: Vec<[f32; 2]>,
    matching: Vec<u32>,
    pairing: PairingScratch,
    rng: ThreadRng,
}

impl Orchestrator {
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        config: FieldConfig,
        surface_format: wgpu::TextureFormat,
    ) -> Self {
        let defines = ShaderDefines::from_config(&config);
        let buffers = FieldBuffers::new(device, &config);
        let pipelines = create_frame_pipelines(device, &defines, &buffers, &config, surface_format);
        let nca = NcaEngine::new(device, queue, &defines, &buffers, &config);
        let ot = OtEngine::new(device, &defines, &buffers, &config);

        let n = config.atom_count as usize;
        let k = config.centroids as usize;
        let cells = config.grid_cells() as usize;

        log::info!(
            "atomfield: {} atoms, {}x{} display, {}x{} grid, K={}, nca={}, scale={}, trail half-life {:.1} frames",
            config.atom_count,
            config.display_w,
            config.display_h,
            config.grid_w,
            config.grid_h,
            config.centroids,
            nca.backend_name(),
            config.fixed_point_scale(),
            config.trail_half_life(),
        );

        Self {
            clock: FieldClock::new(config.morph_duration, config.hold_duration),
            library: ShapeLibrary::new(config.grid_w, config.grid_h),
            sampler: Sampler::new(config.grid_w, config.grid_h),
            pipelines,
            nca,
            ot,
            frame: 0,
            last_tick_ms: None,
            current_shape: None,
            // First auto-advance lands on the head of the registry.
            cycle_index: CANONICAL_SHAPES.len() - 1,
            task: None,
            cpu_source: Vec::with_capacity(n),
            cpu_raw_targets: Vec::with_capacity(n),
            cpu_assigned: Vec::with_capacity(n),
            alpha: Vec::with_capacity(cells),
            source_labels: Vec::with_capacity(n),
            target_labels: Vec::with_capacity(n),
            source_centroids: Vec::with_capacity(k),
            target_centroids: Vec::with_capacity(k),
            matching: Vec::with_capacity(k),
            pairing: PairingScratch::new(k, n),
            rng: rand::thread_rng(),
            buffers,
            config,
        }
    }

    // ======================== Control interface ========================

    /// Initiate a transition to the named shape. Returns the resolved
    /// canonical name, or None when a transition is already in flight.
    pub fn submit(&mut self, text: &str) -> Option<&'static str> {
        let name = self.goto_shape(text)?;
        self.clock.user_controlled = true;
        Some(name)
    }

    /// Release user control and immediately advance the auto-cycle.
    pub fn clear(&mut self) {
        self.clock.user_controlled = false;
        self.advance_cycle();
    }

    fn goto_shape(&mut self, text: &str) -> Option<&'static str> {
        if self.task.is_some() {
            log::debug!("transition in flight; request {text:?} rejected");
            return None;
        }
        let shape = resolve(text);
        self.task = Some(TransitionTask {
            shape,
            stage: TransitionStage::CaptureSource,
        });
        log::info!("transition -> {shape}");
        Some(shape)
    }

    fn advance_cycle(&mut self) {
        if self.task.is_some() {
            return;
        }
        self.cycle_index = (self.cycle_index + 1) % CANONICAL_SHAPES.len();
        let name = CANONICAL_SHAPES[self.cycle_index];
        self.goto_shape(name);
    }

    // ======================== Frame tick ========================

    /// One animation frame: advance the clock, pump at most one transition
    /// stage, write the sim uniform, clear the per-frame accumulators, and
    /// submit the compute chain. Fire-and-forget; rendering happens in the
    /// caller's render pass via [`Orchestrator::render`].
    pub fn tick(&mut self, device: &wgpu::Device, queue: &wgpu::Queue, now_ms: f64) {
        let raw_dt = match self.last_tick_ms {
            Some(last) => ((now_ms - last) / 1000.0) as f32,
            None => 0.0,
        };
        self.last_tick_ms = Some(now_ms);

        if self.clock.tick(raw_dt.max(0.0), self.task.is_some()) == ClockAction::AutoAdvance {
            self.advance_cycle();
        }

        self.pump_transition(device, queue);

        self.buffers.write_sim_params(queue, &self.clock.sim_params());
        self.buffers.clear_frame_accumulators(queue);

        let slot = (self.frame & 1) as usize;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("frame_encoder"),
        });
        self.pipelines.encode_frame(&mut encoder, slot);
        queue.submit(std::iter::once(encoder.finish()));

        self.frame += 1;
    }

    /// Draw the field into an active render pass.
    pub fn render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        self.pipelines.render(pass);
    }

    // ======================== Transition pump ========================

    fn pump_transition(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let (shape, stage) = match &self.task {
            Some(task) => (task.shape, task.stage),
            None => return,
        };

        // None means the task ended this tick (committed or aborted).
        let next = match stage {
            TransitionStage::CaptureSource => {
                // Latest positions sit in the slot this frame's physics reads.
                let slot = (self.frame & 1) as usize;
                if !self
                    .buffers
                    .readback_positions(device, queue, slot, &mut self.cpu_source)
                {
                    log::error!("source readback failed; transition aborted");
                    None
                } else {
                    let goal = self.library.generate(shape);
                    self.nca.begin(queue, &self.buffers, &goal, &mut self.rng);
                    Some(TransitionStage::Grow)
                }
            }
            TransitionStage::Grow => {
                self.nca
                    .advance(device, queue, &self.buffers, NCA_STEPS_PER_TICK);
                if self.nca.is_grown() {
                    Some(TransitionStage::ExtractAlpha)
                } else {
                    Some(TransitionStage::Grow)
                }
            }
            TransitionStage::ExtractAlpha => {
                self.nca.extract(device, queue);
                if !self.buffers.readback_alpha(device, queue, &mut self.alpha) {
                    log::error!("alpha readback failed; transition aborted");
                    None
                } else {
                    Some(TransitionStage::Sample)
                }
            }
            TransitionStage::Sample => {
                self.sampler.sample_into(
                    &self.alpha,
                    self.config.atom_count as usize,
                    &mut self.rng,
                    &mut self.cpu_raw_targets,
                );
                self.ot.upload_cloud(queue, &self.buffers, &self.cpu_source);
                Some(TransitionStage::ClusterSource { iter: 0 })
            }
            TransitionStage::ClusterSource { iter } => {
                self.ot.iterate(device, queue, &self.buffers);
                if iter + 1 < self.config.kmeans_iters {
                    Some(TransitionStage::ClusterSource { iter: iter + 1 })
                } else if !self.ot.finalize_cloud(
                    device,
                    queue,
                    &self.buffers,
                    &mut self.source_labels,
                    &mut self.source_centroids,
                ) {
                    log::error!("source cluster readback failed; transition aborted");
                    None
                } else {
                    self.ot
                        .upload_cloud(queue, &self.buffers, &self.cpu_raw_targets);
                    Some(TransitionStage::ClusterTarget { iter: 0 })
                }
            }
            TransitionStage::ClusterTarget { iter } => {
                self.ot.iterate(device, queue, &self.buffers);
                if iter + 1 < self.config.kmeans_iters {
                    Some(TransitionStage::ClusterTarget { iter: iter + 1 })
                } else if !self.ot.finalize_cloud(
                    device,
                    queue,
                    &self.buffers,
                    &mut self.target_labels,
                    &mut self.target_centroids,
                ) {
                    log::error!("target cluster readback failed; transition aborted");
                    None
                } else {
                    Some(TransitionStage::MatchAndPair)
                }
            }
            TransitionStage::MatchAndPair => {
                match_centroids(
                    &self.source_centroids,
                    &self.target_centroids,
                    &mut self.matching,
                );
                pair_targets(
                    &self.source_labels,
                    &self.matching,
                    &self.target_labels,
                    &self.cpu_raw_targets,
                    &self.target_centroids,
                    &mut self.pairing,
                    &mut self.cpu_assigned,
                );

                // Commit: endpoints to the GPU, restart the morph ramp.
                queue.write_buffer(
                    &self.buffers.source,
                    0,
                    bytemuck::cast_slice(&self.cpu_source),
                );
                queue.write_buffer(
                    &self.buffers.target,
                    0,
                    bytemuck::cast_slice(&self.cpu_assigned),
                );
                self.clock.begin_morph();
                self.current_shape = Some(shape);
                log::info!("morph -> {shape} started");
                None
            }
        };

        match next {
            Some(stage) => {
                if let Some(task) = self.task.as_mut() {
                    task.stage = stage;
                }
            }
            None => self.task = None,
        }
    }

    // ======================== HUD outputs ========================

    pub fn status_label(&self) -> &'static str {
        self.current_shape.unwrap_or("wandering")
    }

    pub fn transitioning(&self) -> bool {
        self.task.is_some()
    }

    pub fn nca_backend(&self) -> &'static str {
        self.nca.backend_name()
    }

    /// Phase line for the HUD: the executing transition stage, or the morph
    /// and hold progress once endpoints are committed.
    pub fn phase_label(&self) -> String {
        if let Some(task) = &self.task {
            return match task.stage {
                TransitionStage::CaptureSource => String::from("capture · source cloud"),
                TransitionStage::Grow | TransitionStage::ExtractAlpha => {
                    String::from("nca · growing")
                }
                TransitionStage::Sample => String::from("sampling · inverse cdf"),
                TransitionStage::ClusterSource { iter } => {
                    format!("ot · k-means (src {}/{})", iter + 1, self.config.kmeans_iters)
                }
                TransitionStage::ClusterTarget { iter } => {
                    format!("ot · k-means (dst {}/{})", iter + 1, self.config.kmeans_iters)
                }
                TransitionStage::MatchAndPair => String::from("ot · pairing"),
            };
        }
        if self.clock.has_targets {
            if self.clock.morph_t < 1.0 {
                format!("morph {:.0}%", smoothstep(self.clock.morph_t) * 100.0)
            } else {
                format!("hold {:.1}s", self.clock.hold)
            }
        } else {
            String::from("wander")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smoothstep_endpoints_and_midpoint() {
        assert_eq!(smoothstep(0.0), 0.0);
        assert_eq!(smoothstep(1.0), 1.0);
        assert!((smoothstep(0.5) - 0.5).abs() < 1e-6);
        // Out-of-range input clamps.
        assert_eq!(smoothstep(-2.0), 0.0);
        assert_eq!(smoothstep(3.0), 1.0);
        // The exact cubic: s(0.25) = 0.25^2 * (3 - 0.5).
        assert!((smoothstep(0.25) - 0.15625).abs() < 1e-6);
    }

    #[test]
    fn dt_is_clamped() {
        let mut clock = FieldClock::new(2.0, 3.5);
        clock.tick(10.0, false);
        assert!(clock.dt <= MAX_DT);
        assert!(clock.time <= MAX_DT);
    }

    #[test]
    fn wander_never_auto_advances() {
        let mut clock = FieldClock::new(2.0, 0.1);
        for _ in 0..1000 {
            assert_eq!(clock.tick(0.016, false), ClockAction::None);
        }
    }

    #[test]
    fn morph_ramps_then_holds_then_advances() {
        let mut clock = FieldClock::new(1.0, 0.5);
        clock.begin_morph();
        assert!(clock.has_targets);

        // Morph phase: morph_t rises monotonically to exactly 1.
        let mut steps = 0;
        while clock.morph_t < 1.0 {
            let before = clock.morph_t;
            assert_eq!(clock.tick(0.02, false), ClockAction::None);
            assert!(clock.morph_t >= before);
            steps += 1;
            assert!(steps < 100, "morph never completed");
        }
        assert_eq!(clock.morph_t, 1.0);

        // Hold phase accumulates, then requests an auto-advance.
        let mut action = ClockAction::None;
        for _ in 0..100 {
            action = clock.tick(0.02, false);
            if action == ClockAction::AutoAdvance {
                break;
            }
        }
        assert_eq!(action, ClockAction::AutoAdvance);
        assert!(clock.hold >= 0.5);
    }

    #[test]
    fn hold_does_not_advance_while_transitioning_or_user_controlled() {
        let mut clock = FieldClock::new(1.0, 0.1);
        clock.begin_morph();
        clock.morph_t = 1.0;

        // In-flight transition suppresses the auto-cycle.
        for _ in 0..50 {
            assert_eq!(clock.tick(0.05, true), ClockAction::None);
        }

        // User control suppresses it too.
        clock.user_controlled = true;
        for _ in 0..50 {
            assert_eq!(clock.tick(0.05, false), ClockAction::None);
        }

        // Releasing control resumes the timer.
        clock.user_controlled = false;
        assert_eq!(clock.tick(0.05, false), ClockAction::AutoAdvance);
    }

    #[test]
    fn begin_morph_resets_ramp_and_hold() {
        let mut clock = FieldClock::new(1.0, 1.0);
        clock.begin_morph();
        clock.tick(0.5, false);
        clock.tick(0.5, false);
        assert!(clock.morph_t > 0.0);
        clock.begin_morph();
        assert_eq!(clock.morph_t, 0.0);
        assert_eq!(clock.hold, 0.0);
    }

    #[test]
    fn sim_params_mirror_clock_state() {
        let mut clock = FieldClock::new(2.0, 3.5);
        let params = clock.sim_params();
        assert_eq!(params.has_targets, 0.0);
        clock.begin_morph();
        let params = clock.sim_params();
        assert_eq!(params.has_targets, 1.0);
        assert_eq!(params.morph_t, 0.0);
    }
}
