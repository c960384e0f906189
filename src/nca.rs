// ============================================================================
// nca.rs — atomfield
// Neural cellular automaton: grows an organic density field from a parametric
// goal grid. Two back-ends behind one protocol — a learned per-cell MLP when
// weight data loads, a reaction–diffusion system otherwise. The choice is
// fixed for the process lifetime.
// ============================================================================

use rand::Rng;
use serde::Deserialize;

use crate::buffers::FieldBuffers;
use crate::config::{FieldConfig, NCA_CHANNELS, NCA_FEATURES, NCA_HIDDEN, WORKGROUP_X, WORKGROUP_Y};
use crate::shaders::{
    bg_buffer, bgl_storage_ro, bgl_storage_rw, bgl_uniform, create_compute_pipeline, load_shader,
    ShaderDefines,
};

/// Noise amplitude added to the goal when seeding the fallback field.
const RDS_SEED_NOISE: f32 = 0.08;

// ======================== Weight loading ========================

/// Weight arrays arrive either as nested rows (row-major) or pre-flattened.
#[derive(Deserialize)]
#[serde(untagged)]
enum WeightArray {
    Rows(Vec<Vec<f32>>),
    Flat(Vec<f32>),
}

impl WeightArray {
    fn flatten(self, rows: usize, cols: usize, name: &str) -> Result<Vec<f32>, String> {
        let flat = match self {
            WeightArray::Rows(r) => {
                if r.len() != rows {
                    return Err(format!("{name}: expected {rows} rows, got {}", r.len()));
                }
                for (i, row) in r.iter().enumerate() {
                    if row.len() != cols {
                        return Err(format!(
                            "{name}: row {i} has {} entries, expected {cols}",
                            row.len()
                        ));
                    }
                }
                r.into_iter().flatten().collect()
            }
            WeightArray::Flat(f) => f,
        };
        if flat.len() != rows * cols {
            return Err(format!(
                "{name}: expected {} values, got {}",
                rows * cols,
                flat.len()
            ));
        }
        Ok(flat)
    }
}

#[derive(Deserialize)]
struct WeightFile {
    w1: WeightArray,
    b1: Vec<f32>,
    w2: WeightArray,
    b2: Vec<f32>,
}

/// Read and validate the weight file, packing the four arrays into the flat
/// layout the MLP kernel indexes: w1, b1, w2, b2.
pub fn load_weights(path: &str) -> Result<Vec<f32>, String> {
    let raw = std::fs::read_to_string(path).map_err(|e| format!("read {path}: {e}"))?;
    let file: WeightFile =
        serde_json::from_str(&raw).map_err(|e| format!("parse {path}: {e}"))?;
    pack_weights(file)
}

fn pack_weights(file: WeightFile) -> Result<Vec<f32>, String> {
    let h = NCA_HIDDEN as usize;
    let features = NCA_FEATURES as usize;
    let channels = NCA_CHANNELS as usize;

    let w1 = file.w1.flatten(h, features, "w1")?;
    if file.b1.len() != h {
        return Err(format!("b1: expected {h} values, got {}", file.b1.len()));
    }
    let w2 = file.w2.flatten(channels, h, "w2")?;
    if file.b2.len() != channels {
        return Err(format!(
            "b2: expected {channels} values, got {}",
            file.b2.len()
        ));
    }

    let mut packed = Vec::with_capacity(w1.len() + h + w2.len() + channels);
    packed.extend_from_slice(&w1);
    packed.extend_from_slice(&file.b1);
    packed.extend_from_slice(&w2);
    packed.extend_from_slice(&file.b2);
    Ok(packed)
}

// ======================== Engine ========================

struct NcaPipelines {
    step: wgpu::ComputePipeline,
    extract: wgpu::ComputePipeline,
    // Indexed by the slot the step reads from.
    bind_groups: [wgpu::BindGroup; 2],
}

/// Tagged back-end variant; both produce a grid_w × grid_h alpha in [0,1].
pub enum NcaEngine {
    Mlp(NcaRunner),
    Rds(NcaRunner),
}

/// Shared GPU driver for one back-end.
pub struct NcaRunner {
    pipelines: NcaPipelines,
    total_steps: u32,
    steps_done: u32,
    slot: usize,
    dispatch: (u32, u32),
    seed_scratch: Vec<f32>,
    zero_state: Vec<f32>,
}

impl NcaEngine {
    /// Build the engine, preferring the MLP when the weight file loads.
    pub fn new(
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        defines: &ShaderDefines,
        buffers: &FieldBuffers,
        config: &FieldConfig,
    ) -> Self {
        match load_weights(&config.weights_path) {
            Ok(packed) => {
                queue.write_buffer(&buffers.nca_weights, 0, bytemuck::cast_slice(&packed));
                log::info!(
                    "nca: learned back-end, {} weights from {}",
                    packed.len(),
                    config.weights_path
                );
                NcaEngine::Mlp(NcaRunner::new_mlp(device, defines, buffers, config))
            }
            Err(reason) => {
                log::warn!(
                    "nca: weight data unavailable ({reason}); using reaction-diffusion fallback"
                );
                NcaEngine::Rds(NcaRunner::new_rds(device, defines, buffers, config))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            NcaEngine::Mlp(_) => "mlp",
            NcaEngine::Rds(_) => "rds",
        }
    }

    fn runner(&mut self) -> &mut NcaRunner {
        match self {
            NcaEngine::Mlp(r) | NcaEngine::Rds(r) => r,
        }
    }

    fn runner_ref(&self) -> &NcaRunner {
        match self {
            NcaEngine::Mlp(r) | NcaEngine::Rds(r) => r,
        }
    }

    /// Seed the state pair for a new goal and reset the step counter.
    pub fn begin(
        &mut self,
        queue: &wgpu::Queue,
        buffers: &FieldBuffers,
        goal: &[f32],
        rng: &mut impl Rng,
    ) {
        queue.write_buffer(&buffers.nca_goal, 0, bytemuck::cast_slice(goal));
        let mlp = matches!(self, NcaEngine::Mlp(_));
        let runner = self.runner();
        runner.steps_done = 0;
        runner.slot = 0;
        if mlp {
            // Learned back-end grows from a blank state.
            queue.write_buffer(
                &buffers.nca_state[0],
                0,
                bytemuck::cast_slice(&runner.zero_state),
            );
        } else {
            // Fallback seeds directly from the goal plus noise.
            runner.seed_scratch.clear();
            for &g in goal {
                let noise = (rng.gen::<f32>() * 2.0 - 1.0) * RDS_SEED_NOISE;
                runner.seed_scratch.push((g + noise).clamp(0.0, 1.0));
            }
            queue.write_buffer(
                &buffers.nca_state[0],
                0,
                bytemuck::cast_slice(&runner.seed_scratch),
            );
        }
    }

    /// Dispatch up to `chunk` steps; returns (done, total).
    pub fn advance(
        &mut self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffers: &FieldBuffers,
        chunk: u32,
    ) -> (u32, u32) {
        let runner = self.runner();
        let remaining = runner.total_steps - runner.steps_done;
        for _ in 0..chunk.min(remaining) {
            buffers.write_nca_step(queue, runner.steps_done);
            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("nca_step_encoder"),
            });
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("nca_step_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&runner.pipelines.step);
                pass.set_bind_group(0, &runner.pipelines.bind_groups[runner.slot], &[]);
                pass.dispatch_workgroups(runner.dispatch.0, runner.dispatch.1, 1);
            }
            queue.submit(std::iter::once(encoder.finish()));
            runner.slot ^= 1;
            runner.steps_done += 1;
        }
        (runner.steps_done, runner.total_steps)
    }

    pub fn is_grown(&self) -> bool {
        let runner = self.runner_ref();
        runner.steps_done >= runner.total_steps
    }

    /// Extract channel 0 of the final state into the alpha buffer.
    pub fn extract(&mut self, device: &wgpu::Device, queue: &wgpu::Queue) {
        let runner = self.runner();
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("nca_extract_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("nca_extract_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&runner.pipelines.extract);
            // The final state sits in the slot the next step would read.
            pass.set_bind_group(0, &runner.pipelines.bind_groups[runner.slot], &[]);
            pass.dispatch_workgroups(runner.dispatch.0, runner.dispatch.1, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }
}

impl NcaRunner {
    fn new_mlp(
        device: &wgpu::Device,
        defines: &ShaderDefines,
        buffers: &FieldBuffers,
        config: &FieldConfig,
    ) -> Self {
        let shader = load_shader(device, defines, "nca_mlp", include_str!("shaders/nca_mlp.wgsl"));

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("nca_mlp_bgl"),
            entries: &[
                bgl_uniform(0),
                bgl_storage_ro(1),
                bgl_storage_rw(2),
                bgl_storage_ro(3),
                bgl_storage_ro(4),
                bgl_storage_rw(5),
            ],
        });

        let step = create_compute_pipeline(device, "nca_mlp_step", &bgl, &shader, "grow");
        let extract = create_compute_pipeline(device, "nca_mlp_extract", &bgl, &shader, "extract");

        let bind_groups = [0usize, 1].map(|slot| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("nca_mlp_bg"),
                layout: &bgl,
                entries: &[
                    bg_buffer(0, &buffers.nca_step_params),
                    bg_buffer(1, &buffers.nca_state[slot]),
                    bg_buffer(2, &buffers.nca_state[slot ^ 1]),
                    bg_buffer(3, &buffers.nca_goal),
                    bg_buffer(4, &buffers.nca_weights),
                    bg_buffer(5, &buffers.nca_alpha),
                ],
            })
        });

        Self::with_pipelines(
            NcaPipelines {
                step,
                extract,
                bind_groups,
            },
            config,
            true,
        )
    }

    fn new_rds(
        device: &wgpu::Device,
        defines: &ShaderDefines,
        buffers: &FieldBuffers,
        config: &FieldConfig,
    ) -> Self {
        let shader = load_shader(device, defines, "nca_rds", include_str!("shaders/nca_rds.wgsl"));

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("nca_rds_bgl"),
            entries: &[
                bgl_storage_ro(0),
                bgl_storage_rw(1),
                bgl_storage_ro(2),
                bgl_storage_rw(3),
            ],
        });

        let step = create_compute_pipeline(device, "nca_rds_step", &bgl, &shader, "grow");
        let extract = create_compute_pipeline(device, "nca_rds_extract", &bgl, &shader, "extract");

        let bind_groups = [0usize, 1].map(|slot| {
            device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("nca_rds_bg"),
                layout: &bgl,
                entries: &[
                    bg_buffer(0, &buffers.nca_state[slot]),
                    bg_buffer(1, &buffers.nca_state[slot ^ 1]),
                    bg_buffer(2, &buffers.nca_goal),
                    bg_buffer(3, &buffers.nca_alpha),
                ],
            })
        });

        Self::with_pipelines(
            NcaPipelines {
                step,
                extract,
                bind_groups,
            },
            config,
            false,
        )
    }

    fn with_pipelines(pipelines: NcaPipelines, config: &FieldConfig, mlp: bool) -> Self {
        let cells = config.grid_cells() as usize;
        let zero_state = if mlp {
            vec![0.0f32; cells * NCA_CHANNELS as usize]
        } else {
            Vec::new()
        };
        Self {
            pipelines,
            total_steps: config.nca_steps,
            steps_done: 0,
            slot: 0,
            dispatch: (
                config.grid_w.div_ceil(WORKGROUP_X),
                config.grid_h.div_ceil(WORKGROUP_Y),
            ),
            seed_scratch: Vec::with_capacity(cells),
            zero_state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn valid_file() -> WeightFile {
        let h = NCA_HIDDEN as usize;
        WeightFile {
            w1: WeightArray::Rows(vec![vec![0.01; NCA_FEATURES as usize]; h]),
            b1: vec![0.0; h],
            w2: WeightArray::Rows(vec![vec![0.02; h]; NCA_CHANNELS as usize]),
            b2: vec![0.0; NCA_CHANNELS as usize],
        }
    }

    #[test]
    fn packs_in_kernel_layout_order() {
        let h = NCA_HIDDEN as usize;
        let features = NCA_FEATURES as usize;
        let channels = NCA_CHANNELS as usize;
        let packed = pack_weights(valid_file()).unwrap();
        assert_eq!(packed.len(), h * features + h + channels * h + channels);
        // w1 block then b1 block.
        assert_eq!(packed[0], 0.01);
        assert_eq!(packed[h * features], 0.0);
        assert_eq!(packed[h * features + h], 0.02);
    }

    #[test]
    fn rejects_wrong_shapes() {
        let mut file = valid_file();
        file.b1 = vec![0.0; 3];
        assert!(pack_weights(file).is_err());

        let mut file = valid_file();
        file.w1 = WeightArray::Rows(vec![vec![0.0; 10]; NCA_HIDDEN as usize]);
        assert!(pack_weights(file).is_err());

        let mut file = valid_file();
        file.w2 = WeightArray::Flat(vec![0.0; 7]);
        assert!(pack_weights(file).is_err());
    }

    #[test]
    fn accepts_flat_row_major_arrays() {
        let h = NCA_HIDDEN as usize;
        let mut file = valid_file();
        file.w1 = WeightArray::Flat(vec![0.5; h * NCA_FEATURES as usize]);
        let packed = pack_weights(file).unwrap();
        assert_eq!(packed[0], 0.5);
    }

    #[test]
    fn load_weights_from_disk_round_trips() {
        let h = NCA_HIDDEN as usize;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("weights.json");
        let json = serde_json::json!({
            "w1": vec![vec![0.1f32; NCA_FEATURES as usize]; h],
            "b1": vec![0.2f32; h],
            "w2": vec![vec![0.3f32; h]; NCA_CHANNELS as usize],
            "b2": vec![0.4f32; NCA_CHANNELS as usize],
        });
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "{json}").unwrap();

        let packed = load_weights(path.to_str().unwrap()).unwrap();
        assert_eq!(packed[0], 0.1);
        assert_eq!(*packed.last().unwrap(), 0.4);
    }

    #[test]
    fn missing_or_malformed_files_are_soft_errors() {
        assert!(load_weights("/definitely/not/there.json").is_err());

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(load_weights(path.to_str().unwrap()).is_err());
    }
}
