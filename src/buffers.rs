// ============================================================================
// buffers.rs — atomfield
// FieldBuffers: allocates and names every persistent GPU buffer, fixing the
// data layout contract all kernels consume. Sizes derive from five constants
// (N, grid, display, K); changing any of them recompiles the shaders.
// ============================================================================

use bytemuck::{Pod, Zeroable};
use rand::Rng;
use wgpu::util::DeviceExt;

use crate::config::{FieldConfig, NCA_CHANNELS, NCA_HIDDEN};

// ======================== Uniform Structs ========================

/// Per-frame simulation uniform. `has_targets` selects the physics mode
/// (wander below 0.5, morph at or above); `morph_t` drives the smoothstep.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct SimParams {
    pub dt: f32,
    pub time: f32,
    pub has_targets: f32,
    pub morph_t: f32,
}

/// Per-step NCA uniform; the step index feeds the stochastic-mask hash.
#[repr(C)]
#[derive(Copy, Clone, Debug, Pod, Zeroable)]
pub struct NcaStepParams {
    pub step: u32,
    pub _pad: [u32; 3],
}

// ======================== FieldBuffers ========================

/// Every persistent GPU buffer, owned for the process lifetime. Kernels get
/// read-only or read-write access per binding declaration; the ping-pong
/// slot is a function of frame parity.
pub struct FieldBuffers {
    // Atom state (position + velocity packed vec4), ping-pong.
    pub atoms: [wgpu::Buffer; 2],
    // Morph endpoints, rewritten at the start of every transition.
    pub source: wgpu::Buffer,
    pub target: wgpu::Buffer,
    pub sim_params: wgpu::Buffer,

    // Display accumulators.
    pub density: wgpu::Buffer,
    pub velocity: wgpu::Buffer,
    pub trail: wgpu::Buffer,
    pub bloom_tmp: wgpu::Buffer,
    pub bloom: wgpu::Buffer,

    // NCA state pair, goal, extracted alpha, packed MLP weights.
    pub nca_state: [wgpu::Buffer; 2],
    pub nca_goal: wgpu::Buffer,
    pub nca_alpha: wgpu::Buffer,
    pub nca_weights: wgpu::Buffer,
    pub nca_step_params: wgpu::Buffer,

    // OT intermediates: one cloud at a time flows through these.
    pub ot_points: wgpu::Buffer,
    pub ot_centroids: wgpu::Buffer,
    pub ot_labels: wgpu::Buffer,
    pub ot_sum_x: wgpu::Buffer,
    pub ot_sum_y: wgpu::Buffer,
    pub ot_counts: wgpu::Buffer,

    // Staging buffers for readbacks.
    staging_atoms: wgpu::Buffer,
    staging_alpha: wgpu::Buffer,
    staging_centroids: wgpu::Buffer,
    staging_labels: wgpu::Buffer,
    staging_trail: wgpu::Buffer,

    // Preallocated zero fills for queue-ordered clears.
    zero_display: Vec<u8>,
    zero_k: Vec<u8>,

    atom_count: u32,
    grid_cells: u32,
    display_pixels: u32,
    centroid_count: u32,
}

impl FieldBuffers {
    pub fn new(device: &wgpu::Device, config: &FieldConfig) -> Self {
        let n = config.atom_count as usize;
        let cells = config.grid_cells() as usize;
        let pixels = config.display_pixels() as usize;
        let k = config.centroids as usize;

        // Atoms start scattered across the canvas with zero velocity; the
        // wander kernel puts them in motion on the first frame.
        let mut rng = rand::thread_rng();
        let mut atom_data = vec![0.0f32; n * 4];
        for atom in atom_data.chunks_exact_mut(4) {
            atom[0] = rng.gen_range(-1.0..1.0);
            atom[1] = rng.gen_range(-1.0..1.0);
        }

        let storage = wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST;
        let storage_src = storage | wgpu::BufferUsages::COPY_SRC;

        let atoms = [
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("atoms_0"),
                contents: bytemuck::cast_slice(&atom_data),
                usage: storage_src,
            }),
            device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                label: Some("atoms_1"),
                contents: bytemuck::cast_slice(&atom_data),
                usage: storage_src,
            }),
        ];

        let empty_storage = |label: &str, size: u64, usage: wgpu::BufferUsages| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size,
                usage,
                mapped_at_creation: false,
            })
        };

        let vec2_n = (n * 8) as u64;
        let source = empty_storage("morph_source", vec2_n, storage);
        let target = empty_storage("morph_target", vec2_n, storage);

        let sim_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("sim_params"),
            contents: bytemuck::bytes_of(&SimParams::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let pixels_bytes = (pixels * 4) as u64;
        let density = empty_storage("density_accum", pixels_bytes, storage);
        let velocity = empty_storage("velocity_accum", pixels_bytes, storage);
        let trail = empty_storage("trail_accum", pixels_bytes, storage_src);
        let bloom_tmp = empty_storage("bloom_tmp", pixels_bytes, storage);
        let bloom = empty_storage("bloom_accum", pixels_bytes, storage);

        let channel_bytes = (cells * NCA_CHANNELS as usize * 4) as u64;
        let nca_state = [
            empty_storage("nca_state_0", channel_bytes, storage),
            empty_storage("nca_state_1", channel_bytes, storage),
        ];
        let cell_bytes = (cells * 4) as u64;
        let nca_goal = empty_storage("nca_goal", cell_bytes, storage);
        let nca_alpha = empty_storage("nca_alpha", cell_bytes, storage_src);

        let h = NCA_HIDDEN as usize;
        let weight_floats = h * 56 + h + 16 * h + 16;
        let nca_weights = empty_storage("nca_weights", (weight_floats * 4) as u64, storage);

        let nca_step_params = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("nca_step_params"),
            contents: bytemuck::bytes_of(&NcaStepParams::zeroed()),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
        });

        let ot_points = empty_storage("ot_points", vec2_n, storage);
        let ot_centroids = empty_storage("ot_centroids", (k * 8) as u64, storage_src);
        let ot_labels = empty_storage("ot_labels", (n * 4) as u64, storage_src);
        let ot_sum_x = empty_storage("ot_sum_x", (k * 4) as u64, storage);
        let ot_sum_y = empty_storage("ot_sum_y", (k * 4) as u64, storage);
        let ot_counts = empty_storage("ot_counts", (k * 4) as u64, storage);

        let staging_usage = wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST;
        let staging_atoms = empty_storage("staging_atoms", (n * 16) as u64, staging_usage);
        let staging_alpha = empty_storage("staging_alpha", cell_bytes, staging_usage);
        let staging_centroids = empty_storage("staging_centroids", (k * 8) as u64, staging_usage);
        let staging_labels = empty_storage("staging_labels", (n * 4) as u64, staging_usage);
        let staging_trail = empty_storage("staging_trail", pixels_bytes, staging_usage);

        Self {
            atoms,
            source,
            target,
            sim_params,
            density,
            velocity,
            trail,
            bloom_tmp,
            bloom,
            nca_state,
            nca_goal,
            nca_alpha,
            nca_weights,
            nca_step_params,
            ot_points,
            ot_centroids,
            ot_labels,
            ot_sum_x,
            ot_sum_y,
            ot_counts,
            staging_atoms,
            staging_alpha,
            staging_centroids,
            staging_labels,
            staging_trail,
            zero_display: vec![0u8; pixels * 4],
            zero_k: vec![0u8; k * 4],
            atom_count: config.atom_count,
            grid_cells: config.grid_cells(),
            display_pixels: config.display_pixels(),
            centroid_count: config.centroids,
        }
    }

    pub fn write_sim_params(&self, queue: &wgpu::Queue, params: &SimParams) {
        queue.write_buffer(&self.sim_params, 0, bytemuck::bytes_of(params));
    }

    pub fn write_nca_step(&self, queue: &wgpu::Queue, step: u32) {
        let params = NcaStepParams {
            step,
            _pad: [0; 3],
        };
        queue.write_buffer(&self.nca_step_params, 0, bytemuck::bytes_of(&params));
    }

    /// Per-frame accumulator clear. Queue-ordered so the splat of frame f
    /// never sees frame f-1 counts.
    pub fn clear_frame_accumulators(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.density, 0, &self.zero_display);
        queue.write_buffer(&self.velocity, 0, &self.zero_display);
    }

    /// k-means accumulator clear. Must go through the queue between
    /// submissions: in-kernel atomic stores are not guaranteed visible to a
    /// later dispatch on every backend.
    pub fn clear_kmeans_accumulators(&self, queue: &wgpu::Queue) {
        queue.write_buffer(&self.ot_sum_x, 0, &self.zero_k);
        queue.write_buffer(&self.ot_sum_y, 0, &self.zero_k);
        queue.write_buffer(&self.ot_counts, 0, &self.zero_k);
    }

    // ======================== Readbacks ========================

    /// Synchronous copy of one atom slot's positions into `out` (pairs of
    /// NDC coordinates). `out` is a preallocated mirror; no reallocation
    /// happens when its capacity already covers N.
    pub fn readback_positions(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        slot: usize,
        out: &mut Vec<[f32; 2]>,
    ) -> bool {
        let n = self.atom_count as usize;
        let bytes = (n * 16) as u64;
        copy_to_staging(device, queue, &self.atoms[slot], &self.staging_atoms, bytes);
        map_staging(device, &self.staging_atoms, bytes, |raw| {
            let floats: &[f32] = bytemuck::cast_slice(raw);
            out.clear();
            out.extend(floats.chunks_exact(4).map(|a| [a[0], a[1]]));
        })
    }

    pub fn readback_alpha(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        out: &mut Vec<f32>,
    ) -> bool {
        let bytes = (self.grid_cells * 4) as u64;
        copy_to_staging(device, queue, &self.nca_alpha, &self.staging_alpha, bytes);
        map_staging(device, &self.staging_alpha, bytes, |raw| {
            out.clear();
            out.extend_from_slice(bytemuck::cast_slice(raw));
        })
    }

    pub fn readback_centroids(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        out: &mut Vec<[f32; 2]>,
    ) -> bool {
        let bytes = (self.centroid_count * 8) as u64;
        copy_to_staging(device, queue, &self.ot_centroids, &self.staging_centroids, bytes);
        map_staging(device, &self.staging_centroids, bytes, |raw| {
            let floats: &[f32] = bytemuck::cast_slice(raw);
            out.clear();
            out.extend(floats.chunks_exact(2).map(|c| [c[0], c[1]]));
        })
    }

    pub fn readback_labels(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        out: &mut Vec<u32>,
    ) -> bool {
        let bytes = (self.atom_count * 4) as u64;
        copy_to_staging(device, queue, &self.ot_labels, &self.staging_labels, bytes);
        map_staging(device, &self.staging_labels, bytes, |raw| {
            out.clear();
            out.extend_from_slice(bytemuck::cast_slice(raw));
        })
    }

    pub fn readback_trail(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        out: &mut Vec<f32>,
    ) -> bool {
        let bytes = (self.display_pixels * 4) as u64;
        copy_to_staging(device, queue, &self.trail, &self.staging_trail, bytes);
        map_staging(device, &self.staging_trail, bytes, |raw| {
            out.clear();
            out.extend_from_slice(bytemuck::cast_slice(raw));
        })
    }
}

fn copy_to_staging(
    device: &wgpu::Device,
    queue: &wgpu::Queue,
    src: &wgpu::Buffer,
    staging: &wgpu::Buffer,
    bytes: u64,
) {
    let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
        label: Some("readback_encoder"),
    });
    encoder.copy_buffer_to_buffer(src, 0, staging, 0, bytes);
    queue.submit(std::iter::once(encoder.finish()));
}

/// Map a staging buffer, hand the mapped bytes to `consume`, unmap. Returns
/// false when the map fails (device loss); callers abort the transition.
fn map_staging(
    device: &wgpu::Device,
    staging: &wgpu::Buffer,
    bytes: u64,
    consume: impl FnOnce(&[u8]),
) -> bool {
    let slice = staging.slice(..bytes);
    let (tx, rx) = std::sync::mpsc::channel();
    slice.map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    device.poll(wgpu::Maintain::Wait);
    let ok = matches!(rx.recv(), Ok(Ok(())));
    if ok {
        let data = slice.get_mapped_range();
        consume(&data);
        drop(data);
        staging.unmap();
    }
    ok
}
