// ============================================================================
// pipeline.rs — atomfield
// Per-frame GPU pipelines: physics -> splat -> decay -> [bloom] compute
// chain and the phosphor render pipeline. Bind groups are pre-built for both
// ping-pong slots; dispatch needs only the frame-parity index.
// ============================================================================

use crate::buffers::FieldBuffers;
use crate::config::{FieldConfig, WORKGROUP_LINEAR, WORKGROUP_X, WORKGROUP_Y};
use crate::shaders::{
    bg_buffer, bgl_storage_ro, bgl_storage_rw, bgl_uniform, create_compute_pipeline, load_shader,
    ShaderDefines,
};

pub struct FramePipelines {
    physics_pipeline: wgpu::ComputePipeline,
    physics_bind_groups: [wgpu::BindGroup; 2],

    splat_pipeline: wgpu::ComputePipeline,
    splat_bind_groups: [wgpu::BindGroup; 2],

    decay_pipeline: wgpu::ComputePipeline,
    decay_bind_group: wgpu::BindGroup,

    bloom_h_pipeline: wgpu::ComputePipeline,
    bloom_v_pipeline: wgpu::ComputePipeline,
    bloom_bind_group: wgpu::BindGroup,

    render_pipeline: wgpu::RenderPipeline,
    render_bind_group: wgpu::BindGroup,

    dispatch_atoms: u32,
    dispatch_display: (u32, u32),
    bloom_enabled: bool,
}

pub fn create_frame_pipelines(
    device: &wgpu::Device,
    defines: &ShaderDefines,
    buffers: &FieldBuffers,
    config: &FieldConfig,
    surface_format: wgpu::TextureFormat,
) -> FramePipelines {
    // ---- Load shaders ----
    let physics_shader = load_shader(device, defines, "physics", include_str!("shaders/physics.wgsl"));
    let splat_shader = load_shader(device, defines, "splat", include_str!("shaders/splat.wgsl"));
    let decay_shader = load_shader(device, defines, "decay", include_str!("shaders/decay.wgsl"));
    let bloom_shader = load_shader(device, defines, "bloom", include_str!("shaders/bloom.wgsl"));
    let render_shader = load_shader(device, defines, "render", include_str!("shaders/render.wgsl"));

    // ================================================================
    // PHYSICS PIPELINE
    // ================================================================
    let physics_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("physics_bgl"),
        entries: &[
            bgl_uniform(0),
            bgl_storage_ro(1),
            bgl_storage_rw(2),
            bgl_storage_ro(3),
            bgl_storage_ro(4),
        ],
    });

    let physics_pipeline =
        create_compute_pipeline(device, "physics", &physics_bgl, &physics_shader, "main");

    // Slot s: read atoms[s], write atoms[s^1].
    let physics_bind_groups = [0usize, 1].map(|slot| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("physics_bg"),
            layout: &physics_bgl,
            entries: &[
                bg_buffer(0, &buffers.sim_params),
                bg_buffer(1, &buffers.atoms[slot]),
                bg_buffer(2, &buffers.atoms[slot ^ 1]),
                bg_buffer(3, &buffers.source),
                bg_buffer(4, &buffers.target),
            ],
        })
    });

    // ================================================================
    // SPLAT PIPELINE
    // ================================================================
    let splat_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("splat_bgl"),
        entries: &[
            bgl_storage_ro(0),
            bgl_storage_rw(1),
            bgl_storage_rw(2),
        ],
    });

    let splat_pipeline = create_compute_pipeline(device, "splat", &splat_bgl, &splat_shader, "main");

    // Splat reads the slot physics just wrote; indexed by the same frame slot.
    let splat_bind_groups = [0usize, 1].map(|slot| {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("splat_bg"),
            layout: &splat_bgl,
            entries: &[
                bg_buffer(0, &buffers.atoms[slot ^ 1]),
                bg_buffer(1, &buffers.density),
                bg_buffer(2, &buffers.velocity),
            ],
        })
    });

    // ================================================================
    // DECAY PIPELINE
    // ================================================================
    let decay_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("decay_bgl"),
        entries: &[bgl_storage_ro(0), bgl_storage_rw(1)],
    });

    let decay_pipeline = create_compute_pipeline(device, "decay", &decay_bgl, &decay_shader, "main");

    let decay_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("decay_bg"),
        layout: &decay_bgl,
        entries: &[
            bg_buffer(0, &buffers.density),
            bg_buffer(1, &buffers.trail),
        ],
    });

    // ================================================================
    // BLOOM PIPELINE (two entry points in one shader)
    // ================================================================
    let bloom_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("bloom_bgl"),
        entries: &[
            bgl_storage_ro(0),
            bgl_storage_rw(1),
            bgl_storage_rw(2),
        ],
    });

    let bloom_h_pipeline =
        create_compute_pipeline(device, "bloom_h", &bloom_bgl, &bloom_shader, "blur_h");
    let bloom_v_pipeline =
        create_compute_pipeline(device, "bloom_v", &bloom_bgl, &bloom_shader, "blur_v");

    let bloom_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("bloom_bg"),
        layout: &bloom_bgl,
        entries: &[
            bg_buffer(0, &buffers.trail),
            bg_buffer(1, &buffers.bloom_tmp),
            bg_buffer(2, &buffers.bloom),
        ],
    });

    // ================================================================
    // RENDER PIPELINE
    // ================================================================
    let render_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("render_bgl"),
        entries: &[
            bgl_storage_ro(0),
            bgl_storage_ro(1),
            bgl_storage_ro(2),
            bgl_storage_ro(3),
        ],
    });

    let render_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some("render_pipeline_layout"),
        bind_group_layouts: &[&render_bgl],
        push_constant_ranges: &[],
    });

    let render_pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
        label: Some("render_pipeline"),
        layout: Some(&render_pipeline_layout),
        vertex: wgpu::VertexState {
            module: &render_shader,
            entry_point: Some("vs_main"),
            buffers: &[],
            compilation_options: Default::default(),
        },
        fragment: Some(wgpu::FragmentState {
            module: &render_shader,
            entry_point: Some("fs_main"),
            targets: &[Some(wgpu::ColorTargetState {
                format: surface_format,
                blend: Some(wgpu::BlendState::REPLACE),
                write_mask: wgpu::ColorWrites::ALL,
            })],
            compilation_options: Default::default(),
        }),
        primitive: wgpu::PrimitiveState {
            topology: wgpu::PrimitiveTopology::TriangleList,
            ..Default::default()
        },
        depth_stencil: None,
        multisample: wgpu::MultisampleState::default(),
        multiview: None,
        cache: None,
    });

    let render_bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("render_bg"),
        layout: &render_bgl,
        entries: &[
            bg_buffer(0, &buffers.trail),
            bg_buffer(1, &buffers.velocity),
            bg_buffer(2, &buffers.density),
            bg_buffer(3, &buffers.bloom),
        ],
    });

    FramePipelines {
        physics_pipeline,
        physics_bind_groups,
        splat_pipeline,
        splat_bind_groups,
        decay_pipeline,
        decay_bind_group,
        bloom_h_pipeline,
        bloom_v_pipeline,
        bloom_bind_group,
        render_pipeline,
        render_bind_group,
        dispatch_atoms: config.atom_count.div_ceil(WORKGROUP_LINEAR),
        dispatch_display: (
            config.display_w.div_ceil(WORKGROUP_X),
            config.display_h.div_ceil(WORKGROUP_Y),
        ),
        bloom_enabled: config.bloom,
    }
}

impl FramePipelines {
    /// Encode one frame's compute chain. Pass boundaries are the only
    /// synchronization: splat sees physics' writes, decay sees splat's.
    pub fn encode_frame(&self, encoder: &mut wgpu::CommandEncoder, slot: usize) {
        let (dx, dy) = self.dispatch_display;

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("physics_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.physics_pipeline);
            pass.set_bind_group(0, &self.physics_bind_groups[slot], &[]);
            pass.dispatch_workgroups(self.dispatch_atoms, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("splat_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.splat_pipeline);
            pass.set_bind_group(0, &self.splat_bind_groups[slot], &[]);
            pass.dispatch_workgroups(self.dispatch_atoms, 1, 1);
        }

        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("decay_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.decay_pipeline);
            pass.set_bind_group(0, &self.decay_bind_group, &[]);
            pass.dispatch_workgroups(dx, dy, 1);
        }

        if self.bloom_enabled {
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("bloom_h_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.bloom_h_pipeline);
                pass.set_bind_group(0, &self.bloom_bind_group, &[]);
                pass.dispatch_workgroups(dx, dy, 1);
            }
            {
                let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                    label: Some("bloom_v_pass"),
                    timestamp_writes: None,
                });
                pass.set_pipeline(&self.bloom_v_pipeline);
                pass.set_bind_group(0, &self.bloom_bind_group, &[]);
                pass.dispatch_workgroups(dx, dy, 1);
            }
        }
    }

    /// Draw the fullscreen phosphor quad into an active render pass.
    pub fn render<'a>(&'a self, pass: &mut wgpu::RenderPass<'a>) {
        pass.set_pipeline(&self.render_pipeline);
        pass.set_bind_group(0, &self.render_bind_group, &[]);
        pass.draw(0..6, 0..1);
    }
}
