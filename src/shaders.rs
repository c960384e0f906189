// ============================================================================
// shaders.rs — atomfield
// WGSL specialization (placeholder -> typed literal) and the bind-group
// layout helpers shared by every pipeline module.
// ============================================================================

use crate::config::{FieldConfig, NCA_CHANNELS, NCA_HIDDEN, SPLAT_WEIGHT_SUM};

/// Baked shader constants. Kernel sources carry `%%NAME%%` placeholders;
/// every placeholder is substituted for a typed literal before the module is
/// compiled, so changing any dimension recompiles the shaders.
pub struct ShaderDefines {
    pairs: Vec<(&'static str, String)>,
}

fn u32_lit(v: u32) -> String {
    format!("{v}u")
}

fn f32_lit(v: f32) -> String {
    // Debug formatting always keeps the decimal point ("16.0", "0.9").
    format!("{v:?}")
}

impl ShaderDefines {
    pub fn from_config(config: &FieldConfig) -> Self {
        let pairs = vec![
            ("%%N%%", u32_lit(config.atom_count)),
            ("%%GRID_W%%", u32_lit(config.grid_w)),
            ("%%GRID_H%%", u32_lit(config.grid_h)),
            ("%%DISPLAY_W%%", u32_lit(config.display_w)),
            ("%%DISPLAY_H%%", u32_lit(config.display_h)),
            ("%%K%%", u32_lit(config.centroids)),
            ("%%SCALE%%", f32_lit(config.fixed_point_scale() as f32)),
            ("%%DECAY%%", f32_lit(config.decay)),
            ("%%MAX_VEL%%", f32_lit(config.max_vel)),
            ("%%BOUND%%", f32_lit(config.bound)),
            ("%%FIRE_RATE%%", f32_lit(config.fire_rate)),
            ("%%CHANNELS%%", u32_lit(NCA_CHANNELS)),
            ("%%HIDDEN%%", u32_lit(NCA_HIDDEN)),
            ("%%TREF%%", f32_lit(config.trail_ref)),
            ("%%BLOOM_THRESHOLD%%", f32_lit(config.bloom_threshold)),
            ("%%WEIGHT_SUM%%", f32_lit(SPLAT_WEIGHT_SUM as f32)),
        ];
        Self { pairs }
    }

    /// Substitute every placeholder in `source`. An unresolved `%%` after
    /// substitution means a kernel asked for a constant nobody bakes; that is
    /// a build defect, not a runtime condition.
    pub fn specialize(&self, label: &str, source: &str) -> String {
        let mut out = source.to_string();
        for (needle, value) in &self.pairs {
            out = out.replace(needle, value);
        }
        if let Some(pos) = out.find("%%") {
            let tail: String = out[pos..].chars().take(24).collect();
            panic!("shader {label}: unresolved placeholder near `{tail}`");
        }
        out
    }
}

// ======================== Module / pipeline helpers ========================

pub fn load_shader(
    device: &wgpu::Device,
    defines: &ShaderDefines,
    label: &str,
    source: &str,
) -> wgpu::ShaderModule {
    let specialized = defines.specialize(label, source);
    device.create_shader_module(wgpu::ShaderModuleDescriptor {
        label: Some(label),
        source: wgpu::ShaderSource::Wgsl(specialized.into()),
    })
}

pub fn create_compute_pipeline(
    device: &wgpu::Device,
    name: &str,
    bgl: &wgpu::BindGroupLayout,
    module: &wgpu::ShaderModule,
    entry_point: &str,
) -> wgpu::ComputePipeline {
    let layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
        label: Some(&format!("{name}_pipeline_layout")),
        bind_group_layouts: &[bgl],
        push_constant_ranges: &[],
    });
    device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
        label: Some(&format!("{name}_pipeline")),
        layout: Some(&layout),
        module,
        entry_point: Some(entry_point),
        compilation_options: Default::default(),
        cache: None,
    })
}

pub fn bgl_uniform(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn bgl_storage_ro(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE | wgpu::ShaderStages::VERTEX_FRAGMENT,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn bgl_storage_rw(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: false },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

pub fn bg_buffer(binding: u32, buffer: &wgpu::Buffer) -> wgpu::BindGroupEntry<'_> {
    wgpu::BindGroupEntry {
        binding,
        resource: buffer.as_entire_binding(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_typed_literals() {
        let defines = ShaderDefines::from_config(&FieldConfig::default());
        let out = defines.specialize(
            "probe",
            "const N: u32 = %%N%%; const D: f32 = %%DECAY%%; const K: u32 = %%K%%;",
        );
        assert!(out.contains("const N: u32 = 1500000u;"));
        assert!(out.contains("const D: f32 = 0.9;"));
        assert!(out.contains("const K: u32 = 512u;"));
    }

    #[test]
    fn float_literals_keep_decimal_point() {
        assert_eq!(f32_lit(16.0), "16.0");
        assert_eq!(f32_lit(0.55), "0.55");
    }

    #[test]
    #[should_panic(expected = "unresolved placeholder")]
    fn unresolved_placeholder_is_fatal() {
        let defines = ShaderDefines::from_config(&FieldConfig::default());
        defines.specialize("probe", "const X: u32 = %%NOT_A_THING%%;");
    }
}
