// ============================================================================
// ot.rs — atomfield
// Approximate optimal transport: GPU k-means over the source and target
// clouds, centroid-level matching by polar angle, and intra-cluster
// round-robin pairing. Full N×N bipartite OT is infeasible at 1.5M atoms;
// the hierarchy keeps assignment O(N·K) + O(K log K) + O(N).
// ============================================================================

use crate::buffers::FieldBuffers;
use crate::config::{FieldConfig, WORKGROUP_LINEAR};
use crate::shaders::{
    bg_buffer, bgl_storage_ro, bgl_storage_rw, create_compute_pipeline, load_shader, ShaderDefines,
};

// ======================== GPU k-means driver ========================

pub struct OtEngine {
    assign: wgpu::ComputePipeline,
    accumulate: wgpu::ComputePipeline,
    divide: wgpu::ComputePipeline,
    bind_group: wgpu::BindGroup,
    dispatch_points: u32,
    dispatch_centroids: u32,
    k: usize,
    n: usize,
    seed_scratch: Vec<[f32; 2]>,
}

impl OtEngine {
    pub fn new(
        device: &wgpu::Device,
        defines: &ShaderDefines,
        buffers: &FieldBuffers,
        config: &FieldConfig,
    ) -> Self {
        let shader = load_shader(device, defines, "kmeans", include_str!("shaders/kmeans.wgsl"));

        let bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kmeans_bgl"),
            entries: &[
                bgl_storage_ro(0),
                bgl_storage_rw(1),
                bgl_storage_rw(2),
                bgl_storage_rw(3),
                bgl_storage_rw(4),
                bgl_storage_rw(5),
            ],
        });

        let assign = create_compute_pipeline(device, "kmeans_assign", &bgl, &shader, "assign");
        let accumulate =
            create_compute_pipeline(device, "kmeans_accumulate", &bgl, &shader, "accumulate");
        let divide = create_compute_pipeline(device, "kmeans_divide", &bgl, &shader, "divide");

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kmeans_bg"),
            layout: &bgl,
            entries: &[
                bg_buffer(0, &buffers.ot_points),
                bg_buffer(1, &buffers.ot_centroids),
                bg_buffer(2, &buffers.ot_labels),
                bg_buffer(3, &buffers.ot_sum_x),
                bg_buffer(4, &buffers.ot_sum_y),
                bg_buffer(5, &buffers.ot_counts),
            ],
        });

        Self {
            assign,
            accumulate,
            divide,
            bind_group,
            dispatch_points: config.atom_count.div_ceil(WORKGROUP_LINEAR),
            dispatch_centroids: config.centroids.div_ceil(WORKGROUP_LINEAR),
            k: config.centroids as usize,
            n: config.atom_count as usize,
            seed_scratch: Vec::with_capacity(config.centroids as usize),
        }
    }

    /// Upload one point cloud and seed K evenly-spaced centroids from it.
    pub fn upload_cloud(&mut self, queue: &wgpu::Queue, buffers: &FieldBuffers, points: &[[f32; 2]]) {
        assert_eq!(points.len(), self.n);
        queue.write_buffer(&buffers.ot_points, 0, bytemuck::cast_slice(points));
        seed_centroids(points, self.k, &mut self.seed_scratch);
        queue.write_buffer(
            &buffers.ot_centroids,
            0,
            bytemuck::cast_slice(&self.seed_scratch),
        );
    }

    /// One k-means iteration. The accumulator clear goes through the queue
    /// between submissions; clearing inside the previous divide pass is not
    /// reliably visible to this iteration's accumulate on all backends.
    pub fn iterate(&self, device: &wgpu::Device, queue: &wgpu::Queue, buffers: &FieldBuffers) {
        buffers.clear_kmeans_accumulators(queue);

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("kmeans_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kmeans_assign_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.assign);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.dispatch_points, 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kmeans_accumulate_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.accumulate);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.dispatch_points, 1, 1);
        }
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kmeans_divide_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.divide);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.dispatch_centroids, 1, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));
    }

    /// Final assignment against the converged centroids, then read both back.
    pub fn finalize_cloud(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        buffers: &FieldBuffers,
        labels_out: &mut Vec<u32>,
        centroids_out: &mut Vec<[f32; 2]>,
    ) -> bool {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("kmeans_final_assign_encoder"),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("kmeans_final_assign_pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.assign);
            pass.set_bind_group(0, &self.bind_group, &[]);
            pass.dispatch_workgroups(self.dispatch_points, 1, 1);
        }
        queue.submit(std::iter::once(encoder.finish()));

        buffers.readback_labels(device, queue, labels_out)
            && buffers.readback_centroids(device, queue, centroids_out)
    }
}

/// K evenly-spaced picks across the input array.
pub fn seed_centroids(points: &[[f32; 2]], k: usize, out: &mut Vec<[f32; 2]>) {
    out.clear();
    for i in 0..k {
        out.push(points[i * points.len() / k]);
    }
}

// ======================== Centroid matching ========================

/// Injective map from source-centroid index to target-centroid index: both
/// clouds are sorted by polar angle around their centroid-of-centroids and
/// paired by rank. `out[s] = t`.
pub fn match_centroids(source: &[[f32; 2]], target: &[[f32; 2]], out: &mut Vec<u32>) {
    assert_eq!(source.len(), target.len());
    let k = source.len();

    let order = |cloud: &[[f32; 2]]| -> Vec<usize> {
        let mut cx = 0.0f64;
        let mut cy = 0.0f64;
        for c in cloud {
            cx += c[0] as f64;
            cy += c[1] as f64;
        }
        cx /= k as f64;
        cy /= k as f64;
        let mut indices: Vec<usize> = (0..k).collect();
        indices.sort_by(|&a, &b| {
            let angle_a = (cloud[a][1] as f64 - cy).atan2(cloud[a][0] as f64 - cx);
            let angle_b = (cloud[b][1] as f64 - cy).atan2(cloud[b][0] as f64 - cx);
            angle_a.partial_cmp(&angle_b).unwrap_or(std::cmp::Ordering::Equal)
        });
        indices
    };

    let source_order = order(source);
    let target_order = order(target);

    out.clear();
    out.resize(k, 0);
    for rank in 0..k {
        out[source_order[rank]] = target_order[rank] as u32;
    }
}

// ======================== Intra-cluster pairing ========================

/// Preallocated scratch for the pairing pass.
pub struct PairingScratch {
    clusters: Vec<Vec<u32>>,
    cursors: Vec<usize>,
}

impl PairingScratch {
    pub fn new(k: usize, n: usize) -> Self {
        let mut clusters = Vec::with_capacity(k);
        let per_cluster = (n / k.max(1)).max(1) * 2;
        for _ in 0..k {
            clusters.push(Vec::with_capacity(per_cluster));
        }
        Self {
            clusters,
            cursors: vec![0; k],
        }
    }
}

/// Assign every source atom a concrete target position: follow its source
/// cluster through the centroid map, then hand out that target cluster's
/// members round-robin. Empty target clusters fall back to the centroid
/// position itself; the pairing never fails.
pub fn pair_targets(
    source_labels: &[u32],
    matching: &[u32],
    target_labels: &[u32],
    raw_targets: &[[f32; 2]],
    target_centroids: &[[f32; 2]],
    scratch: &mut PairingScratch,
    out: &mut Vec<[f32; 2]>,
) {
    for cluster in &mut scratch.clusters {
        cluster.clear();
    }
    for cursor in &mut scratch.cursors {
        *cursor = 0;
    }
    for (i, &label) in target_labels.iter().enumerate() {
        scratch.clusters[label as usize].push(i as u32);
    }

    out.clear();
    for &source_label in source_labels {
        let t = matching[source_label as usize] as usize;
        let pool = &scratch.clusters[t];
        if pool.is_empty() {
            out.push(target_centroids[t]);
        } else {
            let cursor = scratch.cursors[t];
            out.push(raw_targets[pool[cursor] as usize]);
            scratch.cursors[t] = (cursor + 1) % pool.len();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn seeding_is_evenly_spaced() {
        let points: Vec<[f32; 2]> = (0..100).map(|i| [i as f32, 0.0]).collect();
        let mut out = Vec::new();
        seed_centroids(&points, 4, &mut out);
        assert_eq!(out, vec![[0.0, 0.0], [25.0, 0.0], [50.0, 0.0], [75.0, 0.0]]);
    }

    #[test]
    fn matching_is_a_bijection() {
        let mut rng = StdRng::seed_from_u64(11);
        let k = 64;
        let source: Vec<[f32; 2]> = (0..k)
            .map(|_| [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect();
        let target: Vec<[f32; 2]> = (0..k)
            .map(|_| [rng.gen_range(-1.0..1.0), rng.gen_range(-1.0..1.0)])
            .collect();

        let mut map = Vec::new();
        match_centroids(&source, &target, &mut map);

        assert_eq!(map.len(), k);
        let mut seen = vec![false; k];
        for &t in &map {
            assert!(!seen[t as usize], "target {t} assigned twice");
            seen[t as usize] = true;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn matching_preserves_cyclic_order_under_rotation() {
        // A ring of centroids paired against a rotated copy must map
        // neighbors to neighbors: the map is a cyclic shift, never an
        // arbitrary permutation.
        let k = 12usize;
        let ring = |rot: f32| -> Vec<[f32; 2]> {
            (0..k)
                .map(|i| {
                    let theta = std::f32::consts::TAU * i as f32 / k as f32 + rot;
                    [theta.cos(), theta.sin()]
                })
                .collect()
        };
        let source = ring(0.0);
        let target = ring(0.4);

        let mut map = Vec::new();
        match_centroids(&source, &target, &mut map);
        for s in 0..k {
            let next = map[(s + 1) % k] as usize;
            assert_eq!(next, (map[s] as usize + 1) % k, "order broken at {s}");
        }
    }

    #[test]
    fn pairing_covers_every_atom_and_wraps_cursors() {
        // 2 clusters; cluster 1's pool has 2 members but receives 5 atoms.
        let source_labels = vec![0, 1, 1, 1, 1, 1];
        let matching = vec![0u32, 1];
        let target_labels = vec![0, 0, 0, 0, 1, 1];
        let raw_targets: Vec<[f32; 2]> = (0..6).map(|i| [i as f32, 0.0]).collect();
        let centroids = vec![[100.0, 0.0], [200.0, 0.0]];

        let mut scratch = PairingScratch::new(2, 6);
        let mut out = Vec::new();
        pair_targets(
            &source_labels,
            &matching,
            &target_labels,
            &raw_targets,
            &centroids,
            &mut scratch,
            &mut out,
        );

        assert_eq!(out.len(), 6);
        // Atoms labeled 1 cycle through pool {4, 5}: 4, 5, 4, 5, 4.
        assert_eq!(out[1], [4.0, 0.0]);
        assert_eq!(out[2], [5.0, 0.0]);
        assert_eq!(out[3], [4.0, 0.0]);
        assert_eq!(out[4], [5.0, 0.0]);
        assert_eq!(out[5], [4.0, 0.0]);
    }

    #[test]
    fn empty_target_cluster_falls_back_to_centroid() {
        let source_labels = vec![0, 0];
        let matching = vec![1u32, 0];
        // No target atom carries label 1.
        let target_labels = vec![0, 0];
        let raw_targets = vec![[1.0, 1.0], [2.0, 2.0]];
        let centroids = vec![[-5.0, 0.0], [5.0, 0.0]];

        let mut scratch = PairingScratch::new(2, 2);
        let mut out = Vec::new();
        pair_targets(
            &source_labels,
            &matching,
            &target_labels,
            &raw_targets,
            &centroids,
            &mut scratch,
            &mut out,
        );
        assert_eq!(out, vec![[5.0, 0.0], [5.0, 0.0]]);
    }

    // CPU mirror of the kernel's iteration scheme, used to pin down the
    // algorithm's convergence behavior on well-separated blobs.
    fn cpu_kmeans(points: &[[f32; 2]], k: usize, iters: usize) -> (Vec<[f32; 2]>, Vec<usize>) {
        let mut centroids = Vec::new();
        let mut seeds = Vec::new();
        seed_centroids(points, k, &mut seeds);
        centroids.extend_from_slice(&seeds);
        let mut labels = vec![0usize; points.len()];
        for _ in 0..iters {
            for (i, p) in points.iter().enumerate() {
                let mut best = 0;
                let mut best_d = f32::MAX;
                for (c, centroid) in centroids.iter().enumerate() {
                    let d = (p[0] - centroid[0]).powi(2) + (p[1] - centroid[1]).powi(2);
                    if d < best_d {
                        best_d = d;
                        best = c;
                    }
                }
                labels[i] = best;
            }
            let mut sums = vec![[0.0f32; 2]; k];
            let mut counts = vec![0u32; k];
            for (i, p) in points.iter().enumerate() {
                sums[labels[i]][0] += p[0];
                sums[labels[i]][1] += p[1];
                counts[labels[i]] += 1;
            }
            for c in 0..k {
                if counts[c] > 0 {
                    centroids[c] = [sums[c][0] / counts[c] as f32, sums[c][1] / counts[c] as f32];
                }
            }
        }
        (centroids, labels)
    }

    #[test]
    fn kmeans_scheme_converges_on_separated_blobs() {
        let mut rng = StdRng::seed_from_u64(5);
        let k = 4;
        let centers = [[-0.7f32, -0.7], [0.7, -0.7], [-0.7, 0.7], [0.7, 0.7]];
        let mut points = Vec::new();
        let mut truth = Vec::new();
        for (b, center) in centers.iter().enumerate() {
            for _ in 0..500 {
                points.push([
                    center[0] + rng.gen_range(-0.05..0.05),
                    center[1] + rng.gen_range(-0.05..0.05),
                ]);
                truth.push(b);
            }
        }

        let (centroids, labels) = cpu_kmeans(&points, k, 6);

        // Every blob member shares a label, and the blob's centroid converged
        // onto the blob center.
        let mut agree = 0usize;
        for (i, &label) in labels.iter().enumerate() {
            let c = centroids[label];
            let truth_center = centers[truth[i]];
            let d = (c[0] - truth_center[0]).powi(2) + (c[1] - truth_center[1]).powi(2);
            if d < 0.01 {
                agree += 1;
            }
        }
        assert!(agree as f32 / labels.len() as f32 >= 0.99);
    }
}
