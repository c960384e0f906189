// ============================================================================
// main.rs — atomfield
// Entry point. Initializes logging, parses the CLI into a FieldConfig, and
// starts either the windowed event loop or a headless batch run.
// ============================================================================

mod app;
mod buffers;
mod capture;
mod config;
mod headless;
mod hud;
mod nca;
mod orchestrator;
mod ot;
mod panel;
mod pipeline;
mod sampler;
mod shaders;
mod shapes;

use app::App;
use config::FieldConfig;
use headless::{run_headless, HeadlessConfig};
use winit::event_loop::EventLoop;

fn main() {
    env_logger::init();

    let cli = CliOptions::from_args(std::env::args().collect());

    if let Err(reason) = cli.field.validate() {
        eprintln!("Invalid configuration: {reason}");
        std::process::exit(2);
    }

    if cli.headless {
        let headless_cfg = HeadlessConfig {
            frames: cli.frames,
            progress_interval: cli.progress_interval,
            capture_every: cli.capture_every,
        };
        if let Err(err) = run_headless(&cli.field, &headless_cfg) {
            eprintln!("Headless run failed: {err}");
            std::process::exit(1);
        }
        return;
    }

    let event_loop = EventLoop::new().unwrap();
    event_loop.set_control_flow(winit::event_loop::ControlFlow::Poll);

    let mut app = App::new(cli.field);
    event_loop.run_app(&mut app).unwrap();
}

#[derive(Clone, Debug)]
struct CliOptions {
    field: FieldConfig,
    headless: bool,
    frames: u32,
    progress_interval: u32,
    capture_every: u32,
}

impl Default for CliOptions {
    fn default() -> Self {
        Self {
            field: FieldConfig::default(),
            headless: false,
            frames: 3_600,
            progress_interval: 600,
            capture_every: 0,
        }
    }
}

impl CliOptions {
    fn from_args(args: Vec<String>) -> Self {
        let mut options = Self::default();
        let mut i = 1usize;

        fn take<T: std::str::FromStr>(args: &[String], i: &mut usize) -> Option<T> {
            if *i + 1 < args.len() {
                *i += 1;
                args[*i].parse::<T>().ok()
            } else {
                None
            }
        }

        while i < args.len() {
            match args[i].as_str() {
                "--headless" => options.headless = true,
                "--no-bloom" => options.field.bloom = false,
                "--atoms" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.field.atom_count = v.max(1);
                    }
                }
                "--display" => {
                    if let Some(v) = take::<String>(&args, &mut i) {
                        if let Some((w, h)) = parse_dims(&v) {
                            options.field.display_w = w;
                            options.field.display_h = h;
                        }
                    }
                }
                "--grid" => {
                    if let Some(v) = take::<String>(&args, &mut i) {
                        if let Some((w, h)) = parse_dims(&v) {
                            options.field.grid_w = w;
                            options.field.grid_h = h;
                        }
                    }
                }
                "--centroids" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.field.centroids = v.max(1);
                    }
                }
                "--kmeans-iters" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.field.kmeans_iters = v.max(1);
                    }
                }
                "--nca-steps" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.field.nca_steps = v.max(1);
                    }
                }
                "--fire-rate" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.fire_rate = v;
                    }
                }
                "--morph-secs" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.morph_duration = v;
                    }
                }
                "--hold-secs" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.hold_duration = v;
                    }
                }
                "--decay" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.decay = v;
                    }
                }
                "--max-vel" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.max_vel = v;
                    }
                }
                "--bound" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.bound = v;
                    }
                }
                "--tref" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.trail_ref = v;
                    }
                }
                "--bloom-threshold" => {
                    if let Some(v) = take::<f32>(&args, &mut i) {
                        options.field.bloom_threshold = v;
                    }
                }
                "--weights" => {
                    if let Some(v) = take::<String>(&args, &mut i) {
                        options.field.weights_path = v;
                    }
                }
                "--capture-dir" => {
                    if let Some(v) = take::<String>(&args, &mut i) {
                        options.field.capture_dir = v;
                    }
                }
                "--frames" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.frames = v.max(1);
                    }
                }
                "--progress-interval" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.progress_interval = v;
                    }
                }
                "--capture-every" => {
                    if let Some(v) = take::<u32>(&args, &mut i) {
                        options.capture_every = v;
                    }
                }
                other => {
                    log::warn!("ignoring unknown argument {other:?}");
                }
            }
            i += 1;
        }
        options
    }
}

/// "2560x1440" -> (2560, 1440); a bare "128" means a square.
fn parse_dims(text: &str) -> Option<(u32, u32)> {
    if let Some((w, h)) = text.split_once(['x', 'X']) {
        Some((w.parse().ok()?, h.parse().ok()?))
    } else {
        let side: u32 = text.parse().ok()?;
        Some((side, side))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("atomfield")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_dimension_pairs_and_squares() {
        assert_eq!(parse_dims("2560x1440"), Some((2560, 1440)));
        assert_eq!(parse_dims("128"), Some((128, 128)));
        assert_eq!(parse_dims("abc"), None);
    }

    #[test]
    fn cli_overrides_land_in_the_config() {
        let cli = CliOptions::from_args(args(&[
            "--atoms",
            "200000",
            "--display",
            "1920x1080",
            "--grid",
            "64",
            "--centroids",
            "256",
            "--no-bloom",
            "--headless",
            "--frames",
            "100",
        ]));
        assert_eq!(cli.field.atom_count, 200_000);
        assert_eq!(cli.field.display_w, 1920);
        assert_eq!(cli.field.display_h, 1080);
        assert_eq!(cli.field.grid_w, 64);
        assert_eq!(cli.field.centroids, 256);
        assert!(!cli.field.bloom);
        assert!(cli.headless);
        assert_eq!(cli.frames, 100);
        cli.field.validate().unwrap();
    }

    #[test]
    fn unknown_and_malformed_arguments_keep_defaults() {
        let cli = CliOptions::from_args(args(&["--mystery", "--atoms", "not-a-number"]));
        assert_eq!(cli.field.atom_count, FieldConfig::default().atom_count);
    }
}
