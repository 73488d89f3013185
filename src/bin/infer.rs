use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use burn::backend::ndarray::NdArrayDevice;
use burn::backend::NdArray;
use burn::prelude::*;
use burn::tensor::Distribution;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use asfp_detection::{AsfpRetinaNet, DetectorConfig};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Detector config (YAML); the built-in RetinaNet + ASFP config when absent
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Checkpoint written by `--save-weights` (without the .bin extension)
    #[arg(short, long)]
    weights: Option<PathBuf>,

    /// Write the initialised weights to this path and exit
    #[arg(long)]
    save_weights: Option<PathBuf>,

    /// Side of the square input image the pyramid is derived from
    #[arg(long, default_value_t = 512)]
    image_size: usize,

    /// Batch size
    #[arg(short, long, default_value_t = 1)]
    batch: usize,

    /// Number of forward passes
    #[arg(short, long, default_value_t = 3)]
    runs: usize,
}

type MyBackend = NdArray;

fn load_config(path: Option<&Path>) -> anyhow::Result<DetectorConfig> {
    match path {
        Some(path) => {
            println!("Loading config from {}", path.display());
            DetectorConfig::from_yaml(path)
                .with_context(|| format!("reading config {}", path.display()))
        }
        None => {
            println!("Using built-in RetinaNet + ASFP config");
            Ok(DetectorConfig::default())
        }
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::builder()
        .filter_level(log::LevelFilter::Info)
        .init();

    let args = Args::parse();

    println!("ASFP RetinaNet Inference (CPU)");
    println!("==============================\n");

    let config = load_config(args.config.as_deref())?;
    let device = NdArrayDevice::default();

    println!("Creating model...");
    let mut model = AsfpRetinaNet::<MyBackend>::new(&device, &config)?.init_weights();

    if let Some(path) = &args.save_weights {
        model.save_checkpoint(path)?;
        println!("Weights saved to {}.bin", path.display());
        return Ok(());
    }

    if let Some(path) = &args.weights {
        println!("Loading weights: {}", path.display());
        model = model.load_checkpoint(path, &device)?;
    }

    println!("  Levels      : {}", model.neck.num_levels());
    println!("  Refine level: {}", model.neck.refine_level());
    println!("  Refine type : {}", model.neck.refine_type());
    println!("  Classes     : {}", model.head.num_classes());
    println!("  Parameters  : {}", model.num_params());
    println!();

    let shapes = model.feature_shapes(args.batch, args.image_size);

    let pb = ProgressBar::new(args.runs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{elapsed_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")?,
    );

    let mut timings = Vec::with_capacity(args.runs);
    let mut last = Vec::new();
    for run in 0..args.runs {
        let features: Vec<Tensor<MyBackend, 4>> = shapes
            .iter()
            .map(|&shape| Tensor::random(shape, Distribution::Default, &device))
            .collect();

        let start = Instant::now();
        last = model.forward(features)?;
        let elapsed = start.elapsed().as_secs_f32();
        timings.push(elapsed);

        pb.set_message(format!("run {}: {:.3}s", run + 1, elapsed));
        pb.inc(1);
    }
    pb.finish_with_message("Inference completed");

    println!();
    println!(
        "{:<6} {:<8} {:<22} {:<22}",
        "Level", "Stride", "cls_score", "bbox_pred"
    );
    println!("{}", "=".repeat(60));
    for ((level, pred), stride) in last.iter().enumerate().zip(model.strides()) {
        println!(
            "{:<6} {:<8} {:<22} {:<22}",
            level,
            stride,
            format!("{:?}", pred.cls_score.dims()),
            format!("{:?}", pred.bbox_pred.dims())
        );
    }

    if !timings.is_empty() {
        let mean = timings.iter().sum::<f32>() / timings.len() as f32;
        println!("\nMean forward time: {:.3}s over {} runs", mean, timings.len());
    }

    Ok(())
}
