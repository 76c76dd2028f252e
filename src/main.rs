//! TSP preprocessor binary: converts a time-varying volume into a TSP tree file.
//!
//! Usage: tspforge --input <FILE> --output <FILE> --brick-dim <N> [OPTIONS]
//!
//! Options:
//!   --input <FILE>     Input volume (u32 prefix + raw f32 timesteps)
//!   --output <FILE>    Output TSP file
//!   --brick-dim <N>    Cubic brick dimension in voxels
//!   --padding <N>      Brick padding width recorded in the header (default: 0)
//!   --structure <N>    Structure tag recorded in the header (default: 0)
//!   --manifest         Also write a <output>.manifest.json geometry sidecar

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use tspforge::core::logging;
use tspforge::tsp::{PipelineConfig, TspPipeline, TspSummary};

fn main() -> ExitCode {
    logging::init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 || args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return ExitCode::FAILURE;
    }

    let (Some(input), Some(output), Some(brick_dim)) = (
        parse_str_arg(&args, "--input"),
        parse_str_arg(&args, "--output"),
        parse_u32_arg(&args, "--brick-dim"),
    ) else {
        print_usage();
        return ExitCode::FAILURE;
    };
    let padding_width = parse_u32_arg(&args, "--padding").unwrap_or(0);
    let structure = parse_u32_arg(&args, "--structure").unwrap_or(0);
    let write_manifest = args.iter().any(|a| a == "--manifest");

    let config = PipelineConfig {
        input: PathBuf::from(input),
        output: PathBuf::from(output),
        brick_dim,
        padding_width,
        structure,
    };

    println!("=== TSP preprocessor ===");
    println!("Input:  {}", config.input.display());
    println!("Output: {}", config.output.display());
    println!("Brick:  {0}x{0}x{0} voxels", config.brick_dim);
    println!();

    let start = Instant::now();
    match TspPipeline::new(config.clone()).construct() {
        Ok(summary) => {
            println!();
            println!("=== Construction complete ===");
            println!(
                "Octree: {} nodes x {} BST bricks each",
                summary.num_octree_nodes, summary.num_bst_nodes
            );
            println!(
                "Size:   {:.1} MB in {:.1}s",
                summary.output_bytes as f64 / (1024.0 * 1024.0),
                start.elapsed().as_secs_f64()
            );
            if write_manifest {
                if let Err(e) = emit_manifest(&config.output, &summary) {
                    log::error!("manifest write failed: {}", e);
                    return ExitCode::FAILURE;
                }
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            log::error!("TSP construction failed: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn emit_manifest(output: &std::path::Path, summary: &TspSummary) -> std::io::Result<()> {
    let mut path = output.as_os_str().to_os_string();
    path.push(".manifest.json");
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(&path, json)?;
    println!("Manifest: {}", PathBuf::from(path).display());
    Ok(())
}

fn print_usage() {
    eprintln!("Usage: tspforge --input <FILE> --output <FILE> --brick-dim <N>");
    eprintln!("                [--padding <N>] [--structure <N>] [--manifest]");
}

fn parse_u32_arg(args: &[String], flag: &str) -> Option<u32> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .and_then(|s| s.parse().ok())
}

fn parse_str_arg(args: &[String], flag: &str) -> Option<String> {
    args.iter()
        .position(|a| a == flag)
        .and_then(|i| args.get(i + 1))
        .cloned()
}
