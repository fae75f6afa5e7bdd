// Copyright 2025. Command-line front end for blur-processor.
//
// Usage:
//   blur-preview blur <input> <radius> <iterations> -o <output>
//   blur-preview sequence <input> <radius> <max_iterations> -o <prefix> [--latest]
//   blur-preview compare <input> <radius>

use std::path::Path;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use blur_preview::{compare_images, frame_path, load_image, save_image};
use blur_processor::{BlurImageProcessor, BlurNotification, DeliveryQueue, JobState, ProcessorConfig};

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    let result = match args[1].as_str() {
        "blur" => cmd_blur(&args[2..]),
        "sequence" => cmd_sequence(&args[2..]),
        "compare" => cmd_compare(&args[2..]),
        _ => {
            eprintln!("Unknown command: {}", args[1]);
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {}", e);
        process::exit(1);
    }
}

fn print_usage() {
    eprintln!("blur-preview - box blur preview tool");
    eprintln!();
    eprintln!("Commands:");
    eprintln!("  blur <input> <radius> <iterations> -o <output>");
    eprintln!("      Blur an image synchronously.");
    eprintln!();
    eprintln!("  sequence <input> <radius> <max_iterations> -o <prefix> [--latest]");
    eprintln!("      Queue one blur per iteration count and save each delivered frame.");
    eprintln!("      With --latest, each new job cancels the previous one if it has not started.");
    eprintln!();
    eprintln!("  compare <input> <radius>");
    eprintln!("      Compare one 2-iteration blur with two chained 1-iteration blurs.");
}

fn parse<T: std::str::FromStr>(value: Option<&String>, what: &str) -> Result<T, String> {
    value
        .ok_or_else(|| format!("missing {}", what))?
        .parse()
        .map_err(|_| format!("invalid {}", what))
}

/// Value following `-o`, if present.
fn output_arg(args: &[String]) -> Option<&String> {
    args.iter()
        .position(|a| a == "-o")
        .and_then(|i| args.get(i + 1))
}

fn cmd_blur(args: &[String]) -> Result<(), String> {
    let input = args.first().ok_or("missing input")?;
    let radius: u32 = parse(args.get(1), "radius")?;
    let iterations: u8 = parse(args.get(2), "iterations")?;
    let output = output_arg(args).ok_or("missing -o <output>")?;

    let image = load_image(Path::new(input))?;
    let processor = BlurImageProcessor::new(image).map_err(|e| e.to_string())?;
    let blurred = processor
        .sync_blur(radius, iterations)
        .map_err(|e| e.to_string())?;
    save_image(Path::new(output), &blurred)?;
    println!("Saved: {}", output);
    Ok(())
}

fn cmd_sequence(args: &[String]) -> Result<(), String> {
    let input = args.first().ok_or("missing input")?;
    let radius: u32 = parse(args.get(1), "radius")?;
    let max_iterations: u8 = parse(args.get(2), "max_iterations")?;
    let prefix = output_arg(args).ok_or("missing -o <prefix>")?;
    let latest = args.iter().any(|a| a == "--latest");

    // This thread is the delivery context: frames are written from here.
    let (queue, pump) = DeliveryQueue::channel();
    let config = ProcessorConfig::new().with_delivery_context(Arc::new(queue));
    let image = load_image(Path::new(input))?;
    let processor =
        BlurImageProcessor::with_config(Some(image), config).map_err(|e| e.to_string())?;
    let notifications = processor.subscribe();

    let handles = (1..=max_iterations)
        .map(|n| processor.async_blur_canceling_last(radius, n, latest))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| e.to_string())?;

    let mut written = 0;
    for handle in &handles {
        if handle.wait() == JobState::Canceled {
            println!("  job {} canceled", handle.id());
        }
    }
    let expected = handles
        .iter()
        .filter(|h| h.state() != JobState::Canceled)
        .count();
    while written < expected {
        if !pump.run_one_timeout(Duration::from_secs(30)) {
            return Err("timed out waiting for results".to_string());
        }
        for notification in notifications.try_iter() {
            match notification {
                BlurNotification::ImageReady { job, image } => {
                    let path = frame_path(prefix, job.get());
                    save_image(Path::new(&path), &image)?;
                    println!("Saved: {}", path);
                }
                BlurNotification::ProcessingError { job, code } => {
                    eprintln!("  job {} failed with code {}", job, code);
                }
            }
            written += 1;
        }
    }
    Ok(())
}

fn cmd_compare(args: &[String]) -> Result<(), String> {
    let input = args.first().ok_or("missing input")?;
    let radius: u32 = parse(args.get(1), "radius")?;

    let image = load_image(Path::new(input))?;
    let processor = BlurImageProcessor::new(image).map_err(|e| e.to_string())?;
    let once = processor.sync_blur(radius, 2).map_err(|e| e.to_string())?;
    let first = processor.sync_blur(radius, 1).map_err(|e| e.to_string())?;
    processor.set_image(Some(first));
    let twice = processor.sync_blur(radius, 1).map_err(|e| e.to_string())?;

    let result = compare_images(&once, &twice)?;
    println!("{}", result);
    Ok(())
}
