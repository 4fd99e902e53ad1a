//! conveyor_sim - synthetic conveyor load for a running inspectd
//!
//! Feeds the prediction endpoint the way the belt would:
//! 1. Picks an image per item (from --dir, or a generated frame)
//! 2. Posts it to /api/v1/predict and parses the verdict
//! 3. Sleeps the conveyor interval and repeats
//! 4. Prints a pass/fail/latency summary

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use rand::seq::SliceRandom;
use rand::Rng;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use uuid::Uuid;

use vision_eye::{Frame, InspectionResult};

#[derive(Parser, Debug)]
#[command(author, version, about = "Feed a running inspectd with simulated conveyor items")]
struct Args {
    /// Base URL of the inspection api.
    #[arg(long, env = "VISION_API_URL", default_value = "http://127.0.0.1:8000")]
    api: String,
    /// Number of items to run down the belt.
    #[arg(long, default_value_t = 10)]
    items: u32,
    /// Directory of sample images to draw from (jpg/jpeg/png).
    #[arg(long)]
    dir: Option<PathBuf>,
    /// Milliseconds between items.
    #[arg(long, default_value_t = 500)]
    interval_ms: u64,
    /// Also fire the simulated trigger for each item.
    #[arg(long)]
    fire_trigger: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout(Duration::from_secs(30))
        .build();

    let pool = match &args.dir {
        Some(dir) => {
            let images = find_images(dir)?;
            if images.is_empty() {
                return Err(anyhow!("no images found under {}", dir.display()));
            }
            println!(
                "drawing {} items from {} sample images",
                args.items,
                images.len()
            );
            Some(images)
        }
        None => {
            println!("no --dir given; generating synthetic frames");
            None
        }
    };

    let base = args.api.trim_end_matches('/');
    let predict_url = format!("{base}/api/v1/predict");
    let trigger_url = format!("{base}/api/v1/trigger/simulate");

    let mut rng = rand::thread_rng();
    let bar = ProgressBar::new(u64::from(args.items));
    bar.set_style(
        ProgressStyle::with_template("{bar:30} {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    let mut passed = 0u32;
    let mut rejected = 0u32;
    let mut errors = 0u32;
    let mut total_latency = Duration::ZERO;

    for _ in 0..args.items {
        let batch_id = short_id(&Uuid::new_v4());
        let (bytes, content_type) = match &pool {
            Some(images) => {
                let path = images
                    .choose(&mut rng)
                    .ok_or_else(|| anyhow!("image pool is empty"))?;
                let bytes = std::fs::read(path)
                    .with_context(|| format!("read {}", path.display()))?;
                (bytes, content_type_for(path))
            }
            None => (synthetic_item(&mut rng)?, "image/jpeg"),
        };

        if args.fire_trigger {
            if let Err(err) = agent.post(&trigger_url).call() {
                bar.println(format!("trigger request failed: {err}"));
            }
        }

        let start = Instant::now();
        match post_predict(&agent, &predict_url, &bytes, content_type) {
            Ok(result) => {
                let latency = start.elapsed();
                total_latency += latency;
                if result.verdict.is_fail() {
                    rejected += 1;
                    bar.println(format!(
                        "FAIL batch {} defect={} {}ms",
                        batch_id,
                        defect_label(&result),
                        latency.as_millis()
                    ));
                } else {
                    passed += 1;
                    bar.println(format!(
                        "PASS batch {} conf={:.2} {}ms",
                        batch_id,
                        result.confidence.unwrap_or(1.0),
                        latency.as_millis()
                    ));
                }
            }
            Err(err) => {
                errors += 1;
                bar.println(format!("request failed: {err:#}"));
            }
        }
        bar.inc(1);
        std::thread::sleep(Duration::from_millis(args.interval_ms));
    }
    bar.finish_and_clear();

    let processed = passed + rejected;
    let avg_ms = if processed > 0 {
        total_latency.as_millis() / u128::from(processed)
    } else {
        0
    };
    println!();
    println!("Simulation Summary");
    println!("==============================");
    println!("Total Processed : {processed}");
    println!("Accepted        : {passed}");
    println!("Rejected        : {rejected}");
    if errors > 0 {
        println!("Errors          : {errors}");
    }
    println!("Avg Latency     : {avg_ms} ms");
    println!("==============================");

    Ok(())
}

fn post_predict(
    agent: &ureq::Agent,
    url: &str,
    bytes: &[u8],
    content_type: &str,
) -> Result<InspectionResult> {
    let response = match agent
        .post(url)
        .set("Content-Type", content_type)
        .send_bytes(bytes)
    {
        Ok(response) => response,
        Err(ureq::Error::Status(code, response)) => {
            let detail = response.into_string().unwrap_or_default();
            return Err(anyhow!("api returned {}: {}", code, detail));
        }
        Err(err) => return Err(anyhow!("api unreachable: {}", err)),
    };
    let body = response.into_string()?;
    serde_json::from_str(&body).map_err(|err| anyhow!("invalid api response: {}", err))
}

fn find_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut images = Vec::new();
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("read directory {}", dir.display()))?;
    for entry in entries {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        if matches!(ext.as_deref(), Some("jpg" | "jpeg" | "png")) {
            images.push(path);
        }
    }
    Ok(images)
}

fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Mostly bright noise; roughly one item in four comes out dark enough
/// for the stub backend to reject.
fn synthetic_item(rng: &mut impl Rng) -> Result<Vec<u8>> {
    let defective = rng.gen_ratio(1, 4);
    let mut pixels = vec![0u8; 320 * 240 * 3];
    for px in pixels.iter_mut() {
        *px = if defective {
            rng.gen_range(0..=40)
        } else {
            rng.gen_range(96..=255)
        };
    }
    Frame::new(pixels, 320, 240)?.to_jpeg()
}

fn defect_label(result: &InspectionResult) -> String {
    if let Some(class) = &result.predicted_class {
        return class.clone();
    }
    result
        .defects
        .first()
        .map(|d| d.class_name.clone())
        .unwrap_or_else(|| "unknown".to_string())
}

fn short_id(id: &Uuid) -> String {
    let mut s = id.to_string();
    s.truncate(8);
    s
}
