//! storage_check - one-shot evidence upload probe
//!
//! Uploads a placeholder frame to the configured object store and prints
//! the resulting URL. Exits nonzero if the upload fails.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use vision_eye::{EvidenceStore, Frame, HttpObjectStore, InspectdConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Probe the evidence object store with a one-shot upload")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "VISION_CONFIG")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let cfg = InspectdConfig::load_from(args.config.as_deref())?;
    let store = HttpObjectStore::new(cfg.storage.clone());

    println!(
        "attempting upload to {}/{} ...",
        cfg.storage.endpoint, cfg.storage.bucket
    );
    let jpeg = Frame::placeholder().to_jpeg()?;
    match store.put(&jpeg, "image/jpeg") {
        Ok(url) => {
            println!("upload successful");
            println!("url: {url}");
            Ok(())
        }
        Err(err) => {
            eprintln!("upload failed: {err:#}");
            std::process::exit(1);
        }
    }
}
