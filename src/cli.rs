//! Command-line surface: argument parsing, collaborator wiring, and the
//! progress bar. The core pipeline stays free of terminal concerns.

use crate::configure::NoFilesystem;
use crate::dest::{FileDestination, ImageDestination};
use crate::pipeline::{Pipeline, PipelineOptions};
use crate::source::open_source;
use anyhow::Context;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "imgmake",
    about = "Turn a read-only OS image into a configured, ready-to-write image"
)]
pub struct Cli {
    /// Input URL (file:// and img-s3:// URLs are accepted)
    #[arg(short, long, value_name = "URL")]
    pub input: String,

    /// Output file path
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    /// Config file path
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Trim all supported partitions
    #[arg(short, long)]
    pub trim_partitions: bool,

    /// Turn verbose logging on
    #[arg(short, long)]
    pub verbose: bool,
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let config: Option<Value> = match &cli.config {
        Some(path) => {
            let data = tokio::fs::read(path)
                .await
                .with_context(|| format!("reading config file {}", path.display()))?;
            Some(serde_json::from_slice(&data).context("parsing config file")?)
        }
        None => None,
    };

    // One explicitly constructed, unauthenticated client; nothing global.
    let aws_config = aws_config::ConfigLoader::default()
        .no_credentials()
        .region("us-east-1")
        .load()
        .await;
    let s3 = aws_sdk_s3::Client::new(&aws_config);

    let mut source = open_source(&cli.input, &s3).await?;
    let metadata = source.metadata().await?;
    info!(size = metadata.size, "opened source image");

    let dest = FileDestination::create(&cli.output, metadata.size)
        .await
        .with_context(|| format!("creating output file {}", cli.output.display()))?;
    let dest = ImageDestination::Random(Box::new(dest));

    let bar = ProgressBar::new(metadata.size);
    bar.set_style(
        ProgressStyle::with_template("[{bar:40}] {bytes} / {total_bytes} ({percent}%)")
            .expect("static progress template"),
    );

    let pipeline = Pipeline::new(Arc::new(NoFilesystem), Arc::new(NoFilesystem));
    let options = PipelineOptions {
        config,
        trim: cli.trim_partitions,
        flags: serde_json::Map::new(),
    };
    let summary = pipeline
        .run(source, dest, options, |sample| {
            bar.set_position(sample.stream_position);
        })
        .await?;
    bar.finish();
    info!(
        plan = ?summary.plan,
        bytes_written = summary.bytes_written,
        "image written"
    );
    Ok(())
}
