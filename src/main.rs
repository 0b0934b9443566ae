use anyhow::{Context as AnyhowContext, Result};
use clap::Parser;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use indicatif::ProgressStyle;
use tracing::{info, info_span};
use tracing_indicatif::span_ext::IndicatifSpanExt;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

use lk_tracker_rust::app::{App, EventSource, InputEvent};
use lk_tracker_rust::config::TrackerConfig;
use lk_tracker_rust::dataset::Dataset;
use lk_tracker_rust::synthetic::{SyntheticParams, SyntheticSequence};
use lk_tracker_rust::tracker::Tracker;

#[derive(Parser)]
pub struct Args {
    /// Recorded session folder with data.jsonl, a synthetic sequence is
    /// generated when omitted
    #[clap(short)]
    pub input_folder: Option<String>,

    /// Write one JSON line per processed frame here
    #[clap(short)]
    pub output: Option<String>,

    #[clap(short, long)]
    pub verbose: bool,

    #[clap(flatten)]
    pub synthetic: SyntheticParams,

    #[clap(flatten)]
    pub config: TrackerConfig,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // setup logging
    let level = if args.verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    let indicatif_layer = IndicatifLayer::new();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(indicatif_layer.get_stdout_writer())
                .with_filter(level),
        )
        .with(indicatif_layer)
        .init();

    let mut source: Box<dyn EventSource> = match &args.input_folder {
        Some(folder) => Box::new(Dataset::new(Path::new(folder))?),
        None => {
            info!("no input folder, generating a synthetic sequence");
            Box::new(SyntheticSequence::new(&args.synthetic)?)
        }
    };

    let mut output = match &args.output {
        Some(path) => Some(BufWriter::new(
            File::create(path).with_context(|| format!("Failed to create {}", path))?,
        )),
        None => None,
    };

    let header_span = info_span!("header");
    header_span.pb_set_style(&ProgressStyle::default_bar());
    header_span.pb_set_length(source.frame_count());
    let header_span_enter = header_span.enter();

    let mut app = App::new(Tracker::new(args.config.clone()));
    while let Some(event) = source.next_event()? {
        let is_frame = matches!(event, InputEvent::Frame(_));
        let record = app.handle(event)?;
        if is_frame {
            header_span.pb_inc(1);
        }
        if let (Some(record), Some(output)) = (record, output.as_mut()) {
            serde_json::to_writer(&mut *output, &record)?;
            writeln!(output)?;
        }
        if app.finished() {
            break;
        }
    }
    if let Some(output) = output.as_mut() {
        output.flush()?;
    }

    std::mem::drop(header_span_enter);
    std::mem::drop(header_span);

    let summary = app.summary();
    info!(
        "{} frames, {} locked, {} selections, {} losses, {} dropped while paused",
        summary.frames,
        summary.locked_frames,
        summary.selections,
        summary.losses,
        summary.dropped_frames
    );

    Ok(())
}
