use std::path::Path;
use std::process;
use std::sync::Arc;

use clap::Parser;
use futures::StreamExt;
use futures::future::join_all;
use reelgrab::cli::Args;
use reelgrab::error::{AppError, Result};
use reelgrab::input::output_names;
use reelgrab::output::{JobView, Renderer, write_artifact};
use reelgrab_engine::{DownloadRequest, FfmpegEngine, HttpClient, JobEvents, Scheduler};
use tracing::{Level, error, info, warn};
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    init_logging(args.verbose, args.quiet);

    if let Err(e) = run(args).await {
        error!("Application error: {}", e);
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

async fn run(args: Args) -> Result<()> {
    let config = args.to_config()?;

    let mut requests = args
        .urls
        .iter()
        .map(|url| DownloadRequest::parse(url, String::new()))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    let urls: Vec<_> = requests.iter().map(|request| request.url.clone()).collect();
    for (request, name) in requests.iter_mut().zip(output_names(&urls, args.name.as_deref())) {
        request.output_name = name;
    }

    let source = Arc::new(HttpClient::new(&config.fetch)?);
    let engine = Box::new(FfmpegEngine::new(&config.engine));
    let scheduler = Scheduler::spawn(&config, source, engine);
    info!(
        jobs = requests.len(),
        ffmpeg = %config.engine.ffmpeg_path,
        container = %config.engine.container,
        "Starting downloads"
    );

    let renderer = Renderer::new(args.json, args.quiet);
    let jobs = requests.into_iter().map(|request| {
        let view = renderer.track(&request.output_name);
        let events = scheduler.submit(request);
        follow(events, view, &args.output_dir)
    });

    let all = join_all(jobs);
    tokio::pin!(all);
    let results = tokio::select! {
        results = &mut all => results,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, cancelling downloads");
            scheduler.shutdown().await;
            all.await
        }
    };
    scheduler.shutdown().await;

    summarize(&results)
}

/// Renders one job's events and saves its artifact.
async fn follow(mut events: JobEvents, view: JobView, output_dir: &Path) -> Result<()> {
    while let Some(event) = events.next().await {
        view.update(&event);

        if let Some(artifact) = &event.payload {
            let path = write_artifact(output_dir, artifact).await?;
            view.saved(&event, &path);
            return Ok(());
        }
        if let Some(err) = &event.error {
            view.failed(&event, err);
            return Err(err.clone().into());
        }
    }

    view.skipped();
    Ok(())
}

fn summarize(results: &[Result<()>]) -> Result<()> {
    let failed = results.iter().filter(|r| r.is_err()).count();
    for err in results.iter().filter_map(|r| r.as_ref().err()) {
        warn!(error = %err, "Download failed");
    }

    if failed == 0 {
        info!(jobs = results.len(), "All downloads finished");
        Ok(())
    } else {
        Err(AppError::Failed {
            failed,
            total: results.len(),
        })
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::from_default_env().add_directive(Level::INFO.into())
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .init();
}
