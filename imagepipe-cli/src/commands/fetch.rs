//! Fetch command - load images through the pipeline and save them as PNG.
//!
//! All URLs are submitted at once, so repeated URLs share one download and
//! one decode exactly as they would inside an application.

use std::path::{Path, PathBuf};
use std::time::Instant;

use imagepipe::process::{Blur, Grayscale, Resize};
use imagepipe::{Event, ImageRequest, ImageTask, Priority, RequestOptions};
use tokio::task::JoinSet;
use tracing::{info, warn};

use super::common::{output_path, PriorityArg};
use crate::error::CliError;
use crate::runner::CliRunner;

/// Arguments for the fetch command.
pub struct FetchArgs {
    pub urls: Vec<String>,
    pub output_dir: PathBuf,
    pub resize: Option<(u32, u32)>,
    pub grayscale: bool,
    pub blur: Option<f32>,
    pub thumbnail: Option<u32>,
    pub priority: Option<PriorityArg>,
    pub reload: bool,
    pub raw: bool,
    pub no_coalescing: bool,
    pub progressive: bool,
}

/// Run the fetch command.
pub async fn run(args: FetchArgs, config_path: Option<&Path>) -> Result<(), CliError> {
    let runner = CliRunner::new(config_path)?;
    runner.log_startup("fetch");

    let no_coalescing = args.no_coalescing;
    let progressive = args.progressive;
    let pipeline = runner.create_pipeline(|config| {
        let config = if no_coalescing {
            config.with_coalescing(false)
        } else {
            config
        };
        if progressive {
            config.with_progressive_decoding(true)
        } else {
            config
        }
    })?;

    std::fs::create_dir_all(&args.output_dir).map_err(|e| CliError::FileWrite {
        path: args.output_dir.display().to_string(),
        error: e,
    })?;

    let total = args.urls.len();
    println!("Fetching {} URL(s) into {}", total, args.output_dir.display());
    let start = Instant::now();

    let mut jobs = JoinSet::new();
    for (index, url) in args.urls.iter().enumerate() {
        let request = build_request(url, &args);
        if args.raw {
            let task = pipeline.load_data(request);
            let path = output_path(&args.output_dir, url, index, "bin");
            let url = url.clone();
            jobs.spawn(async move {
                let result = task.response().await;
                save_data(&url, &path, result)
            });
        } else {
            let task = pipeline.load_image(request);
            let path = output_path(&args.output_dir, url, index, "png");
            let url = url.clone();
            jobs.spawn(async move { watch_image(&url, &path, task).await });
        }
    }

    let mut failed = 0;
    loop {
        tokio::select! {
            joined = jobs.join_next() => match joined {
                Some(Ok(true)) => {}
                Some(Ok(false)) | Some(Err(_)) => failed += 1,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                warn!("Interrupted, invalidating pipeline");
                pipeline.invalidate();
                jobs.shutdown().await;
                return Err(CliError::Interrupted);
            }
        }
    }

    if let Some(stats) = pipeline.stats().await {
        info!(
            succeeded = stats.succeeded,
            failed = stats.failed,
            memory_cache_hits = stats.memory_cache_hits,
            disk_cache_hits = stats.disk_cache_hits,
            rate_limited = stats.rate_limited,
            "Fetch finished"
        );
        println!();
        println!(
            "Done in {:.2}s: {} request(s) served by {} fetch(es) and {} decode(s)",
            start.elapsed().as_secs_f64(),
            total,
            stats.fetch_original_data.created,
            stats.fetch_original_image.created,
        );
        if stats.memory_cache_hits + stats.disk_cache_hits > 0 {
            println!(
                "  Cache hits: {} memory, {} disk",
                stats.memory_cache_hits, stats.disk_cache_hits
            );
        }
    }

    if failed > 0 {
        return Err(CliError::Fetch { failed, total });
    }
    Ok(())
}

fn build_request(url: &str, args: &FetchArgs) -> ImageRequest {
    let mut request = ImageRequest::new(url);
    if let Some((width, height)) = args.resize {
        request = request.with_processor(Resize::new(width, height));
    }
    if args.grayscale {
        request = request.with_processor(Grayscale);
    }
    if let Some(sigma) = args.blur {
        request = request.with_processor(Blur::new(sigma));
    }
    if let Some(max_pixels) = args.thumbnail {
        request = request.with_thumbnail(max_pixels);
    }
    if let Some(priority) = args.priority {
        request = request.with_priority(Priority::from(priority));
    }
    if args.reload {
        request = request.with_options(RequestOptions::default().reload_ignoring_cache());
    }
    request
}

/// Follows one image task to completion. Returns true if the image was
/// saved.
async fn watch_image(url: &str, path: &Path, mut task: ImageTask) -> bool {
    let mut previews = 0;
    while let Some(event) = task.next_event().await {
        match event {
            Event::Progress(progress) => {
                tracing::debug!(url, %progress, "Progress");
            }
            Event::Preview(_) => previews += 1,
            Event::Cancelled => {
                println!("✗ {}: cancelled", url);
                return false;
            }
            Event::Finished(Err(e)) => {
                println!("✗ {}: {}", url, e);
                return false;
            }
            Event::Finished(Ok(response)) => {
                let source = match response.cache_type {
                    Some(cache) => format!(" (from {:?} cache)", cache).to_lowercase(),
                    None => String::new(),
                };
                return match save_png(&response.image, path) {
                    Ok(()) => {
                        println!(
                            "✓ {} -> {} ({}x{}{}{})",
                            url,
                            path.display(),
                            response.width(),
                            response.height(),
                            source,
                            if previews > 0 {
                                format!(", {} preview(s)", previews)
                            } else {
                                String::new()
                            }
                        );
                        true
                    }
                    Err(e) => {
                        println!("✗ {}: {}", url, e);
                        false
                    }
                };
            }
        }
    }
    false
}

fn save_png(image: &image::RgbaImage, path: &Path) -> Result<(), CliError> {
    image
        .save_with_format(path, image::ImageFormat::Png)
        .map_err(|e| CliError::Encode {
            path: path.display().to_string(),
            error: e,
        })
}

fn save_data(
    url: &str,
    path: &Path,
    result: Result<imagepipe::FetchedData, imagepipe::PipelineError>,
) -> bool {
    let data = match result {
        Ok(data) => data,
        Err(e) => {
            println!("✗ {}: {}", url, e);
            return false;
        }
    };

    match std::fs::write(path, &data.data) {
        Ok(()) => {
            println!("✓ {} -> {} ({} bytes)", url, path.display(), data.len());
            true
        }
        Err(e) => {
            println!("✗ {}: failed to write {}: {}", url, path.display(), e);
            false
        }
    }
}
