//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use imagepipe::Priority;

/// Request priority selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PriorityArg {
    /// Speculative background loads
    VeryLow,
    /// Prefetching
    Low,
    /// Standard requests
    Normal,
    /// Content the user is waiting for
    High,
    /// Content blocking the user
    VeryHigh,
}

impl From<PriorityArg> for Priority {
    fn from(arg: PriorityArg) -> Self {
        match arg {
            PriorityArg::VeryLow => Priority::VeryLow,
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::VeryHigh => Priority::VeryHigh,
        }
    }
}

/// Parse `WIDTHxHEIGHT` (e.g. `256x128`) for `--resize`.
pub fn parse_dimensions(s: &str) -> Result<(u32, u32), String> {
    let (width, height) = s
        .trim()
        .split_once(['x', 'X'])
        .ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{}'", s))?;

    let parse = |part: &str| -> Result<u32, String> {
        match part.trim().parse::<u32>() {
            Ok(0) => Err(format!("dimensions must be positive, got '{}'", s)),
            Ok(value) => Ok(value),
            Err(_) => Err(format!("invalid dimension '{}' in '{}'", part, s)),
        }
    };

    Ok((parse(width)?, parse(height)?))
}

/// Output file name for the `index`th URL: the last path segment with its
/// extension replaced, or `image-<index>` if the URL has no usable name.
pub fn output_path(dir: &Path, url: &str, index: usize, extension: &str) -> PathBuf {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    // Drop scheme and host
    let path = match without_query.split_once("://") {
        Some((_, rest)) => rest.split_once('/').map(|(_, path)| path).unwrap_or(""),
        None => without_query,
    };
    let segment = path
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .filter(|segment| !segment.is_empty());

    let stem = segment
        .map(|segment| match segment.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem,
            _ => segment,
        })
        .map(str::to_string)
        .unwrap_or_else(|| format!("image-{}", index));

    dir.join(format!("{}.{}", stem, extension))
}
