//! Turning raw centroids into a palette of distinct colors that actually
//! occur in the image.

use tracing::debug;

use crate::color::{ColorVector, DistanceMethod};
use crate::kmeans::Centroid;
use crate::progressive::PixelSample;

/// Similarity radius used when searching the image for a centroid's color.
pub const REGION_TOLERANCE: f64 = 0.15;

/// Fraction of the tolerance a fallback color must keep from every color
/// already selected.
const FALLBACK_TOLERANCE_RATIO: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SelectionConfig {
    pub palette_size: usize,
    /// Minimum separation in hue degrees; divided by 360 before comparing.
    pub tolerance_degrees: f64,
    pub tolerance_enabled: bool,
    pub distance_method: DistanceMethod,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            palette_size: 10,
            tolerance_degrees: 30.0,
            tolerance_enabled: true,
            distance_method: DistanceMethod::default(),
        }
    }
}

impl SelectionConfig {
    pub fn normalized_tolerance(&self) -> f64 {
        self.tolerance_degrees / 360.0
    }
}

/// One color of the final palette with the center of the largest image
/// region painted in it.
#[derive(Clone, Debug, PartialEq)]
pub struct PaletteEntry {
    pub color: ColorVector,
    pub hex: String,
    pub x: u32,
    pub y: u32,
}

/// Result of filtering centroids, before any region search.
#[derive(Clone, Debug, PartialEq)]
pub struct Selection {
    pub colors: Vec<ColorVector>,
    /// How many colors passed the strict tolerance pass.
    pub first_pass: usize,
}

fn quality(color: &ColorVector) -> f64 {
    0.7 * color.saturation() + 0.3 * color.value()
}

/// Pick at most `palette_size` centroid colors that are far enough apart.
pub fn select_colors(centroids: &[Centroid], config: &SelectionConfig) -> Selection {
    let all: Vec<ColorVector> = centroids.iter().map(|c| c.location).collect();
    let target = all.len().min(config.palette_size);

    if !config.tolerance_enabled {
        return Selection {
            first_pass: all.len(),
            colors: all.into_iter().take(target).collect(),
        };
    }

    let tolerance = config.normalized_tolerance();
    let method = config.distance_method;

    let mut ranked = all.clone();
    ranked.sort_by(|a, b| quality(b).total_cmp(&quality(a)));

    let mut accepted: Vec<ColorVector> = Vec::new();
    let mut rejected: Vec<ColorVector> = Vec::new();
    for color in ranked {
        let too_close = accepted
            .iter()
            .any(|kept| method.distance(&color, kept) < tolerance);
        if too_close {
            debug!(%color, "rejected: too close to an accepted color");
            rejected.push(color);
        } else {
            debug!(%color, "accepted");
            accepted.push(color);
        }
    }
    let first_pass = accepted.len();
    debug!(first_pass, total = all.len(), tolerance, %method, "tolerance pass");

    if accepted.is_empty() {
        return Selection {
            colors: all.into_iter().take(target).collect(),
            first_pass,
        };
    }

    let mut selected = accepted.clone();
    selected.truncate(target);

    if selected.len() < target {
        if let Some(mean) = ColorVector::mean(&accepted) {
            rejected.sort_by(|a, b| method.distance(b, &mean).total_cmp(&method.distance(a, &mean)));
        }
        let fallback_tolerance = tolerance * FALLBACK_TOLERANCE_RATIO;
        for color in rejected {
            if selected.len() >= target {
                break;
            }
            let distinct = selected
                .iter()
                .all(|kept| method.distance(&color, kept) >= fallback_tolerance);
            if distinct {
                debug!(%color, "fallback accepted");
                selected.push(color);
            }
        }
    }

    Selection {
        colors: selected,
        first_pass,
    }
}

/// Center of the largest 4-connected region of pixels within
/// [`REGION_TOLERANCE`] of `target`, or `None` when no pixel is that close.
///
/// `samples` must hold one entry per pixel in row-major order.
pub fn find_representative(
    samples: &[PixelSample],
    width: u32,
    height: u32,
    target: &ColorVector,
    method: DistanceMethod,
) -> Option<(u32, u32)> {
    let (w, h) = (width as usize, height as usize);
    if samples.len() != w * h {
        return None;
    }
    let matches = |i: usize| method.distance(target, &samples[i].color) <= REGION_TOLERANCE;

    let mut visited = vec![false; samples.len()];
    let mut best: Option<(usize, u64, u64)> = None;
    let mut stack = Vec::new();

    for seed in 0..samples.len() {
        if visited[seed] || !matches(seed) {
            continue;
        }

        let (mut count, mut sum_x, mut sum_y) = (0usize, 0u64, 0u64);
        stack.push(seed);
        while let Some(index) = stack.pop() {
            if visited[index] {
                continue;
            }
            visited[index] = true;
            if !matches(index) {
                continue;
            }
            let sample = &samples[index];
            count += 1;
            sum_x += sample.x as u64;
            sum_y += sample.y as u64;

            let (x, y) = (index % w, index / w);
            if x + 1 < w {
                stack.push(index + 1);
            }
            if x > 0 {
                stack.push(index - 1);
            }
            if y + 1 < h {
                stack.push(index + w);
            }
            if y > 0 {
                stack.push(index - w);
            }
        }

        if best.is_none_or(|(largest, _, _)| count > largest) {
            best = Some((count, sum_x, sum_y));
        }
    }

    best.map(|(count, sum_x, sum_y)| {
        let n = count as f64;
        (
            (sum_x as f64 / n).round() as u32,
            (sum_y as f64 / n).round() as u32,
        )
    })
}

/// Filter `centroids` and attach a representative image location to every
/// survivor. Colors with no matching pixels are dropped.
pub fn select_palette(
    centroids: &[Centroid],
    samples: &[PixelSample],
    width: u32,
    height: u32,
    config: &SelectionConfig,
) -> Vec<PaletteEntry> {
    let selection = select_colors(centroids, config);
    selection
        .colors
        .into_iter()
        .filter_map(|color| {
            let hex = color.to_hex();
            match find_representative(samples, width, height, &color, config.distance_method) {
                Some((x, y)) => Some(PaletteEntry { color, hex, x, y }),
                None => {
                    debug!(%hex, "no representative region, dropping color");
                    None
                }
            }
        })
        .collect()
}
