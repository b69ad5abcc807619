//! Progressive multi-resolution clustering.
//!
//! The image is clustered at coarse block sizes first. Each level's centroids
//! are compared with the previous level's; once they stop moving the finer
//! levels are skipped. Only the final palette search touches every pixel.

use std::ops::ControlFlow;
use std::time::Duration;

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::color::{ColorVector, convergence_distance, rgb_to_hex};
use crate::error::{ClusterError, PipelineError, SequenceError};
use crate::kmeans::{ADVANCED_ITERATIONS, Centroid, KmeansConfig, advanced_centroids, kmeans};
use crate::selection::{PaletteEntry, SelectionConfig, select_palette};

/// Share of the progress bar spent walking resolution levels.
const LEVELS_PROGRESS: f64 = 80.0;

/// A decoded pixel (or downsampled block) with both color representations.
#[derive(Clone, Debug, PartialEq)]
pub struct PixelSample {
    pub x: u32,
    pub y: u32,
    pub color: ColorVector,
    pub hex: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolutionLevel {
    pub block_size: u32,
    pub label: String,
    pub max_iterations: usize,
}

impl ResolutionLevel {
    pub fn new(block_size: u32, max_iterations: usize) -> Self {
        let label = if block_size <= 1 {
            "1x1 pixels".to_string()
        } else {
            format!("{block_size}x{block_size} quads")
        };
        Self {
            block_size: block_size.max(1),
            label,
            max_iterations,
        }
    }
}

/// Execution profile. `Constrained` trades accuracy for responsiveness on
/// low-power hosts: fewer and coarser levels, a smaller iteration budget, a
/// looser convergence threshold and frequent pauses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    #[default]
    Standard,
    Constrained,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Pacing {
    every: usize,
    delay: Duration,
}

impl Profile {
    /// Levels in strictly decreasing block size.
    pub fn levels(self, iterations: usize) -> Vec<ResolutionLevel> {
        match self {
            Profile::Standard => [8, 6, 4, 2, 1]
                .into_iter()
                .map(|block| ResolutionLevel::new(block, iterations))
                .collect(),
            Profile::Constrained => {
                let budget = (iterations / 2).max(2);
                [8, 6, 4]
                    .into_iter()
                    .map(|block| ResolutionLevel::new(block, budget))
                    .collect()
            }
        }
    }

    pub fn convergence_threshold(self) -> f64 {
        match self {
            Profile::Standard => 0.01,
            Profile::Constrained => 0.03,
        }
    }

    fn level_pause(self) -> Option<Duration> {
        match self {
            Profile::Standard => None,
            Profile::Constrained => Some(Duration::from_millis(50)),
        }
    }

    fn vectorize_pacing(self) -> Option<Pacing> {
        match self {
            Profile::Standard => None,
            Profile::Constrained => Some(Pacing {
                every: 500,
                delay: Duration::from_millis(50),
            }),
        }
    }

    fn sampling_pacing(self) -> Option<Pacing> {
        match self {
            Profile::Standard => None,
            Profile::Constrained => Some(Pacing {
                every: 500,
                delay: Duration::from_millis(25),
            }),
        }
    }
}

/// Which clustering engine runs at each level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterEngine {
    /// Direct Lloyd's iterations, capped at [`ADVANCED_ITERATIONS`].
    #[default]
    Advanced,
    /// The scheduled engine, driven unit by unit with host pauses between.
    Scheduled,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineConfig {
    pub iterations: usize,
    pub profile: Profile,
    pub engine: ClusterEngine,
    pub selection: SelectionConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            iterations: 10,
            profile: Profile::default(),
            engine: ClusterEngine::default(),
            selection: SelectionConfig::default(),
        }
    }
}

// ------------------------------------------------------------
// Progress reporting
// ------------------------------------------------------------

/// Intermediate centroid shown while the pipeline is still refining.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PreviewColor {
    pub color: String,
    pub x: f64,
    pub y: f64,
    pub phase: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Progress {
    pub percent: u8,
    pub status: String,
    pub preview: Option<Vec<PreviewColor>>,
}

/// The host side of a pipeline run.
pub trait Observer {
    fn on_progress(&mut self, progress: Progress);

    /// Hand control back to the host for roughly `delay`.
    fn pause(&mut self, _delay: Duration) {}

    fn is_cancelled(&self) -> bool {
        false
    }
}

/// Observer that ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct Silent;

impl Observer for Silent {
    fn on_progress(&mut self, _progress: Progress) {}
}

/// Wraps an observer so reported percentages never go backwards.
struct Reporter<'a> {
    observer: &'a mut dyn Observer,
    last: u8,
}

impl<'a> Reporter<'a> {
    fn new(observer: &'a mut dyn Observer) -> Self {
        Self { observer, last: 0 }
    }

    fn report(&mut self, percent: u8, status: impl Into<String>, preview: Option<Vec<PreviewColor>>) {
        let percent = percent.clamp(self.last, 100);
        self.last = percent;
        self.observer.on_progress(Progress {
            percent,
            status: status.into(),
            preview,
        });
    }

    fn pause(&mut self, delay: Duration) {
        self.observer.pause(delay);
    }

    fn cancelled(&self) -> bool {
        self.observer.is_cancelled()
    }
}

fn share(done: usize, total: usize, span: f64) -> u8 {
    if total == 0 {
        return 0;
    }
    (done as f64 / total as f64 * span).round() as u8
}

// ------------------------------------------------------------
// Image preparation
// ------------------------------------------------------------

/// Average every `block_size` x `block_size` block into one pixel.
///
/// Edge blocks average only the pixels that exist, so the output is
/// `ceil(w / b) x ceil(h / b)`.
pub fn downsample(image: &RgbaImage, block_size: u32) -> RgbaImage {
    let block = block_size.max(1);
    if block == 1 {
        return image.clone();
    }
    let (width, height) = image.dimensions();
    RgbaImage::from_fn(width.div_ceil(block), height.div_ceil(block), |dx, dy| {
        let (sx, sy) = (dx * block, dy * block);
        let mut sum = [0u64; 4];
        let mut count = 0u64;
        for y in sy..(sy + block).min(height) {
            for x in sx..(sx + block).min(width) {
                let pixel = image.get_pixel(x, y);
                for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                    *acc += channel as u64;
                }
                count += 1;
            }
        }
        Rgba(sum.map(|s| (s as f64 / count as f64).round().clamp(0.0, 255.0) as u8))
    })
}

fn vectorize(image: &RgbaImage, pacing: Option<Pacing>, reporter: &mut Reporter<'_>) -> Vec<ColorVector> {
    let mut colors = Vec::with_capacity(image.pixels().len());
    for (i, pixel) in image.pixels().enumerate() {
        let [r, g, b, _] = pixel.0;
        colors.push(ColorVector::from_rgb(r, g, b));
        if let Some(pacing) = pacing {
            if i % pacing.every == 0 {
                reporter.pause(pacing.delay);
            }
        }
    }
    colors
}

/// Every pixel of `image` as a [`PixelSample`], row-major.
pub fn sample_pixels(image: &RgbaImage) -> Vec<PixelSample> {
    image
        .enumerate_pixels()
        .map(|(x, y, pixel)| pixel_sample(x, y, pixel))
        .collect()
}

fn pixel_sample(x: u32, y: u32, pixel: &Rgba<u8>) -> PixelSample {
    let [r, g, b, _] = pixel.0;
    PixelSample {
        x,
        y,
        color: ColorVector::from_rgb(r, g, b),
        hex: rgb_to_hex(r, g, b),
    }
}

fn sample_pixels_paced(image: &RgbaImage, pacing: Pacing, reporter: &mut Reporter<'_>) -> Vec<PixelSample> {
    let total = image.pixels().len();
    let mut samples = Vec::with_capacity(total);
    for (i, (x, y, pixel)) in image.enumerate_pixels().enumerate() {
        samples.push(pixel_sample(x, y, pixel));
        if i % pacing.every == 0 {
            reporter.pause(pacing.delay);
            reporter.report(
                85 + share(i, total, 10.0),
                format!("Processing pixels {}%", share(i, total, 100.0)),
                None,
            );
        }
    }
    samples
}

// ------------------------------------------------------------
// Convergence
// ------------------------------------------------------------

/// Mean movement between two centroid sets paired by index.
///
/// Sets of different length never converge and score infinity.
pub fn convergence_score(previous: &[Centroid], current: &[Centroid]) -> f64 {
    if previous.is_empty() || previous.len() != current.len() {
        return f64::INFINITY;
    }
    let total: f64 = previous
        .iter()
        .zip(current)
        .map(|(a, b)| convergence_distance(&a.location, &b.location))
        .sum();
    total / previous.len() as f64
}

// ------------------------------------------------------------
// Pipeline
// ------------------------------------------------------------

fn cluster_level(
    colors: &[ColorVector],
    level: &ResolutionLevel,
    config: &PipelineConfig,
    reporter: &mut Reporter<'_>,
) -> Result<Vec<Centroid>, ClusterError> {
    let k = config.selection.palette_size;
    match config.engine {
        ClusterEngine::Advanced => {
            advanced_centroids(colors, k, level.max_iterations.min(ADVANCED_ITERATIONS))
        }
        ClusterEngine::Scheduled => {
            let mut seq = kmeans(colors.to_vec(), KmeansConfig::new(k, level.max_iterations))?;
            let clustering = seq.drive(|| {
                reporter.pause(Duration::ZERO);
                if reporter.cancelled() {
                    ControlFlow::Break(())
                } else {
                    ControlFlow::Continue(())
                }
            })?;
            Ok(clustering.centroids)
        }
    }
}

fn preview(centroids: &[Centroid], width: u32, height: u32, phase: &str) -> Vec<PreviewColor> {
    let k = centroids.len() as f64;
    centroids
        .iter()
        .enumerate()
        .map(|(i, centroid)| {
            let t = (i as f64 + 0.5) / k;
            PreviewColor {
                color: centroid.location.to_hex(),
                x: t * width as f64,
                y: t * height as f64,
                phase: phase.to_string(),
            }
        })
        .collect()
}

fn validate(image: &RgbaImage, config: &PipelineConfig) -> Result<(), PipelineError> {
    if image.width() == 0 || image.height() == 0 {
        return Err(PipelineError::InvalidConfiguration("image is empty".into()));
    }
    if config.selection.palette_size == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "palette size must be positive".into(),
        ));
    }
    if config.iterations == 0 {
        return Err(PipelineError::InvalidConfiguration(
            "iteration count must be positive".into(),
        ));
    }
    Ok(())
}

/// Run the whole pipeline over `image` and return the final palette.
///
/// `observer` receives progress in non-decreasing order and is asked to
/// pause at the profile's yield points. A level whose clustering fails is
/// logged and skipped; only when no level produces centroids does the run
/// fail with [`PipelineError::NoCentroidsProduced`].
pub fn extract_palette(
    image: &RgbaImage,
    config: &PipelineConfig,
    observer: &mut dyn Observer,
) -> Result<Vec<PaletteEntry>, PipelineError> {
    validate(image, config)?;
    let (width, height) = image.dimensions();
    let profile = config.profile;
    let mut reporter = Reporter::new(observer);

    info!(
        width,
        height,
        palette_size = config.selection.palette_size,
        iterations = config.iterations,
        ?profile,
        engine = ?config.engine,
        "starting progressive clustering"
    );
    reporter.report(0, "Starting progressive clustering...", None);

    let levels = profile.levels(config.iterations);
    let threshold = profile.convergence_threshold();
    let mut current: Option<Vec<Centroid>> = None;

    for (i, level) in levels.iter().enumerate() {
        if reporter.cancelled() {
            return Err(PipelineError::Cancelled);
        }
        reporter.report(
            share(i, levels.len(), LEVELS_PROGRESS),
            format!("Processing {} resolution...", level.label),
            None,
        );
        if let Some(delay) = profile.level_pause() {
            reporter.pause(delay);
        }

        let reduced = downsample(image, level.block_size);
        let (reduced_w, reduced_h) = reduced.dimensions();
        let colors = vectorize(&reduced, profile.vectorize_pacing(), &mut reporter);
        drop(reduced);
        debug!(level = %level.label, pixels = colors.len(), "downsampled");
        reporter.report(
            share(i, levels.len(), LEVELS_PROGRESS),
            format!("Clustering {} ({reduced_w}x{reduced_h} pixels)...", level.label),
            None,
        );

        let centroids = match cluster_level(&colors, level, config, &mut reporter) {
            Ok(centroids) => centroids,
            Err(ClusterError::Sequence(SequenceError::Cancelled(_))) => {
                return Err(PipelineError::Cancelled);
            }
            Err(source) => {
                let err = PipelineError::ClusteringLevelFailed {
                    level: level.label.clone(),
                    source,
                };
                warn!(%err, "skipping resolution level");
                reporter.report(
                    share(i + 1, levels.len(), LEVELS_PROGRESS),
                    format!("Skipped {}", level.label),
                    None,
                );
                continue;
            }
        };

        let converged = match &current {
            Some(previous) => {
                let score = convergence_score(previous, &centroids);
                debug!(level = %level.label, score, threshold, "convergence");
                score < threshold
            }
            None => false,
        };

        reporter.report(
            share(i + 1, levels.len(), LEVELS_PROGRESS),
            format!("Completed {} ({reduced_w}x{reduced_h} pixels)", level.label),
            Some(preview(&centroids, width, height, &level.label)),
        );
        current = Some(centroids);

        if converged {
            info!(level = %level.label, "centroids converged, stopping early");
            break;
        }
    }

    let Some(centroids) = current else {
        warn!("no resolution level produced centroids");
        return Err(PipelineError::NoCentroidsProduced);
    };

    reporter.report(85, "Generating final color data...", None);
    let samples = match profile.sampling_pacing() {
        Some(pacing) => sample_pixels_paced(image, pacing, &mut reporter),
        None => sample_pixels(image),
    };

    reporter.report(95, "Finalizing clustering results...", None);
    if let Some(delay) = profile.level_pause() {
        reporter.pause(delay);
    }
    let palette = select_palette(&centroids, &samples, width, height, &config.selection);

    info!(colors = palette.len(), "palette ready");
    reporter.report(
        100,
        format!("Clustering complete! Found {} colors", palette.len()),
        None,
    );
    Ok(palette)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Recorder {
        progress: Vec<Progress>,
        pauses: usize,
        cancel_after: Option<usize>,
    }

    impl Observer for Recorder {
        fn on_progress(&mut self, progress: Progress) {
            self.progress.push(progress);
        }

        fn pause(&mut self, _delay: Duration) {
            self.pauses += 1;
        }

        fn is_cancelled(&self) -> bool {
            self.cancel_after.is_some_and(|n| self.progress.len() >= n)
        }
    }

    fn solid(width: u32, height: u32, rgb: [u8; 3]) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([rgb[0], rgb[1], rgb[2], 255]))
    }

    fn centroid(h: f64, s: f64, v: f64, label: usize) -> Centroid {
        Centroid {
            location: ColorVector::new(h, s, v),
            label,
        }
    }

    #[test]
    fn levels_are_coarsest_first() {
        let standard = Profile::Standard.levels(10);
        let sizes: Vec<u32> = standard.iter().map(|l| l.block_size).collect();
        assert_eq!(sizes, vec![8, 6, 4, 2, 1]);
        assert_eq!(standard[0].label, "8x8 quads");
        assert_eq!(standard[4].label, "1x1 pixels");

        let constrained = Profile::Constrained.levels(10);
        assert_eq!(constrained.len(), 3);
        assert!(constrained.iter().all(|l| l.max_iterations == 5));
        assert_eq!(Profile::Constrained.levels(1)[0].max_iterations, 2);
    }

    #[test]
    fn downsample_averages_blocks_and_keeps_edges() {
        let mut image = solid(3, 2, [0, 0, 0]);
        image.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        image.put_pixel(2, 0, Rgba([10, 20, 30, 255]));
        let reduced = downsample(&image, 2);
        assert_eq!(reduced.dimensions(), (2, 1));
        // (255 + 0 + 0 + 0) / 4 = 63.75
        assert_eq!(reduced.get_pixel(0, 0).0, [64, 64, 64, 255]);
        // edge block holds only two pixels
        assert_eq!(reduced.get_pixel(1, 0).0, [5, 10, 15, 255]);

        assert_eq!(downsample(&image, 1), image);
    }

    #[test]
    fn convergence_of_identical_and_opposite_sets() {
        let a = vec![centroid(0.0, 0.0, 0.0, 0), centroid(90.0, 0.5, 0.5, 1)];
        assert_eq!(convergence_score(&a, &a.clone()), 0.0);

        let far = vec![centroid(0.0, 0.0, 0.0, 0)];
        let other = vec![centroid(180.0, 1.0, 1.0, 0)];
        assert!((convergence_score(&far, &other) - 1.5).abs() < 1e-12);

        assert_eq!(convergence_score(&a, &far), f64::INFINITY);
    }

    #[test]
    fn uniform_image_converges_early_with_monotone_progress() {
        let image = solid(10, 10, [255, 0, 0]);
        let config = PipelineConfig {
            selection: SelectionConfig {
                palette_size: 5,
                ..SelectionConfig::default()
            },
            ..PipelineConfig::default()
        };
        let mut recorder = Recorder::default();
        let palette = extract_palette(&image, &config, &mut recorder).unwrap();

        assert_eq!(palette.len(), 1);
        assert_eq!(palette[0].hex, "#ff0000");
        assert_eq!((palette[0].x, palette[0].y), (5, 5));

        let percents: Vec<u8> = recorder.progress.iter().map(|p| p.percent).collect();
        assert!(percents.windows(2).all(|w| w[0] <= w[1]), "{percents:?}");
        assert_eq!(percents.first(), Some(&0));
        assert_eq!(percents.last(), Some(&100));

        // 8x8 then 6x6, which agrees with it, so 4x4 and finer never run
        let previews: Vec<&str> = recorder
            .progress
            .iter()
            .filter_map(|p| p.preview.as_ref())
            .map(|p| p[0].phase.as_str())
            .collect();
        assert_eq!(previews, vec!["8x8 quads", "6x6 quads"]);
        assert_eq!(recorder.pauses, 0);
    }

    #[test]
    fn constrained_profile_pauses() {
        let image = solid(4, 4, [0, 128, 255]);
        let config = PipelineConfig {
            profile: Profile::Constrained,
            selection: SelectionConfig {
                palette_size: 2,
                ..SelectionConfig::default()
            },
            ..PipelineConfig::default()
        };
        let mut recorder = Recorder::default();
        let palette = extract_palette(&image, &config, &mut recorder).unwrap();
        assert_eq!(palette.len(), 1);
        assert!(recorder.pauses > 0);
    }

    #[test]
    fn scheduled_engine_matches_on_simple_input() {
        let image = solid(6, 6, [0, 200, 0]);
        let config = PipelineConfig {
            engine: ClusterEngine::Scheduled,
            selection: SelectionConfig {
                palette_size: 3,
                ..SelectionConfig::default()
            },
            ..PipelineConfig::default()
        };
        let mut recorder = Recorder::default();
        let palette = extract_palette(&image, &config, &mut recorder).unwrap();
        assert_eq!(palette.len(), 1);
        assert_eq!(palette[0].hex, "#00c800");
        assert!(recorder.pauses > 0);
    }

    #[test]
    fn cancellation_stops_the_run() {
        let image = solid(10, 10, [255, 0, 0]);
        let mut recorder = Recorder {
            cancel_after: Some(1),
            ..Recorder::default()
        };
        let result = extract_palette(&image, &PipelineConfig::default(), &mut recorder);
        assert_eq!(result, Err(PipelineError::Cancelled));
    }

    #[test]
    fn every_level_failing_ends_without_centroids() {
        // a cluster count above MAX_COMPLEXITY cannot be scheduled at any level
        let image = solid(4, 4, [255, 0, 0]);
        let config = PipelineConfig {
            engine: ClusterEngine::Scheduled,
            selection: SelectionConfig {
                palette_size: 40_000,
                ..SelectionConfig::default()
            },
            ..PipelineConfig::default()
        };
        let mut recorder = Recorder::default();
        let result = extract_palette(&image, &config, &mut recorder);
        assert_eq!(result, Err(PipelineError::NoCentroidsProduced));

        let skipped: Vec<&str> = recorder
            .progress
            .iter()
            .filter_map(|p| p.status.strip_prefix("Skipped "))
            .collect();
        assert_eq!(
            skipped,
            vec!["8x8 quads", "6x6 quads", "4x4 quads", "2x2 quads", "1x1 pixels"]
        );
        assert!(recorder.progress.iter().all(|p| p.preview.is_none()));
        assert_eq!(recorder.progress.last().map(|p| p.percent), Some(80));
    }

    #[test]
    fn each_level_reports_its_downsampled_size() {
        let image = solid(10, 10, [255, 0, 0]);
        let mut recorder = Recorder::default();
        extract_palette(&image, &PipelineConfig::default(), &mut recorder).unwrap();
        let statuses: Vec<&str> = recorder.progress.iter().map(|p| p.status.as_str()).collect();
        assert_eq!(
            &statuses[..4],
            &[
                "Starting progressive clustering...",
                "Processing 8x8 quads resolution...",
                "Clustering 8x8 quads (2x2 pixels)...",
                "Completed 8x8 quads (2x2 pixels)",
            ]
        );
    }

    #[test]
    fn rejects_empty_input() {
        let config = PipelineConfig::default();
        let empty = RgbaImage::new(0, 0);
        assert!(matches!(
            extract_palette(&empty, &config, &mut Silent),
            Err(PipelineError::InvalidConfiguration(_))
        ));

        let zero = PipelineConfig {
            selection: SelectionConfig {
                palette_size: 0,
                ..SelectionConfig::default()
            },
            ..PipelineConfig::default()
        };
        assert!(matches!(
            extract_palette(&solid(2, 2, [1, 2, 3]), &zero, &mut Silent),
            Err(PipelineError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn full_resolution_samples_cover_every_pixel() {
        let image = solid(3, 2, [0, 0, 255]);
        let samples = sample_pixels(&image);
        assert_eq!(samples.len(), 6);
        assert_eq!((samples[4].x, samples[4].y), (1, 1));
        assert_eq!(samples[4].hex, "#0000ff");
    }
}
