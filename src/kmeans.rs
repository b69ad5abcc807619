//! Lloyd's k-means over HSV color vectors.
//!
//! [`kmeans`] builds a [`Sequence`] whose units each stay under
//! [`MAX_COMPLEXITY`]: point ingestion and every assignment pass are split
//! into chunks, and the centroid update is folded into the last chunk of each
//! pass. [`advanced_centroids`] is the small, direct variant the progressive
//! pipeline runs once per resolution level.

use crate::color::{ColorVector, hsv_distance};
use crate::error::ClusterError;
use crate::sequence::{CostData, MAX_COMPLEXITY, Sequence};

/// Iteration cap of [`advanced_centroids`] inside the progressive pipeline.
pub const ADVANCED_ITERATIONS: usize = 3;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Centroid {
    pub location: ColorVector,
    pub label: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point {
    pub location: ColorVector,
    pub label: usize,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KmeansConfig {
    /// Cluster count; `None` picks `round(sqrt(n / 2))`.
    pub k: Option<usize>,
    pub iterations: usize,
}

impl KmeansConfig {
    pub fn new(k: usize, iterations: usize) -> Self {
        Self {
            k: Some(k),
            iterations,
        }
    }
}

/// Points with their final labels, and the centroids they were assigned to.
#[derive(Clone, Debug, PartialEq)]
pub struct Clustering {
    pub points: Vec<Point>,
    pub centroids: Vec<Centroid>,
}

/// One centroid and the locations of the points labelled with it.
#[derive(Clone, Debug, PartialEq)]
pub struct Cluster {
    pub centroid: ColorVector,
    pub points: Vec<ColorVector>,
}

impl Clustering {
    pub fn clusters(&self) -> Vec<Cluster> {
        self.centroids
            .iter()
            .map(|centroid| Cluster {
                centroid: centroid.location,
                points: self
                    .points
                    .iter()
                    .filter(|p| p.label == centroid.label)
                    .map(|p| p.location)
                    .collect(),
            })
            .collect()
    }
}

fn default_k(len: usize) -> usize {
    ((len as f64 / 2.0).sqrt().round() as usize).max(1)
}

fn validate(len: usize, k: usize, iterations: usize) -> Result<(), ClusterError> {
    if len == 0 {
        return Err(ClusterError::InvalidConfiguration(
            "cannot cluster an empty point set".into(),
        ));
    }
    if k == 0 {
        return Err(ClusterError::InvalidConfiguration(
            "cluster count must be positive".into(),
        ));
    }
    if iterations == 0 {
        return Err(ClusterError::InvalidConfiguration(
            "iteration count must be positive".into(),
        ));
    }
    Ok(())
}

fn squared_distance(a: &ColorVector, b: &ColorVector) -> f64 {
    a.components()
        .iter()
        .zip(b.components())
        .map(|(x, y)| (x - y).powi(2))
        .sum()
}

/// Index of the nearest centroid; ties go to the lowest index.
fn nearest(point: &ColorVector, centroids: &[Centroid], metric: fn(&ColorVector, &ColorVector) -> f64) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = metric(point, &centroid.location);
        if d < best_distance {
            best_distance = d;
            best = i;
        }
    }
    best
}

/// Running per-cluster sums for one assignment pass.
#[derive(Clone, Debug)]
struct Accumulator {
    sums: Vec<[f64; 3]>,
    counts: Vec<usize>,
}

impl Accumulator {
    fn new(k: usize) -> Self {
        Self {
            sums: vec![[0.0; 3]; k],
            counts: vec![0; k],
        }
    }

    fn reset(&mut self) {
        self.sums.iter_mut().for_each(|s| *s = [0.0; 3]);
        self.counts.iter_mut().for_each(|c| *c = 0);
    }

    fn add(&mut self, label: usize, location: &ColorVector) {
        for (acc, v) in self.sums[label].iter_mut().zip(location.components()) {
            *acc += v;
        }
        self.counts[label] += 1;
    }

    /// Move every centroid that received points to their mean. Empty
    /// clusters keep their location.
    fn update(&self, centroids: &mut [Centroid]) {
        for (i, centroid) in centroids.iter_mut().enumerate() {
            let count = self.counts[i];
            if count == 0 {
                continue;
            }
            let n = count as f64;
            let [h, s, v] = self.sums[i];
            centroid.location = ColorVector::new(h / n, s / n, v / n);
        }
    }
}

// ------------------------------------------------------------
// Scheduled engine
// ------------------------------------------------------------

/// Working state shared by the units of a [`kmeans`] sequence.
pub struct KmeansState {
    data: Vec<ColorVector>,
    points: Vec<Point>,
    centroids: Vec<Centroid>,
    acc: Accumulator,
}

impl KmeansState {
    pub fn centroids(&self) -> &[Centroid] {
        &self.centroids
    }
}

pub type KmeansSequence = Sequence<KmeansState, Clustering>;

/// Schedule a k-means run over `data`.
///
/// Configuration is validated before any unit is queued. The returned
/// sequence resolves to a [`Clustering`] once driven to completion. Each
/// assignment unit costs `chunk * k` operations; a `k` so large that a single
/// point exceeds [`MAX_COMPLEXITY`] is refused with
/// [`SequenceError::ComplexityExceeded`](crate::error::SequenceError::ComplexityExceeded).
pub fn kmeans(data: Vec<ColorVector>, config: KmeansConfig) -> Result<KmeansSequence, ClusterError> {
    let len = data.len();
    let k = config.k.unwrap_or_else(|| default_k(len));
    let iterations = config.iterations;
    validate(len, k, iterations)?;

    let ingest_chunk = MAX_COMPLEXITY as usize;
    let ingest_chunks = len.div_ceil(ingest_chunk);
    let assign_chunk = (MAX_COMPLEXITY as usize / k).max(1);
    let assign_chunks = len.div_ceil(assign_chunk);

    let state = KmeansState {
        data,
        points: Vec::with_capacity(len),
        centroids: Vec::with_capacity(k),
        acc: Accumulator::new(k),
    };
    let mut seq = Sequence::new("kmeans", state);

    seq.iterate(
        0,
        move |chunk| chunk < ingest_chunks,
        |chunk| chunk + 1,
        move |state: &mut KmeansState, chunk| {
            let start = chunk * ingest_chunk;
            let end = (start + ingest_chunk).min(state.data.len());
            let fresh = state.data[start..end].iter().map(|&location| Point { location, label: 0 });
            state.points.extend(fresh);
            Ok(())
        },
        CostData::Length(ingest_chunk.min(len)),
        1,
    )?;

    // seed deterministically: points[i % n] for i in 0..k
    seq.append(
        move |seq: &mut KmeansSequence| {
            let state = seq.state_mut();
            let n = state.points.len();
            state.centroids = (0..k)
                .map(|i| Centroid {
                    location: state.points[i % n].location,
                    label: i,
                })
                .collect();
            Ok(())
        },
        CostData::Number(k as f64),
        1,
    )?;

    seq.iterate(
        0,
        move |step| step < iterations * assign_chunks,
        |step| step + 1,
        move |state: &mut KmeansState, step| {
            let chunk = step % assign_chunks;
            if chunk == 0 {
                state.acc.reset();
            }
            let start = chunk * assign_chunk;
            let end = (start + assign_chunk).min(state.points.len());
            for point in &mut state.points[start..end] {
                point.label = nearest(&point.location, &state.centroids, squared_distance);
                state.acc.add(point.label, &point.location);
            }
            if chunk + 1 == assign_chunks {
                state.acc.update(&mut state.centroids);
            }
            Ok(())
        },
        CostData::Number((assign_chunk.min(len) * k) as f64),
        1,
    )?;

    seq.append(
        |seq: &mut KmeansSequence| {
            let state = seq.state_mut();
            let clustering = Clustering {
                points: std::mem::take(&mut state.points),
                centroids: std::mem::take(&mut state.centroids),
            };
            seq.resolve(clustering);
            Ok(())
        },
        CostData::Number(0.0),
        0,
    )?;

    Ok(seq)
}

/// Schedule and drive a k-means run to completion without yielding.
pub fn kmeans_blocking(data: Vec<ColorVector>, config: KmeansConfig) -> Result<Clustering, ClusterError> {
    let mut seq = kmeans(data, config)?;
    seq.drive(|| std::ops::ControlFlow::Continue(()))
        .map_err(ClusterError::from)
}

// ------------------------------------------------------------
// Fast variant
// ------------------------------------------------------------

/// Direct Lloyd's iterations without scheduling.
///
/// Seeds are taken with a stride of `max(1, n / k)`; when that yields fewer
/// than `k` seeds the rest wrap around the point list, so the result always
/// holds exactly `k` centroids labelled `0..k`. Assignment uses
/// [`hsv_distance`] so hue wraps around the circle.
pub fn advanced_centroids(
    data: &[ColorVector],
    k: usize,
    iterations: usize,
) -> Result<Vec<Centroid>, ClusterError> {
    validate(data.len(), k, iterations)?;

    let n = data.len();
    let step = (n / k).max(1);
    let mut centroids: Vec<Centroid> = (0..k)
        .map(|i| {
            let index = if i * step < n { i * step } else { i % n };
            Centroid {
                location: data[index],
                label: i,
            }
        })
        .collect();

    let mut acc = Accumulator::new(k);
    for _ in 0..iterations {
        acc.reset();
        for point in data {
            let label = nearest(point, &centroids, hsv_distance);
            acc.add(label, point);
        }
        acc.update(&mut centroids);
    }

    Ok(centroids)
}
