use std::fmt;
use std::str::FromStr;

use palette::{FromColor, encoding};
use serde::{Deserialize, Serialize};

type Hsv64 = palette::Hsv<encoding::Srgb, f64>;
type Hsl64 = palette::Hsl<encoding::Srgb, f64>;
type Srgb64 = palette::Srgb<f64>;

// ------------------------------------------------------------
// HSV color vectors
// ------------------------------------------------------------

/// A color in hue/saturation/value space.
///
/// Hue is kept in degrees `[0, 360)`, saturation and value in `[0, 1]`.
/// The hue is wrapped on construction so every distance function can assume
/// it is in range.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ColorVector {
    hue: f64,
    saturation: f64,
    value: f64,
}

impl ColorVector {
    pub fn new(hue: f64, saturation: f64, value: f64) -> Self {
        Self {
            hue: wrap_hue(hue),
            saturation,
            value,
        }
    }

    pub fn from_components([h, s, v]: [f64; 3]) -> Self {
        Self::new(h, s, v)
    }

    /// Convert an 8-bit sRGB triple to HSV.
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let rgb: Srgb64 = palette::Srgb::<u8>::new(r, g, b).into_format();
        let hsv = Hsv64::from_color(rgb);
        Self::new(
            hsv.hue.into_positive_degrees(),
            hsv.saturation,
            hsv.value,
        )
    }

    pub fn hue(&self) -> f64 {
        self.hue
    }

    pub fn saturation(&self) -> f64 {
        self.saturation
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn components(&self) -> [f64; 3] {
        [self.hue, self.saturation, self.value]
    }

    pub fn to_rgb(&self) -> [u8; 3] {
        let hsv = Hsv64::new(self.hue, self.saturation, self.value);
        let rgb = Srgb64::from_color(hsv).into_format::<u8>();
        [rgb.red, rgb.green, rgb.blue]
    }

    /// Lower-case `#rrggbb`.
    pub fn to_hex(&self) -> String {
        let [r, g, b] = self.to_rgb();
        rgb_to_hex(r, g, b)
    }

    /// Hue (degrees), saturation and lightness of the same color.
    pub fn to_hsl(&self) -> [f64; 3] {
        let hsv = Hsv64::new(self.hue, self.saturation, self.value);
        let hsl = Hsl64::from_color(hsv);
        [
            wrap_hue(hsl.hue.into_positive_degrees()),
            hsl.saturation,
            hsl.lightness,
        ]
    }

    /// Component-wise mean. Hue is averaged linearly, the way the cluster
    /// update does it, then re-wrapped.
    pub fn mean<'a>(colors: impl IntoIterator<Item = &'a ColorVector>) -> Option<ColorVector> {
        let mut sum = [0.0; 3];
        let mut count = 0usize;
        for c in colors {
            for (acc, v) in sum.iter_mut().zip(c.components()) {
                *acc += v;
            }
            count += 1;
        }
        if count == 0 {
            return None;
        }
        let n = count as f64;
        Some(Self::new(sum[0] / n, sum[1] / n, sum[2] / n))
    }
}

impl fmt::Display for ColorVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "HSV({:.1}, {:.1}%, {:.1}%)",
            self.hue,
            self.saturation * 100.0,
            self.value * 100.0
        )
    }
}

pub fn rgb_to_hex(r: u8, g: u8, b: u8) -> String {
    format!("#{r:02x}{g:02x}{b:02x}")
}

fn wrap_hue(hue: f64) -> f64 {
    let wrapped = hue.rem_euclid(360.0);
    // rem_euclid can round up to exactly 360.0 for tiny negative inputs
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

// ------------------------------------------------------------
// Distances
// ------------------------------------------------------------

/// Shared shape of the HSV and HSL metrics: wrapped hue difference scaled by
/// 180, plain differences for the other two channels, Euclidean norm.
fn cylindrical_distance(a: [f64; 3], b: [f64; 3]) -> f64 {
    let mut h_diff = (a[0] - b[0]).abs();
    if h_diff > 180.0 {
        h_diff = 360.0 - h_diff;
    }
    let h = h_diff / 180.0;
    let s = (a[1] - b[1]).abs();
    let v = (a[2] - b[2]).abs();
    (h * h + s * s + v * v).sqrt()
}

pub fn hsv_distance(a: &ColorVector, b: &ColorVector) -> f64 {
    cylindrical_distance(a.components(), b.components())
}

pub fn hsl_distance(a: &ColorVector, b: &ColorVector) -> f64 {
    cylindrical_distance(a.to_hsl(), b.to_hsl())
}

/// Distance used to decide whether two resolution levels agree.
///
/// Unlike [`hsv_distance`] the hue is not wrapped, only divided by 360.
pub fn convergence_distance(a: &ColorVector, b: &ColorVector) -> f64 {
    let h = (a.hue - b.hue).abs() / 360.0;
    let s = (a.saturation - b.saturation).abs();
    let v = (a.value - b.value).abs();
    (h * h + s * s + v * v).sqrt()
}

/// Perceptual metric used by palette selection and region search.
///
/// The `-max`/`-avg` suffixes are accepted for compatibility with existing
/// hosts; both map to the same metric.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DistanceMethod {
    #[default]
    HsvMax,
    HsvAvg,
    HslMax,
    HslAvg,
    MaxHsvHsl,
}

impl DistanceMethod {
    pub fn distance(self, a: &ColorVector, b: &ColorVector) -> f64 {
        match self {
            DistanceMethod::HsvMax | DistanceMethod::HsvAvg => hsv_distance(a, b),
            DistanceMethod::HslMax | DistanceMethod::HslAvg => hsl_distance(a, b),
            DistanceMethod::MaxHsvHsl => hsv_distance(a, b).max(hsl_distance(a, b)),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DistanceMethod::HsvMax => "hsv-max",
            DistanceMethod::HsvAvg => "hsv-avg",
            DistanceMethod::HslMax => "hsl-max",
            DistanceMethod::HslAvg => "hsl-avg",
            DistanceMethod::MaxHsvHsl => "max-hsv-hsl",
        }
    }
}

impl FromStr for DistanceMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hsv" | "hsv-max" => Ok(DistanceMethod::HsvMax),
            "hsv-avg" => Ok(DistanceMethod::HsvAvg),
            "hsl" | "hsl-max" => Ok(DistanceMethod::HslMax),
            "hsl-avg" => Ok(DistanceMethod::HslAvg),
            "max-hsv-hsl" => Ok(DistanceMethod::MaxHsvHsl),
            other => Err(format!("unknown distance method: {other}")),
        }
    }
}

impl fmt::Display for DistanceMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn hue_wraps_on_construction() {
        assert!(close(ColorVector::new(370.0, 0.5, 0.5).hue(), 10.0));
        assert!(close(ColorVector::new(-90.0, 0.5, 0.5).hue(), 270.0));
        assert!(close(ColorVector::new(360.0, 0.5, 0.5).hue(), 0.0));
    }

    #[test]
    fn hsv_distance_wraps_hue() {
        let across = hsv_distance(
            &ColorVector::new(359.0, 0.5, 0.5),
            &ColorVector::new(1.0, 0.5, 0.5),
        );
        let inside = hsv_distance(
            &ColorVector::new(0.0, 0.5, 0.5),
            &ColorVector::new(2.0, 0.5, 0.5),
        );
        assert!(close(across, inside));
        assert!(across < 0.02);
    }

    #[test]
    fn primaries_round_trip_through_hex() {
        assert_eq!(ColorVector::from_rgb(255, 0, 0).to_hex(), "#ff0000");
        assert_eq!(ColorVector::from_rgb(0, 0, 255).to_hex(), "#0000ff");
        assert_eq!(ColorVector::from_rgb(18, 95, 32).to_hex(), "#125f20");
        assert!(close(ColorVector::from_rgb(0, 0, 255).hue(), 240.0));
    }

    #[test]
    fn hsl_of_pure_red() {
        let [h, s, l] = ColorVector::from_rgb(255, 0, 0).to_hsl();
        assert!(close(h, 0.0));
        assert!(close(s, 1.0));
        assert!(close(l, 0.5));
    }

    #[test]
    fn max_method_is_never_below_either_metric() {
        let a = ColorVector::new(30.0, 0.9, 0.4);
        let b = ColorVector::new(50.0, 0.2, 0.8);
        let max = DistanceMethod::MaxHsvHsl.distance(&a, &b);
        assert!(max >= hsv_distance(&a, &b));
        assert!(max >= hsl_distance(&a, &b));
    }

    #[test]
    fn convergence_distance_extremes() {
        let a = ColorVector::new(0.0, 0.0, 0.0);
        assert!(close(convergence_distance(&a, &a), 0.0));
        let b = ColorVector::new(180.0, 1.0, 1.0);
        assert!(close(convergence_distance(&a, &b), 1.5));
    }

    #[test]
    fn distance_method_parses_wire_names() {
        for method in [
            DistanceMethod::HsvMax,
            DistanceMethod::HsvAvg,
            DistanceMethod::HslMax,
            DistanceMethod::HslAvg,
            DistanceMethod::MaxHsvHsl,
        ] {
            assert_eq!(method.as_str().parse::<DistanceMethod>(), Ok(method));
        }
        assert!("lab".parse::<DistanceMethod>().is_err());
    }

    #[test]
    fn mean_of_nothing_is_none() {
        assert_eq!(ColorVector::mean(&[]), None);
        let m = ColorVector::mean(&[
            ColorVector::new(0.0, 1.0, 1.0),
            ColorVector::new(240.0, 1.0, 0.0),
        ])
        .unwrap_or_default();
        assert!(close(m.hue(), 120.0));
        assert!(close(m.value(), 0.5));
    }
}
