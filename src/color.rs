//! Accent colors sampled from cover artwork.
//!
//! Every function here is pure: the same bitmap always yields the same
//! colors. Medians are taken per channel, so the result may be a color that
//! never appears in the image.

use std::fmt;

use image::RgbaImage;

/// Grid resolution for [`median_color`]: at most this many samples per axis.
const MEDIAN_GRID: u32 = 100;
/// Points sampled along each edge band.
const EDGE_GRID: u32 = 10;
/// Edge band thickness as a fraction (1 / n) of the shorter side.
const EDGE_BAND_DIVISOR: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    /// Neutral dark gray used whenever there is nothing to sample.
    pub const NEUTRAL: Rgb = Rgb::new(32, 32, 32);

    pub const fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }
}

impl Default for Rgb {
    fn default() -> Self {
        Rgb::NEUTRAL
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EdgeColors {
    pub top: Rgb,
    pub right: Rgb,
    pub bottom: Rgb,
    pub left: Rgb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AccentColors {
    pub median: Rgb,
    pub top: Rgb,
    pub right: Rgb,
    pub bottom: Rgb,
    pub left: Rgb,
}

impl AccentColors {
    pub fn from_image(image: &RgbaImage) -> Self {
        let EdgeColors {
            top,
            right,
            bottom,
            left,
        } = edge_colors(image);
        Self {
            median: median_color(image),
            top,
            right,
            bottom,
            left,
        }
    }

    /// Accents for an optional cover; no cover means all neutral.
    pub fn for_cover(cover: Option<&RgbaImage>) -> Self {
        cover.map(Self::from_image).unwrap_or_default()
    }
}

/// Per-channel samples collected from a sampling grid.
#[derive(Default)]
struct ChannelSamples {
    r: Vec<u8>,
    g: Vec<u8>,
    b: Vec<u8>,
}

impl ChannelSamples {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            r: Vec::with_capacity(capacity),
            g: Vec::with_capacity(capacity),
            b: Vec::with_capacity(capacity),
        }
    }

    fn push(&mut self, pixel: &image::Rgba<u8>) {
        let [r, g, b, _] = pixel.0;
        self.r.push(r);
        self.g.push(g);
        self.b.push(b);
    }

    fn median(mut self) -> Option<Rgb> {
        if self.r.is_empty() {
            return None;
        }
        Some(Rgb::new(
            middle(&mut self.r),
            middle(&mut self.g),
            middle(&mut self.b),
        ))
    }
}

fn middle(values: &mut [u8]) -> u8 {
    values.sort_unstable();
    values[values.len() / 2]
}

/// Channel-independent median over a grid of at most 100x100 points.
pub fn median_color(image: &RgbaImage) -> Rgb {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Rgb::NEUTRAL;
    }

    let stride = (width.max(height) / MEDIAN_GRID).max(1);
    let per_axis = (MEDIAN_GRID + 1) as usize;
    let mut samples = ChannelSamples::with_capacity(per_axis * per_axis);

    for y in (0..height).step_by(stride as usize) {
        for x in (0..width).step_by(stride as usize) {
            samples.push(image.get_pixel(x, y));
        }
    }

    samples.median().unwrap_or(Rgb::NEUTRAL)
}

/// Medians of the four edge bands. A side with no samples falls back to
/// [`Rgb::NEUTRAL`] on its own.
pub fn edge_colors(image: &RgbaImage) -> EdgeColors {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return EdgeColors::default();
    }

    let band = (width.min(height) / EDGE_BAND_DIVISOR).max(1);
    let w = i64::from(width);
    let h = i64::from(height);
    let b = i64::from(band);

    EdgeColors {
        top: band_median(image, Region::new(0, 0, w, b)),
        right: band_median(image, Region::new(w - b, 0, w, h)),
        bottom: band_median(image, Region::new(0, h - b, w, h)),
        left: band_median(image, Region::new(0, 0, b, h)),
    }
}

/// Half-open rectangle in image coordinates. May extend past the bitmap.
#[derive(Debug, Clone, Copy)]
struct Region {
    x0: i64,
    y0: i64,
    x1: i64,
    y1: i64,
}

impl Region {
    fn new(x0: i64, y0: i64, x1: i64, y1: i64) -> Self {
        Self { x0, y0, x1, y1 }
    }

    fn step_x(&self) -> usize {
        ((self.x1 - self.x0) / i64::from(EDGE_GRID)).max(1) as usize
    }

    fn step_y(&self) -> usize {
        ((self.y1 - self.y0) / i64::from(EDGE_GRID)).max(1) as usize
    }
}

fn band_median(image: &RgbaImage, region: Region) -> Rgb {
    let mut samples = ChannelSamples::default();

    for y in (region.y0..region.y1).step_by(region.step_y()) {
        for x in (region.x0..region.x1).step_by(region.step_x()) {
            // Out-of-range points are skipped rather than clamped.
            let (Ok(px), Ok(py)) = (u32::try_from(x), u32::try_from(y)) else {
                continue;
            };
            if let Some(pixel) = image.get_pixel_checked(px, py) {
                samples.push(pixel);
            }
        }
    }

    samples.median().unwrap_or(Rgb::NEUTRAL)
}
