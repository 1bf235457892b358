//! Finding a small image inside a screenshot.
//!
//! Scores are grayscale normalized cross-correlation, from -1 to 1. The
//! search runs on a downscaled copy first and only refines the best few
//! candidates at full resolution, which keeps a full-HD screen fast enough
//! to scan once a second.

use image::{imageops, imageops::FilterType, GrayImage};
use std::path::Path;

/// A coarse level is only used while the template stays at least this big.
const MIN_COARSE_SIDE: u32 = 8;
const MAX_LEVELS: u32 = 3;
const CANDIDATES: usize = 5;

/// Where a template matched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    /// Top-left corner.
    pub x: u32,
    /// Top edge of the match.
    pub y: u32,
    /// Template width.
    pub width: u32,
    /// Template height.
    pub height: u32,
    /// Correlation at this position.
    pub score: f32,
}

impl Match {
    /// Centre of the matched area.
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }
}

/// Load an image from disk as grayscale.
pub fn load_gray(path: &Path) -> Result<GrayImage, image::ImageError> {
    Ok(image::open(path)?.to_luma8())
}

/// Best match of `template` in `screen` scoring at least `confidence`.
pub fn find(screen: &GrayImage, template: &GrayImage, confidence: f32) -> Option<Match> {
    let best = best_match(screen, template)?;
    (best.score >= confidence).then_some(best)
}

/// Best match of `template` in `screen`, whatever its score. `None` if the
/// template does not fit or is empty.
pub fn best_match(screen: &GrayImage, template: &GrayImage) -> Option<Match> {
    let (tw, th) = template.dimensions();
    let (sw, sh) = screen.dimensions();
    if tw == 0 || th == 0 || tw > sw || th > sh {
        return None;
    }

    let mut level = 0;
    while level < MAX_LEVELS && tw.min(th) >> (level + 1) >= MIN_COARSE_SIDE {
        level += 1;
    }
    let full = Prepared::new(template);
    let integral = Integral::new(screen);

    if level == 0 {
        let positions = (0..=sh - th).flat_map(|y| (0..=sw - tw).map(move |x| (x, y)));
        return scan(screen, &integral, &full, positions)
            .into_iter()
            .next();
    }

    let factor = 1 << level;
    let small_screen = shrink(screen, factor);
    let small_template = shrink(template, factor);
    let (ssw, ssh) = small_screen.dimensions();
    let (stw, sth) = small_template.dimensions();
    if stw > ssw || sth > ssh {
        return None;
    }
    let coarse = Prepared::new(&small_template);
    let coarse_integral = Integral::new(&small_screen);
    let positions = (0..=ssh - sth).flat_map(|y| (0..=ssw - stw).map(move |x| (x, y)));
    let mut candidates = scan(&small_screen, &coarse_integral, &coarse, positions);
    candidates.truncate(CANDIDATES);

    // Each coarse pixel covers `factor` full pixels, plus one for rounding.
    let reach = factor + 1;
    let mut refined: Vec<Match> = candidates
        .iter()
        .filter_map(|c| {
            let cx = c.x * factor;
            let cy = c.y * factor;
            let x0 = cx.saturating_sub(reach);
            let y0 = cy.saturating_sub(reach);
            let x1 = (cx + reach).min(sw - tw);
            let y1 = (cy + reach).min(sh - th);
            let window = (y0..=y1).flat_map(move |y| (x0..=x1).map(move |x| (x, y)));
            scan(screen, &integral, &full, window).into_iter().next()
        })
        .collect();
    refined.sort_by(|a, b| b.score.total_cmp(&a.score));
    refined.into_iter().next()
}

fn shrink(image: &GrayImage, factor: u32) -> GrayImage {
    let (w, h) = image.dimensions();
    imageops::resize(
        image,
        (w / factor).max(1),
        (h / factor).max(1),
        FilterType::Triangle,
    )
}

/// Scores every position, best first.
fn scan(
    screen: &GrayImage,
    integral: &Integral,
    template: &Prepared,
    positions: impl Iterator<Item = (u32, u32)>,
) -> Vec<Match> {
    let mut matches: Vec<Match> = positions
        .map(|(x, y)| Match {
            x,
            y,
            width: template.width,
            height: template.height,
            score: template.score(screen, integral, x, y),
        })
        .collect();
    matches.sort_by(|a, b| b.score.total_cmp(&a.score));
    matches
}

/// A template with its mean removed.
struct Prepared {
    width: u32,
    height: u32,
    centered: Vec<f64>,
    norm: f64,
}

impl Prepared {
    fn new(template: &GrayImage) -> Self {
        let pixels: Vec<f64> = template.as_raw().iter().map(|&p| p as f64).collect();
        let mean = pixels.iter().sum::<f64>() / pixels.len() as f64;
        let centered: Vec<f64> = pixels.iter().map(|p| p - mean).collect();
        let norm = centered.iter().map(|p| p * p).sum::<f64>().sqrt();
        Self {
            width: template.width(),
            height: template.height(),
            centered,
            norm,
        }
    }

    fn score(&self, screen: &GrayImage, integral: &Integral, x: u32, y: u32) -> f32 {
        if self.norm == 0.0 {
            return 0.0;
        }
        let n = (self.width * self.height) as f64;
        let (sum, sum_sq) = integral.window(x, y, self.width, self.height);
        let variance = sum_sq - sum * sum / n;
        if variance <= f64::EPSILON {
            return 0.0;
        }

        let stride = screen.width() as usize;
        let raw = screen.as_raw();
        let w = self.width as usize;
        let mut cross = 0.0;
        for row in 0..self.height as usize {
            let start = (y as usize + row) * stride + x as usize;
            let screen_row = &raw[start..start + w];
            let template_row = &self.centered[row * w..(row + 1) * w];
            cross += screen_row
                .iter()
                .zip(template_row)
                .map(|(&s, &t)| s as f64 * t)
                .sum::<f64>();
        }
        (cross / (self.norm * variance.sqrt())) as f32
    }
}

/// Summed-area tables of pixel values and their squares.
struct Integral {
    stride: usize,
    sum: Vec<f64>,
    sum_sq: Vec<f64>,
}

impl Integral {
    fn new(image: &GrayImage) -> Self {
        let (w, h) = (image.width() as usize, image.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0.0; stride * (h + 1)];
        let mut sum_sq = vec![0.0; stride * (h + 1)];
        let raw = image.as_raw();
        for y in 0..h {
            let mut row = 0.0;
            let mut row_sq = 0.0;
            for x in 0..w {
                let p = raw[y * w + x] as f64;
                row += p;
                row_sq += p * p;
                sum[(y + 1) * stride + x + 1] = sum[y * stride + x + 1] + row;
                sum_sq[(y + 1) * stride + x + 1] = sum_sq[y * stride + x + 1] + row_sq;
            }
        }
        Self {
            stride,
            sum,
            sum_sq,
        }
    }

    fn window(&self, x: u32, y: u32, w: u32, h: u32) -> (f64, f64) {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let at = |t: &[f64], x: usize, y: usize| t[y * self.stride + x];
        let area = |t: &[f64]| at(t, x1, y1) - at(t, x0, y1) - at(t, x1, y0) + at(t, x0, y0);
        (area(&self.sum), area(&self.sum_sq))
    }
}
