//! Lightweight layout-block detection.
//!
//! A simplified document-layout extraction, not OCR: content is whatever
//! stands out from the page background, nearby content is fused by dilation,
//! and each 8-connected component becomes one block.
//!
//! The ink cut-off is chosen per image (Otsu's method over the distances from
//! the background), so the same layout drawn in black or in pale grey yields
//! the same blocks.
//!
//! ```text
//!  border colours ─► background ─► distances ─► otsu cut ─► ink mask ─► dilate ─► label ─► blocks
//! ```

use crate::capture::{Image, Region};
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Block detector tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Upper bound on the ink cut-off: a pixel this far from the background
    /// is always ink, however contrasted the rest of the page is
    pub ink_threshold: f64,
    /// Pages whose strongest contrast stays below this are blank
    pub min_contrast: f64,
    /// Gap in pixels bridged when fusing ink into blocks
    pub merge_gap: u32,
    /// Blocks with a smaller bounding-box area are discarded as noise
    pub min_block_area: u64,
}

impl Default for LayoutConfig {
    fn default() -> Self {
        Self {
            ink_threshold: 24.0,
            min_contrast: 4.0,
            merge_gap: 4,
            min_block_area: 4,
        }
    }
}

/// Boolean pixel mask in row-major order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    width: u32,
    height: u32,
    bits: Vec<bool>,
}

impl Mask {
    /// All-false mask
    #[must_use]
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width as usize * height as usize],
        }
    }

    /// Build a mask from a per-pixel predicate
    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> bool) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                if f(x, y) {
                    mask.set(x, y);
                }
            }
        }
        mask
    }

    /// Mask width
    #[must_use]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Mask height
    #[must_use]
    pub const fn height(&self) -> u32 {
        self.height
    }

    const fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Read one pixel
    #[must_use]
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.bits[self.index(x, y)]
    }

    /// Set one pixel
    pub fn set(&mut self, x: u32, y: u32) {
        let idx = self.index(x, y);
        self.bits[idx] = true;
    }

    /// Number of set pixels
    #[must_use]
    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    /// Set every pixel inside `region`
    pub fn fill(&mut self, region: &Region) {
        for y in region.y..region.bottom().min(self.height) {
            for x in region.x..region.right().min(self.width) {
                self.set(x, y);
            }
        }
    }

    /// Set pixels inside `region`
    #[must_use]
    pub fn count_in(&self, region: &Region) -> usize {
        let mut n = 0;
        for y in region.y..region.bottom().min(self.height) {
            for x in region.x..region.right().min(self.width) {
                if self.get(x, y) {
                    n += 1;
                }
            }
        }
        n
    }

    /// Grow every set pixel into a `(2 * radius + 1)` square
    #[must_use]
    pub fn dilate(&self, radius: u32) -> Self {
        if radius == 0 || self.bits.is_empty() {
            return self.clone();
        }
        let horizontal = self.dilate_axis(radius, true);
        horizontal.dilate_axis(radius, false)
    }

    /// One separable dilation pass using a running window count
    fn dilate_axis(&self, radius: u32, horizontal: bool) -> Self {
        let (outer, inner) = if horizontal {
            (self.height, self.width)
        } else {
            (self.width, self.height)
        };
        let r = radius as usize;
        let mut out = Self::new(self.width, self.height);
        let mut prefix = vec![0usize; inner as usize + 1];
        for o in 0..outer {
            for i in 0..inner {
                let (x, y) = if horizontal { (i, o) } else { (o, i) };
                prefix[i as usize + 1] = prefix[i as usize] + usize::from(self.get(x, y));
            }
            for i in 0..inner as usize {
                let lo = i.saturating_sub(r);
                let hi = (i + r + 1).min(inner as usize);
                if prefix[hi] > prefix[lo] {
                    let (x, y) = if horizontal {
                        (i as u32, o)
                    } else {
                        (o, i as u32)
                    };
                    out.set(x, y);
                }
            }
        }
        out
    }

    /// Bounding boxes of 8-connected components.
    ///
    /// When `tight` is given, each box shrinks to the pixels of `tight` that
    /// fall inside the component; components with no such pixel are dropped.
    #[must_use]
    pub fn components(&self, tight: Option<&Self>) -> Vec<Region> {
        let mut visited = vec![false; self.bits.len()];
        let mut regions = Vec::new();
        let mut stack = Vec::new();

        for start in 0..self.bits.len() {
            if !self.bits[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push(start);
            let mut bounds: Option<(u32, u32, u32, u32)> = None;

            while let Some(idx) = stack.pop() {
                let x = (idx % self.width as usize) as u32;
                let y = (idx / self.width as usize) as u32;
                if tight.map_or(true, |t| t.get(x, y)) {
                    bounds = Some(match bounds {
                        None => (x, y, x, y),
                        Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x), y1.max(y)),
                    });
                }
                for (nx, ny) in self.neighbours(x, y) {
                    let nidx = self.index(nx, ny);
                    if self.bits[nidx] && !visited[nidx] {
                        visited[nidx] = true;
                        stack.push(nidx);
                    }
                }
            }

            if let Some((x0, y0, x1, y1)) = bounds {
                regions.push(Region::new(x0, y0, x1 - x0 + 1, y1 - y0 + 1));
            }
        }

        regions.sort_by_key(|r| (r.y, r.x, r.height, r.width));
        regions
    }

    fn neighbours(&self, x: u32, y: u32) -> impl Iterator<Item = (u32, u32)> + '_ {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        let (x, y) = (i64::from(x), i64::from(y));
        (-1..=1)
            .flat_map(move |dy| (-1..=1).map(move |dx| (x + dx, y + dy)))
            .filter(move |&(nx, ny)| {
                (nx, ny) != (x, y) && nx >= 0 && ny >= 0 && nx < w && ny < h
            })
            .map(|(nx, ny)| (nx as u32, ny as u32))
    }
}

/// Calculate perceptual color difference (weighted for human vision)
///
/// Uses weighted RGB based on human perception:
/// - Red: 0.299
/// - Green: 0.587
/// - Blue: 0.114
#[must_use]
pub fn perceptual_diff(a: Rgba<u8>, b: Rgba<u8>) -> f64 {
    let Rgba([r1, g1, b1, _]) = a;
    let Rgba([r2, g2, b2, _]) = b;

    let dr = (f64::from(r1) - f64::from(r2)) * 0.299;
    let dg = (f64::from(g1) - f64::from(g2)) * 0.587;
    let db = (f64::from(b1) - f64::from(b2)) * 0.114;

    (dr * dr + dg * dg + db * db).sqrt()
}

/// Most frequent colour along the image border
#[must_use]
pub fn estimate_background(image: &Image) -> Rgba<u8> {
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return Rgba([255, 255, 255, 255]);
    }
    let pixels = image.as_rgba();
    let mut counts: HashMap<[u8; 4], usize> = HashMap::new();
    let mut tally = |x: u32, y: u32| *counts.entry(pixels.get_pixel(x, y).0).or_insert(0) += 1;
    for x in 0..w {
        tally(x, 0);
        tally(x, h - 1);
    }
    for y in 0..h {
        tally(0, y);
        tally(w - 1, y);
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(&a.0)))
        .map_or(Rgba([255, 255, 255, 255]), |(color, _)| Rgba(color))
}

/// Pixels that differ from `background` by more than `threshold`
#[must_use]
pub fn ink_mask(image: &Image, background: Rgba<u8>, threshold: f64) -> Mask {
    let pixels = image.as_rgba();
    Mask::from_fn(image.width(), image.height(), |x, y| {
        perceptual_diff(*pixels.get_pixel(x, y), background) > threshold
    })
}

/// Ink cut-off for a set of background distances.
///
/// Otsu's method over a one-unit histogram; when a whole range of cuts
/// separates the classes equally well the middle of that range is taken.
/// The result is clamped to `[min_contrast, ink_threshold]`. `None` means the
/// page has no content.
#[must_use]
pub fn ink_cutoff(distances: &[f64], config: &LayoutConfig) -> Option<f64> {
    let strongest = distances.iter().copied().fold(0.0_f64, f64::max);
    if strongest < config.min_contrast {
        return None;
    }

    let bins = strongest.ceil() as usize + 1;
    let mut histogram = vec![0usize; bins];
    for d in distances {
        histogram[(d.round() as usize).min(bins - 1)] += 1;
    }

    let total = distances.len() as f64;
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(i, n)| i as f64 * *n as f64)
        .sum();
    let (mut weight_bg, mut sum_bg) = (0.0, 0.0);
    let mut best = -1.0_f64;
    let (mut first, mut last) = (0usize, 0usize);
    for (t, n) in histogram.iter().enumerate().take(bins - 1) {
        weight_bg += *n as f64;
        sum_bg += t as f64 * *n as f64;
        let weight_fg = total - weight_bg;
        if weight_bg == 0.0 || weight_fg == 0.0 {
            continue;
        }
        let mean_gap = sum_bg / weight_bg - (sum_all - sum_bg) / weight_fg;
        let between = weight_bg * weight_fg * mean_gap * mean_gap;
        if between > best * (1.0 + 1e-9) {
            best = between;
            first = t;
            last = t;
        } else if (between - best).abs() <= best * 1e-9 {
            last = t;
        }
    }

    let cut = (first + last) as f64 / 2.0 + 0.5;
    Some(cut.clamp(config.min_contrast, config.ink_threshold.max(config.min_contrast)))
}

/// Detected blocks with the ink mask they came from
#[derive(Debug, Clone)]
pub struct Layout {
    /// Page background colour
    pub background: Rgba<u8>,
    /// Ink cut-off chosen for this image; `None` on a blank page
    pub cutoff: Option<f64>,
    /// Foreground pixels
    pub ink: Mask,
    /// Content blocks, top-to-bottom then left-to-right
    pub blocks: Vec<Region>,
}

/// Analyse an image into content blocks
#[must_use]
pub fn analyze(image: &Image, config: &LayoutConfig) -> Layout {
    let background = estimate_background(image);
    let (width, height) = image.dimensions();
    let distances: Vec<f64> = image
        .as_rgba()
        .pixels()
        .map(|p| perceptual_diff(*p, background))
        .collect();
    let cutoff = ink_cutoff(&distances, config);

    let mut ink = Mask::new(width, height);
    if let Some(cut) = cutoff {
        for (bit, d) in ink.bits.iter_mut().zip(&distances) {
            *bit = *d > cut;
        }
    }
    let fused = ink.dilate(config.merge_gap);
    let blocks = fused
        .components(Some(&ink))
        .into_iter()
        .filter(|b| b.area() >= config.min_block_area)
        .collect();
    Layout {
        background,
        cutoff,
        ink,
        blocks,
    }
}

/// Bounding boxes of detected content blocks
#[must_use]
pub fn detect_blocks(image: &Image, config: &LayoutConfig) -> Vec<Region> {
    analyze(image, config).blocks
}
