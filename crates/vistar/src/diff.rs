//! Diff engine: compares a capture against its baseline under a match level.
//!
//! | Level   | Differing when                                                   |
//! |---------|------------------------------------------------------------------|
//! | EXACT   | any RGBA channel of any pixel differs                            |
//! | STRICT  | perceptual colour distance exceeds `color_threshold`             |
//! | LAYOUT  | a content block has no counterpart within `layout_tolerance`     |
//! | CONTENT | LAYOUT, or the ink inside a matched block disagrees              |
//!
//! Size differences short-circuit to `DIMENSION_MISMATCH` at every level.

use crate::capture::{encode_png, Image, Region};
use crate::layout::{analyze, perceptual_diff, Layout, LayoutConfig, Mask};
use crate::result::{VistarError, VistarResult};
use async_trait::async_trait;
use image::Rgba;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Comparison strictness policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchLevel {
    /// Zero tolerance per pixel
    #[serde(alias = "exact")]
    Exact,
    /// Small colour distance ignored (anti-aliasing noise)
    #[default]
    #[serde(alias = "strict")]
    Strict,
    /// Only block structure compared
    #[serde(alias = "layout")]
    Layout,
    /// Block structure and ink presence compared, colour ignored
    #[serde(alias = "content")]
    Content,
}

impl MatchLevel {
    /// All levels, strictest first
    pub const ALL: [Self; 4] = [Self::Exact, Self::Strict, Self::Content, Self::Layout];

    /// Upper-case name as used in reports
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Exact => "EXACT",
            Self::Strict => "STRICT",
            Self::Layout => "LAYOUT",
            Self::Content => "CONTENT",
        }
    }
}

impl fmt::Display for MatchLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchLevel {
    type Err = VistarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "strict" => Ok(Self::Strict),
            "layout" => Ok(Self::Layout),
            "content" => Ok(Self::Content),
            other => Err(VistarError::config(format!("unknown match level '{other}'"))),
        }
    }
}

/// Result of one checkpoint comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DiffOutcome {
    /// Candidate matches its baseline
    Match,
    /// Candidate differs from its baseline
    Mismatch,
    /// No baseline existed
    New,
    /// Capture failed
    Missing,
}

impl DiffOutcome {
    /// MATCH and NEW let a session pass
    #[must_use]
    pub const fn is_passing(&self) -> bool {
        matches!(self, Self::Match | Self::New)
    }

    /// Upper-case name as used in reports
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "MATCH",
            Self::Mismatch => "MISMATCH",
            Self::New => "NEW",
            Self::Missing => "MISSING",
        }
    }
}

impl fmt::Display for DiffOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a checkpoint or session did not pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MismatchReason {
    /// Candidate and baseline have different sizes
    DimensionMismatch,
    /// Pixels differ beyond the tolerance
    PixelDifference,
    /// Block structure differs
    LayoutDifference,
    /// Ink inside matched blocks differs
    ContentDifference,
    /// Baseline could not be read
    BaselineUnavailable,
    /// Page could not be captured
    CaptureFailed,
    /// Session was abandoned before closing
    Abandoned,
}

impl MismatchReason {
    /// Stable reason code
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::DimensionMismatch => "DIMENSION_MISMATCH",
            Self::PixelDifference => "PIXEL_DIFFERENCE",
            Self::LayoutDifference => "LAYOUT_DIFFERENCE",
            Self::ContentDifference => "CONTENT_DIFFERENCE",
            Self::BaselineUnavailable => "BASELINE_UNAVAILABLE",
            Self::CaptureFailed => "CAPTURE_FAILED",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for MismatchReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Diff engine tuning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffConfig {
    /// STRICT: perceptual distance a pixel may drift before it differs
    pub color_threshold: f64,
    /// STRICT: fraction of differing pixels tolerated (0.0-1.0)
    pub max_diff_ratio: f64,
    /// LAYOUT/CONTENT: block edges may move this many pixels
    pub layout_tolerance: u32,
    /// CONTENT: fraction of a block's ink that may disagree (0.0-1.0)
    pub content_ratio: f64,
    /// Pixel differences closer than this are reported as one region
    pub region_merge_gap: u32,
    /// Produce a PNG highlighting the differences on mismatch
    pub render_diff_image: bool,
    /// Block detector settings
    pub layout: LayoutConfig,
}

impl Default for DiffConfig {
    fn default() -> Self {
        Self {
            color_threshold: 10.0,
            max_diff_ratio: 0.0,
            layout_tolerance: 2,
            content_ratio: 0.02,
            region_merge_gap: 8,
            render_diff_image: false,
            layout: LayoutConfig::default(),
        }
    }
}

impl DiffConfig {
    /// Set the STRICT colour threshold
    #[must_use]
    pub const fn with_color_threshold(mut self, threshold: f64) -> Self {
        self.color_threshold = threshold;
        self
    }

    /// Set the tolerated differing-pixel ratio
    #[must_use]
    pub const fn with_max_diff_ratio(mut self, ratio: f64) -> Self {
        self.max_diff_ratio = ratio;
        self
    }

    /// Set the block edge tolerance
    #[must_use]
    pub const fn with_layout_tolerance(mut self, pixels: u32) -> Self {
        self.layout_tolerance = pixels;
        self
    }

    /// Set the CONTENT ink disagreement ratio
    #[must_use]
    pub const fn with_content_ratio(mut self, ratio: f64) -> Self {
        self.content_ratio = ratio;
        self
    }

    /// Enable diff image rendering
    #[must_use]
    pub const fn with_diff_image(mut self, render: bool) -> Self {
        self.render_diff_image = render;
        self
    }

    /// Set block detector settings
    #[must_use]
    pub const fn with_layout(mut self, layout: LayoutConfig) -> Self {
        self.layout = layout;
        self
    }
}

/// Structured comparison result
#[derive(Debug, Clone, PartialEq)]
pub struct DiffResult {
    /// Outcome of the comparison
    pub outcome: DiffOutcome,
    /// Reason code when not MATCH/NEW
    pub reason: Option<MismatchReason>,
    /// Human-readable explanation
    pub detail: Option<String>,
    /// Differing regions, for reporting
    pub regions: Vec<Region>,
    /// Number of pixels that differ
    pub diff_pixel_count: usize,
    /// Total number of pixels compared
    pub total_pixels: usize,
    /// Diff visualization (PNG, differences in red)
    pub diff_image: Option<Vec<u8>>,
}

impl DiffResult {
    fn matched(total_pixels: usize) -> Self {
        Self {
            outcome: DiffOutcome::Match,
            reason: None,
            detail: None,
            regions: Vec::new(),
            diff_pixel_count: 0,
            total_pixels,
            diff_image: None,
        }
    }

    /// No baseline: the candidate is new
    #[must_use]
    pub fn new_baseline(total_pixels: usize) -> Self {
        Self {
            outcome: DiffOutcome::New,
            detail: Some("no baseline; candidate queued for acceptance".to_string()),
            ..Self::matched(total_pixels)
        }
    }

    /// The baseline store failed; the checkpoint cannot pass
    #[must_use]
    pub fn baseline_unavailable(message: impl Into<String>) -> Self {
        Self::mismatch(
            MismatchReason::BaselineUnavailable,
            message.into(),
            Vec::new(),
            0,
            0,
        )
    }

    fn mismatch(
        reason: MismatchReason,
        detail: String,
        regions: Vec<Region>,
        diff_pixel_count: usize,
        total_pixels: usize,
    ) -> Self {
        Self {
            outcome: DiffOutcome::Mismatch,
            reason: Some(reason),
            detail: Some(detail),
            regions,
            diff_pixel_count,
            total_pixels,
            diff_image: None,
        }
    }

    /// Check if images are identical (no differences)
    #[must_use]
    pub const fn is_identical(&self) -> bool {
        self.diff_pixel_count == 0 && matches!(self.outcome, DiffOutcome::Match)
    }

    /// Fraction of pixels that differ (0.0-1.0)
    #[must_use]
    pub fn diff_ratio(&self) -> f64 {
        if self.total_pixels == 0 {
            0.0
        } else {
            self.diff_pixel_count as f64 / self.total_pixels as f64
        }
    }
}

/// Backend that decides whether a candidate matches its baseline.
///
/// [`DiffEngine`] is the local pixel/structure backend; a hosted
/// diff-as-a-service backend implements the same contract.
#[async_trait]
pub trait Comparator: Send + Sync + fmt::Debug {
    /// Compare `candidate` against `baseline` (absent when none exists)
    async fn compare(
        &self,
        candidate: &Image,
        baseline: Option<&Image>,
        level: MatchLevel,
    ) -> VistarResult<DiffResult>;
}

/// Local diff engine
#[derive(Debug, Clone, Default)]
pub struct DiffEngine {
    config: DiffConfig,
}

impl DiffEngine {
    /// Create an engine with configuration
    #[must_use]
    pub const fn new(config: DiffConfig) -> Self {
        Self { config }
    }

    /// Get configuration
    #[must_use]
    pub const fn config(&self) -> &DiffConfig {
        &self.config
    }

    /// Compare `candidate` against `baseline` under `level`
    ///
    /// # Errors
    ///
    /// Returns error only if the diff image cannot be encoded
    pub fn compare(
        &self,
        candidate: &Image,
        baseline: Option<&Image>,
        level: MatchLevel,
    ) -> VistarResult<DiffResult> {
        let total_pixels = candidate.pixel_count();
        let Some(baseline) = baseline else {
            return Ok(DiffResult::new_baseline(total_pixels));
        };

        if candidate.dimensions() != baseline.dimensions() {
            let (w, h) = candidate.dimensions();
            let (bw, bh) = baseline.dimensions();
            return Ok(DiffResult::mismatch(
                MismatchReason::DimensionMismatch,
                format!("candidate is {w}x{h}, baseline is {bw}x{bh}"),
                vec![Region::new(0, 0, w.max(bw), h.max(bh))],
                total_pixels,
                total_pixels,
            ));
        }

        let (mut result, mask) = match level {
            MatchLevel::Exact => self.compare_pixels(candidate, baseline, None),
            MatchLevel::Strict => {
                self.compare_pixels(candidate, baseline, Some(self.config.color_threshold))
            }
            MatchLevel::Layout => self.compare_structure(candidate, baseline, false),
            MatchLevel::Content => self.compare_structure(candidate, baseline, true),
        };

        if self.config.render_diff_image && result.outcome == DiffOutcome::Mismatch {
            result.diff_image = Some(render_diff_image(candidate, &mask)?);
        }
        Ok(result)
    }

    /// EXACT when `threshold` is `None`, STRICT otherwise
    fn compare_pixels(
        &self,
        candidate: &Image,
        baseline: &Image,
        threshold: Option<f64>,
    ) -> (DiffResult, Mask) {
        let (width, height) = candidate.dimensions();
        let (c, b) = (candidate.as_rgba(), baseline.as_rgba());
        let mask = Mask::from_fn(width, height, |x, y| {
            let (pc, pb) = (*c.get_pixel(x, y), *b.get_pixel(x, y));
            match threshold {
                None => pc != pb,
                Some(t) => perceptual_diff(pc, pb) > t || pc.0[3].abs_diff(pb.0[3]) as f64 > t,
            }
        });

        let total_pixels = candidate.pixel_count();
        let diff_pixel_count = mask.count();
        let mut result = DiffResult::matched(total_pixels);
        result.diff_pixel_count = diff_pixel_count;

        let tolerated = match threshold {
            None => diff_pixel_count == 0,
            Some(_) => {
                diff_pixel_count == 0 || result.diff_ratio() <= self.config.max_diff_ratio
            }
        };
        if tolerated {
            return (result, mask);
        }

        let regions = mask
            .dilate(self.config.region_merge_gap)
            .components(Some(&mask));
        let detail = format!(
            "{diff_pixel_count} of {total_pixels} pixels differ ({:.2}%) in {} region(s)",
            result.diff_ratio() * 100.0,
            regions.len()
        );
        (
            DiffResult::mismatch(
                MismatchReason::PixelDifference,
                detail,
                regions,
                diff_pixel_count,
                total_pixels,
            ),
            mask,
        )
    }

    /// LAYOUT when `with_content` is false, CONTENT otherwise
    fn compare_structure(
        &self,
        candidate: &Image,
        baseline: &Image,
        with_content: bool,
    ) -> (DiffResult, Mask) {
        let (width, height) = candidate.dimensions();
        let total_pixels = candidate.pixel_count();
        let layout_c = analyze(candidate, &self.config.layout);
        let layout_b = analyze(baseline, &self.config.layout);

        let pairing = pair_blocks(&layout_c, &layout_b, self.config.layout_tolerance);
        let mut structural: Vec<Region> = pairing
            .unmatched_candidate
            .iter()
            .chain(&pairing.unmatched_baseline)
            .copied()
            .collect();
        structural.sort();
        structural.dedup();

        if !structural.is_empty() {
            let mask = region_mask(width, height, &structural);
            let detail = format!(
                "{} block(s) added, {} block(s) removed or moved (candidate {} vs baseline {} blocks)",
                pairing.unmatched_candidate.len(),
                pairing.unmatched_baseline.len(),
                layout_c.blocks.len(),
                layout_b.blocks.len()
            );
            let count = mask.count();
            return (
                DiffResult::mismatch(
                    MismatchReason::LayoutDifference,
                    detail,
                    structural,
                    count,
                    total_pixels,
                ),
                mask,
            );
        }

        if with_content {
            let differing: Vec<Region> = pairing
                .matched
                .iter()
                .filter(|(c, b)| {
                    let area = c.union(b);
                    let ink_total = layout_c.ink.count_in(&area).max(layout_b.ink.count_in(&area));
                    let disagree = ink_disagreement(&layout_c.ink, &layout_b.ink, &area);
                    ink_total > 0
                        && disagree as f64 / ink_total as f64 > self.config.content_ratio
                })
                .map(|(c, b)| c.union(b))
                .collect();

            if !differing.is_empty() {
                let mask = region_mask(width, height, &differing);
                let detail = format!(
                    "ink differs inside {} of {} block(s)",
                    differing.len(),
                    pairing.matched.len()
                );
                let count = mask.count();
                return (
                    DiffResult::mismatch(
                        MismatchReason::ContentDifference,
                        detail,
                        differing,
                        count,
                        total_pixels,
                    ),
                    mask,
                );
            }
        }

        (DiffResult::matched(total_pixels), Mask::new(width, height))
    }
}

#[async_trait]
impl Comparator for DiffEngine {
    async fn compare(
        &self,
        candidate: &Image,
        baseline: Option<&Image>,
        level: MatchLevel,
    ) -> VistarResult<DiffResult> {
        Self::compare(self, candidate, baseline, level)
    }
}

struct BlockPairing {
    matched: Vec<(Region, Region)>,
    unmatched_candidate: Vec<Region>,
    unmatched_baseline: Vec<Region>,
}

/// One-to-one pairing of blocks whose edges agree within `tolerance`,
/// closest centres first
fn pair_blocks(candidate: &Layout, baseline: &Layout, tolerance: u32) -> BlockPairing {
    let mut pairs: Vec<(u64, usize, usize)> = Vec::new();
    for (ci, c) in candidate.blocks.iter().enumerate() {
        for (bi, b) in baseline.blocks.iter().enumerate() {
            if c.approx_eq(b, tolerance) {
                pairs.push((centre_distance(c, b), ci, bi));
            }
        }
    }
    pairs.sort_unstable();

    let mut candidate_used = vec![false; candidate.blocks.len()];
    let mut baseline_used = vec![false; baseline.blocks.len()];
    let mut matched = Vec::new();
    for (_, ci, bi) in pairs {
        if candidate_used[ci] || baseline_used[bi] {
            continue;
        }
        candidate_used[ci] = true;
        baseline_used[bi] = true;
        matched.push((candidate.blocks[ci], baseline.blocks[bi]));
    }
    matched.sort_by_key(|(c, _)| (c.y, c.x));

    let unused = |blocks: &[Region], used: &[bool]| -> Vec<Region> {
        blocks
            .iter()
            .zip(used)
            .filter(|(_, u)| !**u)
            .map(|(b, _)| *b)
            .collect()
    };
    BlockPairing {
        unmatched_candidate: unused(&candidate.blocks, &candidate_used),
        unmatched_baseline: unused(&baseline.blocks, &baseline_used),
        matched,
    }
}

/// Squared distance between doubled centres, exact in integers
fn centre_distance(a: &Region, b: &Region) -> u64 {
    let dx = u64::from((a.x + a.right()).abs_diff(b.x + b.right()));
    let dy = u64::from((a.y + a.bottom()).abs_diff(b.y + b.bottom()));
    dx * dx + dy * dy
}

fn ink_disagreement(a: &Mask, b: &Mask, area: &Region) -> usize {
    let mut n = 0;
    for y in area.y..area.bottom().min(a.height()) {
        for x in area.x..area.right().min(a.width()) {
            if a.get(x, y) != b.get(x, y) {
                n += 1;
            }
        }
    }
    n
}

fn region_mask(width: u32, height: u32, regions: &[Region]) -> Mask {
    let mut mask = Mask::new(width, height);
    for region in regions {
        mask.fill(region);
    }
    mask
}

/// Differences in red over a dimmed copy of the candidate
fn render_diff_image(candidate: &Image, mask: &Mask) -> VistarResult<Vec<u8>> {
    let (width, height) = candidate.dimensions();
    let mut diff_img = image::RgbaImage::new(width, height);
    for (x, y, pixel) in candidate.as_rgba().enumerate_pixels() {
        let out = if mask.get(x, y) {
            Rgba([255, 0, 0, 255])
        } else {
            let Rgba([r, g, b, _]) = *pixel;
            Rgba([r / 2, g / 2, b / 2, 128])
        };
        diff_img.put_pixel(x, y, out);
    }
    encode_png(&diff_img)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);
    const BLACK: Rgba<u8> = Rgba([0, 0, 0, 255]);

    fn page(rects: &[(Region, Rgba<u8>)]) -> Image {
        let mut img = Image::filled(60, 40, WHITE);
        for (r, color) in rects {
            for y in r.y..r.bottom() {
                for x in r.x..r.right() {
                    img.as_rgba_mut().put_pixel(x, y, *color);
                }
            }
        }
        img
    }

    fn engine() -> DiffEngine {
        DiffEngine::default()
    }

    mod level_tests {
        use super::*;

        #[test]
        fn test_match_level_parse() {
            assert_eq!("layout".parse::<MatchLevel>().unwrap(), MatchLevel::Layout);
            assert_eq!("EXACT".parse::<MatchLevel>().unwrap(), MatchLevel::Exact);
            assert!("fuzzy".parse::<MatchLevel>().is_err());
        }

        #[test]
        fn test_match_level_serde_accepts_lowercase() {
            let level: MatchLevel = serde_json::from_str("\"content\"").unwrap();
            assert_eq!(level, MatchLevel::Content);
            assert_eq!(serde_json::to_string(&level).unwrap(), "\"CONTENT\"");
        }

        #[test]
        fn test_outcome_passing() {
            assert!(DiffOutcome::Match.is_passing());
            assert!(DiffOutcome::New.is_passing());
            assert!(!DiffOutcome::Mismatch.is_passing());
            assert!(!DiffOutcome::Missing.is_passing());
        }

        #[test]
        fn test_reason_codes() {
            assert_eq!(MismatchReason::DimensionMismatch.code(), "DIMENSION_MISMATCH");
            assert_eq!(
                serde_json::to_string(&MismatchReason::BaselineUnavailable).unwrap(),
                "\"BASELINE_UNAVAILABLE\""
            );
        }
    }

    mod pixel_tests {
        use super::*;

        #[test]
        fn test_no_baseline_is_new() {
            let img = page(&[]);
            let result = engine().compare(&img, None, MatchLevel::Exact).unwrap();
            assert_eq!(result.outcome, DiffOutcome::New);
            assert!(result.reason.is_none());
        }

        #[test]
        fn test_identical_images_exact_match() {
            let img = page(&[(Region::new(5, 5, 10, 10), BLACK)]);
            let result = engine().compare(&img, Some(&img), MatchLevel::Exact).unwrap();
            assert!(result.is_identical());
            assert_eq!(result.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_dimension_mismatch_at_every_level() {
            let a = Image::filled(10, 10, WHITE);
            let b = Image::filled(10, 11, WHITE);
            for level in MatchLevel::ALL {
                let result = engine().compare(&a, Some(&b), level).unwrap();
                assert_eq!(result.outcome, DiffOutcome::Mismatch);
                assert_eq!(result.reason, Some(MismatchReason::DimensionMismatch));
            }
        }

        #[test]
        fn test_exact_detects_single_channel_change() {
            let a = Image::filled(4, 4, Rgba([100, 100, 100, 255]));
            let mut b = a.clone();
            b.as_rgba_mut().put_pixel(1, 2, Rgba([101, 100, 100, 255]));
            let result = engine().compare(&a, Some(&b), MatchLevel::Exact).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Mismatch);
            assert_eq!(result.reason, Some(MismatchReason::PixelDifference));
            assert_eq!(result.diff_pixel_count, 1);
            assert_eq!(result.regions, vec![Region::new(1, 2, 1, 1)]);
        }

        #[test]
        fn test_strict_ignores_antialiasing_noise() {
            let a = Image::filled(4, 4, Rgba([100, 100, 100, 255]));
            let mut b = a.clone();
            b.as_rgba_mut().put_pixel(1, 2, Rgba([104, 103, 102, 255]));
            let result = engine().compare(&a, Some(&b), MatchLevel::Strict).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_strict_detects_real_change() {
            let a = page(&[]);
            let b = page(&[(Region::new(10, 10, 3, 3), BLACK)]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Strict).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Mismatch);
            assert_eq!(result.diff_pixel_count, 9);
            assert_eq!(result.regions, vec![Region::new(10, 10, 3, 3)]);
        }

        #[test]
        fn test_strict_ratio_tolerance() {
            let a = page(&[]);
            let b = page(&[(Region::new(10, 10, 3, 3), BLACK)]);
            let lenient = DiffEngine::new(DiffConfig::default().with_max_diff_ratio(0.01));
            let result = lenient.compare(&a, Some(&b), MatchLevel::Strict).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Match);
            assert_eq!(result.diff_pixel_count, 9);
        }

        #[test]
        fn test_nearby_differences_merge_into_one_region() {
            let a = page(&[]);
            let b = page(&[
                (Region::new(10, 10, 2, 2), BLACK),
                (Region::new(14, 10, 2, 2), BLACK),
                (Region::new(50, 30, 2, 2), BLACK),
            ]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Exact).unwrap();
            assert_eq!(
                result.regions,
                vec![Region::new(10, 10, 6, 2), Region::new(50, 30, 2, 2)]
            );
        }

        #[test]
        fn test_diff_image_rendered_on_mismatch() {
            let a = page(&[]);
            let b = page(&[(Region::new(1, 1, 2, 2), BLACK)]);
            let engine = DiffEngine::new(DiffConfig::default().with_diff_image(true));
            let result = engine.compare(&a, Some(&b), MatchLevel::Exact).unwrap();
            let diff = Image::from_png(result.diff_image.as_deref().unwrap()).unwrap();
            assert_eq!(diff.as_rgba().get_pixel(1, 1), &Rgba([255, 0, 0, 255]));
            assert_eq!(diff.dimensions(), a.dimensions());
        }

        #[test]
        fn test_no_diff_image_on_match() {
            let a = page(&[]);
            let engine = DiffEngine::new(DiffConfig::default().with_diff_image(true));
            let result = engine.compare(&a, Some(&a), MatchLevel::Exact).unwrap();
            assert!(result.diff_image.is_none());
        }
    }

    mod structure_tests {
        use super::*;

        #[test]
        fn test_layout_ignores_text_colour_change() {
            let a = page(&[(Region::new(5, 5, 20, 6), BLACK)]);
            let b = page(&[(Region::new(5, 5, 20, 6), Rgba([200, 0, 0, 255]))]);
            assert_eq!(
                engine().compare(&a, Some(&b), MatchLevel::Strict).unwrap().outcome,
                DiffOutcome::Mismatch
            );
            assert_eq!(
                engine().compare(&a, Some(&b), MatchLevel::Layout).unwrap().outcome,
                DiffOutcome::Match
            );
        }

        #[test]
        fn test_layout_ignores_content_inside_same_block() {
            // "closing time" text changes, block footprint stays
            let a = page(&[
                (Region::new(5, 5, 20, 6), BLACK),
                (Region::new(8, 7, 3, 2), WHITE),
            ]);
            let b = page(&[
                (Region::new(5, 5, 20, 6), BLACK),
                (Region::new(15, 7, 3, 2), WHITE),
            ]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Layout).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_layout_tolerates_small_shift() {
            let a = page(&[(Region::new(5, 5, 20, 6), BLACK)]);
            let b = page(&[(Region::new(6, 5, 20, 6), BLACK)]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Layout).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_layout_detects_moved_block() {
            let a = page(&[(Region::new(5, 5, 20, 6), BLACK)]);
            let b = page(&[(Region::new(5, 25, 20, 6), BLACK)]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Layout).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Mismatch);
            assert_eq!(result.reason, Some(MismatchReason::LayoutDifference));
            assert_eq!(
                result.regions,
                vec![Region::new(5, 5, 20, 6), Region::new(5, 25, 20, 6)]
            );
        }

        #[test]
        fn test_layout_detects_added_block() {
            let a = page(&[(Region::new(5, 5, 20, 6), BLACK)]);
            let b = page(&[
                (Region::new(5, 5, 20, 6), BLACK),
                (Region::new(40, 30, 10, 5), BLACK),
            ]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Layout).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Mismatch);
            assert_eq!(result.regions, vec![Region::new(40, 30, 10, 5)]);
        }

        #[test]
        fn test_content_ignores_colour() {
            let a = page(&[(Region::new(5, 5, 20, 6), BLACK)]);
            let b = page(&[(Region::new(5, 5, 20, 6), Rgba([0, 0, 180, 255]))]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Content).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Match);
        }

        #[test]
        fn test_pale_recolour_matches_layout_and_content() {
            let text = [
                Region::new(5, 5, 20, 6),
                Region::new(5, 20, 30, 4),
                Region::new(40, 20, 12, 12),
            ];
            let dark = page(&text.map(|r| (r, BLACK)));
            let pale = page(&text.map(|r| (r, Rgba([230, 230, 230, 255]))));
            for level in [MatchLevel::Layout, MatchLevel::Content] {
                let result = engine().compare(&pale, Some(&dark), level).unwrap();
                assert_eq!(result.outcome, DiffOutcome::Match, "{level}: {:?}", result.detail);
            }
            assert_eq!(
                engine().compare(&pale, Some(&dark), MatchLevel::Strict).unwrap().outcome,
                DiffOutcome::Mismatch
            );
        }

        #[test]
        fn test_pairing_prefers_nearest_block() {
            let layout = |blocks: Vec<Region>| Layout {
                background: WHITE,
                cutoff: Some(24.0),
                ink: Mask::new(60, 40),
                blocks,
            };
            // the left candidate also fits the shared baseline block, but
            // the right candidate fits nothing else
            let candidate = layout(vec![Region::new(10, 10, 5, 5), Region::new(13, 10, 5, 5)]);
            let baseline = layout(vec![Region::new(12, 10, 5, 5), Region::new(8, 11, 5, 5)]);
            let pairing = pair_blocks(&candidate, &baseline, 2);
            assert!(pairing.unmatched_candidate.is_empty());
            assert!(pairing.unmatched_baseline.is_empty());
            assert_eq!(
                pairing.matched,
                vec![
                    (Region::new(10, 10, 5, 5), Region::new(8, 11, 5, 5)),
                    (Region::new(13, 10, 5, 5), Region::new(12, 10, 5, 5)),
                ]
            );
        }

        #[test]
        fn test_region_mask_covers_union_of_regions() {
            let mask = region_mask(10, 10, &[Region::new(0, 0, 4, 4), Region::new(2, 2, 4, 4)]);
            assert_eq!(mask.count(), 16 + 16 - 4);
        }

        #[test]
        fn test_content_detects_text_change_inside_block() {
            let a = page(&[
                (Region::new(5, 5, 20, 6), BLACK),
                (Region::new(8, 7, 3, 2), WHITE),
            ]);
            let b = page(&[
                (Region::new(5, 5, 20, 6), BLACK),
                (Region::new(15, 7, 3, 2), WHITE),
            ]);
            let result = engine().compare(&a, Some(&b), MatchLevel::Content).unwrap();
            assert_eq!(result.outcome, DiffOutcome::Mismatch);
            assert_eq!(result.reason, Some(MismatchReason::ContentDifference));
            assert_eq!(result.regions, vec![Region::new(5, 5, 20, 6)]);
        }
    }

    #[tokio::test]
    async fn test_comparator_trait_delegates() {
        let engine: Box<dyn Comparator> = Box::new(DiffEngine::default());
        let img = page(&[]);
        let result = engine
            .compare(&img, Some(&img), MatchLevel::Exact)
            .await
            .unwrap();
        assert_eq!(result.outcome, DiffOutcome::Match);
    }
}
