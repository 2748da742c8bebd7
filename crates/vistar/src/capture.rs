//! Capture adapter: turns a rendered page into a raster [`Image`].
//!
//! The browser-automation layer stays outside the harness. Everything it
//! must provide is the [`CaptureTarget`] trait: the current viewport size and
//! a render-to-PNG capability.
//!
//! ```text
//! ┌──────────────────┐  render(mode)  ┌────────────────┐  crop(region)  ┌─────────┐
//! │  CaptureTarget   │ ─────────────► │ CaptureAdapter │ ─────────────► │  Image  │
//! │ (page / file /   │   PNG bytes    │ decode + check │                │  RGBA8  │
//! │  chromium tab)   │                └────────────────┘                └─────────┘
//! └──────────────────┘
//! ```

use crate::result::{VistarError, VistarResult};
use async_trait::async_trait;
use image::{ImageEncoder, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Viewport size in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Viewport {
    /// Create a viewport
    #[must_use]
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether both dimensions are non-zero
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.width > 0 && self.height > 0
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self::new(1400, 900)
    }
}

impl fmt::Display for Viewport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl FromStr for Viewport {
    type Err = VistarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(|| VistarError::config(format!("viewport '{s}' is not WIDTHxHEIGHT")))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<u32>()
                .map_err(|e| VistarError::config(format!("viewport '{s}': {e}")))
        };
        let viewport = Self::new(parse(w)?, parse(h)?);
        if !viewport.is_valid() {
            return Err(VistarError::config(format!(
                "viewport '{s}' must have non-zero dimensions"
            )));
        }
        Ok(viewport)
    }
}

/// Axis-aligned rectangle in image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Region {
    /// X coordinate of top-left corner
    pub x: u32,
    /// Y coordinate of top-left corner
    pub y: u32,
    /// Width of region
    pub width: u32,
    /// Height of region
    pub height: u32,
}

impl Region {
    /// Create a new region
    #[must_use]
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge
    #[must_use]
    pub const fn right(&self) -> u32 {
        self.x + self.width
    }

    /// Exclusive bottom edge
    #[must_use]
    pub const fn bottom(&self) -> u32 {
        self.y + self.height
    }

    /// Area in pixels
    #[must_use]
    pub const fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Check if a point is within this region
    #[must_use]
    pub const fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Smallest region covering both
    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        let x = self.x.min(other.x);
        let y = self.y.min(other.y);
        Self::new(
            x,
            y,
            self.right().max(other.right()) - x,
            self.bottom().max(other.bottom()) - y,
        )
    }

    /// Whether every edge of `other` lies within `tolerance` pixels of ours
    #[must_use]
    pub const fn approx_eq(&self, other: &Self, tolerance: u32) -> bool {
        self.x.abs_diff(other.x) <= tolerance
            && self.y.abs_diff(other.y) <= tolerance
            && self.right().abs_diff(other.right()) <= tolerance
            && self.bottom().abs_diff(other.bottom()) <= tolerance
    }

    /// Whether this region lies fully inside a `width` x `height` image
    #[must_use]
    pub const fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0
            && self.height > 0
            && self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.x, self.y
        )
    }
}

/// RGBA raster captured from a page
#[derive(Clone, PartialEq, Eq)]
pub struct Image {
    pixels: RgbaImage,
}

impl fmt::Debug for Image {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Image")
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Image {
    /// Wrap an RGBA buffer
    #[must_use]
    pub const fn from_rgba(pixels: RgbaImage) -> Self {
        Self { pixels }
    }

    /// Image of a single colour
    #[must_use]
    pub fn filled(width: u32, height: u32, color: Rgba<u8>) -> Self {
        Self::from_rgba(RgbaImage::from_pixel(width, height, color))
    }

    /// Decode PNG (or any format enabled on the `image` crate)
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be decoded
    pub fn from_png(bytes: &[u8]) -> VistarResult<Self> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| VistarError::image_processing(format!("Failed to decode image: {e}")))?;
        Ok(Self::from_rgba(decoded.into_rgba8()))
    }

    /// Encode as PNG
    ///
    /// # Errors
    ///
    /// Returns error if encoding fails
    pub fn to_png(&self) -> VistarResult<Vec<u8>> {
        encode_png(&self.pixels)
    }

    /// Width in pixels
    #[must_use]
    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    /// Height in pixels
    #[must_use]
    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// `(width, height)`
    #[must_use]
    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    /// Total pixel count
    #[must_use]
    pub fn pixel_count(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Borrow the raw RGBA buffer
    #[must_use]
    pub const fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    /// Mutable access to the raw buffer
    pub fn as_rgba_mut(&mut self) -> &mut RgbaImage {
        &mut self.pixels
    }

    /// Copy out a sub-region
    ///
    /// # Errors
    ///
    /// Returns error if the region does not fit inside the image
    pub fn crop(&self, region: Region) -> VistarResult<Self> {
        if !region.fits_within(self.width(), self.height()) {
            return Err(VistarError::image_processing(format!(
                "region {region} is outside the {}x{} image",
                self.width(),
                self.height()
            )));
        }
        let view = image::imageops::crop_imm(
            &self.pixels,
            region.x,
            region.y,
            region.width,
            region.height,
        );
        Ok(Self::from_rgba(view.to_image()))
    }

    /// SHA-256 of the raw pixel data, hex encoded
    #[must_use]
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.width().to_le_bytes());
        hasher.update(self.height().to_le_bytes());
        hasher.update(self.pixels.as_raw());
        to_hex(&hasher.finalize())
    }
}

pub(crate) fn encode_png(pixels: &RgbaImage) -> VistarResult<Vec<u8>> {
    let mut buffer = Vec::new();
    image::codecs::png::PngEncoder::new(&mut buffer)
        .write_image(
            pixels.as_raw(),
            pixels.width(),
            pixels.height(),
            image::ExtendedColorType::Rgba8,
        )
        .map_err(|e| VistarError::image_processing(format!("Failed to encode PNG: {e}")))?;
    Ok(buffer)
}

pub(crate) fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write;
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut s, b| {
        let _ = write!(s, "{b:02x}");
        s
    })
}

/// How much of the page a capture covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureMode {
    /// Entire scrollable area, stitched by the renderer
    #[default]
    FullPage,
    /// Only the visible viewport, single shot
    Viewport,
}

impl FromStr for CaptureMode {
    type Err = VistarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "full_page" | "fullpage" | "css" => Ok(Self::FullPage),
            "viewport" | "window" => Ok(Self::Viewport),
            other => Err(VistarError::config(format!("unknown capture mode '{other}'"))),
        }
    }
}

/// Rendered page or view supplied by the browser-automation layer
#[async_trait]
pub trait CaptureTarget: Send + Sync {
    /// Current viewport size
    async fn viewport(&self) -> VistarResult<Viewport>;

    /// Whether the page is stable enough to capture
    async fn is_ready(&self) -> bool {
        true
    }

    /// Render the page to PNG bytes
    async fn render(&self, mode: CaptureMode) -> VistarResult<Vec<u8>>;
}

/// Wraps a [`CaptureTarget`] and produces validated images
#[derive(Debug, Clone, Copy, Default)]
pub struct CaptureAdapter {
    mode: CaptureMode,
}

impl CaptureAdapter {
    /// Create an adapter using the given capture mode
    #[must_use]
    pub const fn new(mode: CaptureMode) -> Self {
        Self { mode }
    }

    /// Capture mode in use
    #[must_use]
    pub const fn mode(&self) -> CaptureMode {
        self.mode
    }

    /// Capture the target, optionally cropped to `region`
    ///
    /// # Errors
    ///
    /// Returns [`VistarError::Capture`] if the target is not ready, renders
    /// something undecodable, renders the wrong size in viewport mode, or if
    /// the region falls outside the render.
    pub async fn capture(
        &self,
        target: &dyn CaptureTarget,
        region: Option<Region>,
    ) -> VistarResult<Image> {
        if !target.is_ready().await {
            return Err(VistarError::capture(
                "page is not ready (stale handle or navigation in progress)",
            ));
        }

        let viewport = target.viewport().await?;
        let png = target.render(self.mode).await.map_err(|e| match e {
            VistarError::Capture { .. } => e,
            other => VistarError::capture(other.to_string()),
        })?;
        let image = Image::from_png(&png).map_err(|e| VistarError::capture(e.to_string()))?;

        if self.mode == CaptureMode::Viewport
            && image.dimensions() != (viewport.width, viewport.height)
        {
            return Err(VistarError::capture(format!(
                "viewport capture is {}x{}, expected {viewport}",
                image.width(),
                image.height()
            )));
        }

        debug!(
            viewport = %viewport,
            width = image.width(),
            height = image.height(),
            mode = ?self.mode,
            "captured page"
        );

        match region {
            Some(region) => image
                .crop(region)
                .map_err(|e| VistarError::capture(e.to_string())),
            None => Ok(image),
        }
    }
}

/// In-memory render, used by offline runs and tests
#[derive(Debug, Clone)]
pub struct StaticTarget {
    png: Vec<u8>,
    viewport: Viewport,
    ready: bool,
}

impl StaticTarget {
    /// Create a target that always renders `png`
    #[must_use]
    pub const fn new(png: Vec<u8>, viewport: Viewport) -> Self {
        Self {
            png,
            viewport,
            ready: true,
        }
    }

    /// Create a target from an image, with a viewport equal to its size
    ///
    /// # Errors
    ///
    /// Returns error if the image cannot be encoded
    pub fn from_image(image: &Image) -> VistarResult<Self> {
        Ok(Self::new(
            image.to_png()?,
            Viewport::new(image.width(), image.height()),
        ))
    }

    /// Mark the target as not ready (simulates navigation in progress)
    #[must_use]
    pub const fn not_ready(mut self) -> Self {
        self.ready = false;
        self
    }
}

#[async_trait]
impl CaptureTarget for StaticTarget {
    async fn viewport(&self) -> VistarResult<Viewport> {
        Ok(self.viewport)
    }

    async fn is_ready(&self) -> bool {
        self.ready
    }

    async fn render(&self, _mode: CaptureMode) -> VistarResult<Vec<u8>> {
        Ok(self.png.clone())
    }
}

/// Render exported to disk by an external automation run
#[derive(Debug, Clone)]
pub struct FileTarget {
    path: PathBuf,
    viewport: Viewport,
}

impl FileTarget {
    /// Create a target reading `path`
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, viewport: Viewport) -> Self {
        Self {
            path: path.into(),
            viewport,
        }
    }

    /// Path of the rendered image
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CaptureTarget for FileTarget {
    async fn viewport(&self) -> VistarResult<Viewport> {
        Ok(self.viewport)
    }

    async fn is_ready(&self) -> bool {
        tokio::fs::try_exists(&self.path).await.unwrap_or(false)
    }

    async fn render(&self, _mode: CaptureMode) -> VistarResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            VistarError::capture(format!("cannot read {}: {e}", self.path.display()))
        })
    }
}

#[cfg(feature = "browser")]
mod cdp {
    use super::{CaptureMode, CaptureTarget, Viewport};
    use crate::result::{VistarError, VistarResult};
    use async_trait::async_trait;
    use chromiumoxide::cdp::browser_protocol::page::CaptureScreenshotFormat;
    use chromiumoxide::page::{Page, ScreenshotParams};

    /// Live Chromium tab driven over CDP
    #[derive(Debug, Clone)]
    pub struct ChromiumTarget {
        page: Page,
        viewport: Viewport,
    }

    impl ChromiumTarget {
        /// Wrap a page whose window was launched at `viewport`
        #[must_use]
        pub const fn new(page: Page, viewport: Viewport) -> Self {
            Self { page, viewport }
        }
    }

    #[async_trait]
    impl CaptureTarget for ChromiumTarget {
        async fn viewport(&self) -> VistarResult<Viewport> {
            Ok(self.viewport)
        }

        async fn is_ready(&self) -> bool {
            match self.page.evaluate("document.readyState").await {
                Ok(result) => result
                    .into_value::<String>()
                    .map(|state| state == "complete")
                    .unwrap_or(false),
                Err(_) => false,
            }
        }

        async fn render(&self, mode: CaptureMode) -> VistarResult<Vec<u8>> {
            let params = ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .full_page(mode == CaptureMode::FullPage)
                .build();
            self.page
                .screenshot(params)
                .await
                .map_err(|e| VistarError::capture(e.to_string()))
        }
    }
}

#[cfg(feature = "browser")]
pub use cdp::ChromiumTarget;
