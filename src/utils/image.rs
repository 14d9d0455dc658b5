use crate::core::error::{ComicError, ComicResult};
use crate::core::io::Storage;
use crate::core::state::{Panel, PANEL_COUNT};
use crate::utils::caption::{CaptionRenderer, TEXT_BAND_HEIGHT};
use base64::Engine;
use futures_util::future::try_join_all;
use image::imageops::{self, FilterType};
use image::{Rgba, RgbaImage};
use log::{debug, info};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Largest canvas side we are willing to allocate.
pub const MAX_CANVAS_SIDE: u32 = 16384;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Layout {
    Grid2x2,
    Horizontal,
    Vertical,
    Individual,
}

impl Layout {
    pub const ALL: [Layout; 4] = [
        Layout::Grid2x2,
        Layout::Horizontal,
        Layout::Vertical,
        Layout::Individual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layout::Grid2x2 => "2x2",
            Layout::Horizontal => "horizontal",
            Layout::Vertical => "vertical",
            Layout::Individual => "individual",
        }
    }

    /// Cells of the combined canvas as (columns, rows). Individual output is a single cell.
    fn grid(&self) -> (u32, u32) {
        let n = PANEL_COUNT as u32;
        match self {
            Layout::Grid2x2 => (2, n / 2),
            Layout::Horizontal => (n, 1),
            Layout::Vertical => (1, n),
            Layout::Individual => (1, 1),
        }
    }

    fn cell_origin(&self, index: u32) -> (u32, u32) {
        match self {
            Layout::Grid2x2 => (index % 2, index / 2),
            Layout::Horizontal => (index, 0),
            Layout::Vertical | Layout::Individual => (0, index),
        }
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Layout {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Layout::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown layout: {}", s))
    }
}

/// A finished raster plus the filename it should be saved under.
#[derive(Clone, Debug)]
pub struct ComicArtifact {
    pub filename: String,
    pub image: RgbaImage,
}

/// Decodes a `data:` URI or, failing that, reads the reference as a path through `storage`.
pub async fn decode_image_ref(reference: &str, storage: &dyn Storage) -> ComicResult<RgbaImage> {
    let bytes = if let Some(rest) = reference.strip_prefix("data:") {
        let (_, payload) = rest
            .split_once(";base64,")
            .ok_or_else(|| ComicError::composition("data URI is not base64 encoded"))?;
        base64::engine::general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| ComicError::composition(format!("invalid base64 image: {}", e)))?
    } else {
        storage
            .read(reference)
            .await
            .map_err(|e| ComicError::composition(format!("{:#}", e)))?
    };

    let decoded = image::load_from_memory(&bytes)
        .map_err(|e| ComicError::composition(format!("image decode failed: {}", e)))?;
    Ok(decoded.to_rgba8())
}

pub struct Compositor {
    captions: CaptionRenderer,
    storage: Arc<dyn Storage>,
}

impl Compositor {
    pub fn new(captions: CaptionRenderer, storage: Arc<dyn Storage>) -> Self {
        Self { captions, storage }
    }

    /// Lays out every panel that has an image. Individual mode yields one artifact per panel.
    pub async fn render(&self, panels: &[Panel], layout: Layout) -> ComicResult<Vec<ComicArtifact>> {
        let ready: Vec<(&Panel, &str)> = panels
            .iter()
            .filter_map(|p| p.image_url.as_deref().map(|url| (p, url)))
            .collect();
        if ready.is_empty() {
            return Err(ComicError::composition("no panel images to composite"));
        }

        // Every image must decode before anything is drawn.
        let images = try_join_all(
            ready
                .iter()
                .map(|(_, url)| decode_image_ref(url, self.storage.as_ref())),
        )
        .await?;
        let panels: Vec<Panel> = ready.into_iter().map(|(p, _)| p.clone()).collect();
        info!("Compositing {} panels as {}", images.len(), layout);

        match layout {
            Layout::Individual => images
                .iter()
                .zip(&panels)
                .enumerate()
                .map(|(i, (img, panel))| {
                    let image = self.compose(
                        std::slice::from_ref(img),
                        std::slice::from_ref(panel),
                        Layout::Individual,
                    )?;
                    Ok::<_, ComicError>(ComicArtifact {
                        filename: format!("panel_{}.png", i + 1),
                        image,
                    })
                })
                .collect(),
            _ => Ok(vec![ComicArtifact {
                filename: format!("comic_{}.png", layout.as_str()),
                image: self.compose(&images, &panels, layout)?,
            }]),
        }
    }

    /// Paints `images` with their dialogue bands onto a white canvas. The first image fixes the cell size.
    pub fn compose(
        &self,
        images: &[RgbaImage],
        panels: &[Panel],
        layout: Layout,
    ) -> ComicResult<RgbaImage> {
        let first = images
            .first()
            .ok_or_else(|| ComicError::composition("no images to composite"))?;
        let (cell_w, cell_h) = first.dimensions();
        let (cols, rows) = layout.grid();
        let (canvas_w, canvas_h) = canvas_size(cell_w, cell_h, cols, rows)?;
        let slots = (cols * rows) as usize;
        if images.len() > slots {
            return Err(ComicError::composition(format!(
                "{} images do not fit a {} layout",
                images.len(),
                layout
            )));
        }

        let mut canvas = RgbaImage::from_pixel(canvas_w, canvas_h, Rgba([255, 255, 255, 255]));
        let cell_total_h = cell_h + TEXT_BAND_HEIGHT;

        for (i, img) in images.iter().enumerate() {
            let (col, row) = layout.cell_origin(i as u32);
            let x = col * cell_w;
            let y = row * cell_total_h;

            if img.dimensions() == (cell_w, cell_h) {
                imageops::overlay(&mut canvas, img, x as i64, y as i64);
            } else {
                debug!(
                    "Resizing panel image {} from {:?} to {}x{}",
                    i,
                    img.dimensions(),
                    cell_w,
                    cell_h
                );
                let resized = imageops::resize(img, cell_w, cell_h, FilterType::Triangle);
                imageops::overlay(&mut canvas, &resized, x as i64, y as i64);
            }

            let dialogues = panels.get(i).map(|p| p.dialogues.as_slice()).unwrap_or(&[]);
            if !dialogues.is_empty() {
                let band = self.captions.render_band(cell_w, dialogues)?;
                imageops::overlay(&mut canvas, &band, x as i64, (y + cell_h) as i64);
            }
        }

        Ok(canvas)
    }
}

fn canvas_size(cell_w: u32, cell_h: u32, cols: u32, rows: u32) -> ComicResult<(u32, u32)> {
    let w = cell_w.checked_mul(cols);
    let h = cell_h
        .checked_add(TEXT_BAND_HEIGHT)
        .and_then(|total| total.checked_mul(rows));
    match (w, h) {
        (Some(w), Some(h)) if w > 0 && w <= MAX_CANVAS_SIDE && h <= MAX_CANVAS_SIDE => Ok((w, h)),
        _ => Err(ComicError::composition(format!(
            "canvas for {}x{} cells of {}x{} exceeds {} px",
            cols, rows, cell_w, cell_h, MAX_CANVAS_SIDE
        ))),
    }
}
