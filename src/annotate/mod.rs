//! Snapshot annotation.
//!
//! Draws a box around each target prediction at or above the confidence
//! threshold and writes the result to `{dir}/{entity}_latest_{target}.jpg`.
//! Each qualifying frame replaces the previous snapshot for the same
//! entity and target; no history is kept.

use ab_glyph::{FontRef, FontVec, PxScale};
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_hollow_rect_mut, draw_text_mut};
use imageproc::rect::Rect;
use std::fs::{self, File};
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

use crate::detect::Prediction;
use crate::HIGHLIGHT_COLOR;

/// Box outline thickness in pixels.
pub const LINE_WIDTH: u32 = 5;
const FONT_SCALE: f32 = 16.0;

static FONT_BYTES: &[u8] = include_bytes!("../../fonts/DejaVuSansMono.ttf");

enum LabelFont {
    Embedded(FontRef<'static>),
    Custom(FontVec),
}

pub struct Annotator {
    directory: PathBuf,
    confidence: f64,
    color: Rgb<u8>,
    font: LabelFont,
}

impl Annotator {
    /// Create an annotator writing into `directory`.
    ///
    /// Labels use the bundled DejaVu Sans Mono unless `label_font` names a
    /// TrueType/OpenType file. Fails when the directory is missing or not
    /// writable, or when the font cannot be parsed.
    pub fn new(directory: &Path, confidence: f64, label_font: Option<&Path>) -> Result<Self> {
        ensure_writable_dir(directory)?;
        let font = match label_font {
            Some(path) => LabelFont::Custom(load_font(path)?),
            None => LabelFont::Embedded(
                FontRef::try_from_slice(FONT_BYTES)
                    .map_err(|e| anyhow!("invalid bundled label font: {}", e))?,
            ),
        };
        Ok(Self {
            directory: directory.to_path_buf(),
            confidence,
            color: Rgb(HIGHLIGHT_COLOR),
            font,
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn latest_path(&self, entity_name: &str, target: &str) -> PathBuf {
        self.directory
            .join(format!("{}_latest_{}.jpg", entity_name, target))
    }

    /// Draw qualifying predictions onto an RGB copy of `image`.
    ///
    /// Returns the annotated copy and how many boxes were drawn. Boxes that
    /// fall outside the frame or have no area are skipped.
    pub fn draw(
        &self,
        image: &DynamicImage,
        predictions: &[Prediction],
        target: &str,
    ) -> (RgbImage, usize) {
        let mut canvas = image.to_rgb8();
        let (width, height) = canvas.dimensions();
        let mut drawn = 0;

        for prediction in predictions {
            let confidence = prediction.confidence();
            if prediction.name != target || confidence < self.confidence {
                continue;
            }
            let Some((left, top, right, bottom)) = prediction.bbox.to_pixels(width, height) else {
                log::debug!("skipping unusable box {:?}", prediction.bbox);
                continue;
            };
            draw_thick_rect(&mut canvas, left, top, right, bottom, self.color);

            let text = format!("{:.1}", confidence);
            let text_x = (left + f64::from(LINE_WIDTH)) as i32;
            let text_y = (top - f64::from(LINE_WIDTH)).abs() as i32;
            self.draw_label(&mut canvas, text_x, text_y, &text);
            drawn += 1;
        }

        (canvas, drawn)
    }

    /// Render and persist the latest snapshot for `entity_name`.
    pub fn save_latest(
        &self,
        image: &DynamicImage,
        predictions: &[Prediction],
        target: &str,
        entity_name: &str,
    ) -> Result<PathBuf> {
        let (canvas, drawn) = self.draw(image, predictions, target);
        let path = self.latest_path(entity_name, target);

        let mut encoded = Vec::new();
        DynamicImage::ImageRgb8(canvas)
            .write_to(&mut Cursor::new(&mut encoded), ImageFormat::Jpeg)
            .context("encode annotated snapshot")?;
        write_atomic(&path, &encoded)
            .with_context(|| format!("write snapshot {}", path.display()))?;

        log::info!("saved {} ({} boxes drawn)", path.display(), drawn);
        Ok(path)
    }

    fn draw_label(&self, canvas: &mut RgbImage, x: i32, y: i32, text: &str) {
        let scale = PxScale::from(FONT_SCALE);
        match &self.font {
            LabelFont::Embedded(font) => draw_text_mut(canvas, self.color, x, y, scale, font, text),
            LabelFont::Custom(font) => draw_text_mut(canvas, self.color, x, y, scale, font, text),
        }
    }
}

/// Outline centred on the box edges, `LINE_WIDTH` pixels thick.
///
/// Edges must already be clamped to the canvas.
fn draw_thick_rect(
    canvas: &mut RgbImage,
    left: f64,
    top: f64,
    right: f64,
    bottom: f64,
    color: Rgb<u8>,
) {
    let half = (LINE_WIDTH / 2) as i32;
    let (left, top) = (left.round() as i32, top.round() as i32);
    let (right, bottom) = (right.round() as i32, bottom.round() as i32);
    for offset in -half..=half {
        let x = left - offset;
        let y = top - offset;
        let w = (right - left + 2 * offset).max(1) as u32;
        let h = (bottom - top + 2 * offset).max(1) as u32;
        draw_hollow_rect_mut(canvas, Rect::at(x, y).of_size(w, h), color);
    }
}

fn load_font(path: &Path) -> Result<FontVec> {
    let bytes =
        fs::read(path).with_context(|| format!("read label font {}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|e| anyhow!("invalid label font {}: {}", path.display(), e))
}

/// Check that `dir` exists, is a directory and accepts new files.
pub fn ensure_writable_dir(dir: &Path) -> Result<()> {
    let meta = fs::metadata(dir)
        .with_context(|| format!("save_file_folder {} does not exist", dir.display()))?;
    if !meta.is_dir() {
        return Err(anyhow!("save_file_folder {} is not a directory", dir.display()));
    }
    tempfile::Builder::new()
        .prefix(".tflite_detect_check")
        .tempfile_in(dir)
        .with_context(|| format!("save_file_folder {} is not writable", dir.display()))?;
    Ok(())
}

/// Replace `path` with `data` through a sibling `.tmp` file.
///
/// The temporary file is removed if writing or renaming fails.
fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let written = File::create(&tmp_path)
        .and_then(|mut file| {
            file.write_all(data)?;
            file.sync_all()
        })
        .and_then(|()| fs::rename(&tmp_path, path));
    if let Err(err) = written {
        if let Err(cleanup) = fs::remove_file(&tmp_path) {
            if cleanup.kind() != std::io::ErrorKind::NotFound {
                log::warn!("could not remove {}: {}", tmp_path.display(), cleanup);
            }
        }
        return Err(err.into());
    }
    Ok(())
}
