// frame.rs
//
//! Frame sources and assembly.
//!
//! The assembler turns an ordered list of [SourceFrame]s into an
//! ordered list of [Frame]s sharing one canvas.  Ordering is exactly
//! the caller's ordering; it determines animation order.
use crate::block::DisposalMethod;
use crate::error::{Error, Result};
use image::imageops::{self, FilterType};
use image::RgbaImage;
use pix::rgb::SRgba8;
use pix::Raster;
use std::fs;
use std::path::PathBuf;

/// Largest canvas dimension the GIF format can describe
const MAX_DIMENSION: u32 = u16::MAX as u32;

/// Where the pixels of one frame come from
pub enum Source {
    /// An image file (PNG or JPEG), decoded during assembly
    Path(PathBuf),
    /// An already-decoded RGBA image
    Image(RgbaImage),
}

/// One entry in the ordered input sequence of an encode job
pub struct SourceFrame {
    source: Source,
    delay_cs: Option<u16>,
    disposal: Option<DisposalMethod>,
}

impl SourceFrame {
    /// Create a source frame from an image file path.
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        SourceFrame {
            source: Source::Path(path.into()),
            delay_cs: None,
            disposal: None,
        }
    }

    /// Create a source frame from a decoded RGBA image.
    pub fn from_image(image: RgbaImage) -> Self {
        SourceFrame {
            source: Source::Image(image),
            delay_cs: None,
            disposal: None,
        }
    }

    /// Override the job-wide display delay for this frame.
    pub fn with_delay_cs(mut self, delay_cs: u16) -> Self {
        self.delay_cs = Some(delay_cs);
        self
    }

    /// Override the job-wide disposal method for this frame.
    pub fn with_disposal(mut self, disposal: DisposalMethod) -> Self {
        self.disposal = Some(disposal);
        self
    }
}

/// A decoded frame, normalized to the job canvas
///
/// Immutable once assembled; owned exclusively by its encode job.
pub struct Frame {
    raster: Raster<SRgba8>,
    delay_cs: u16,
    disposal: DisposalMethod,
}

impl Frame {
    pub fn width(&self) -> u32 {
        self.raster.width()
    }

    pub fn height(&self) -> u32 {
        self.raster.height()
    }

    /// Get the display delay in centiseconds.
    pub fn delay_cs(&self) -> u16 {
        self.delay_cs
    }

    pub fn disposal(&self) -> DisposalMethod {
        self.disposal
    }

    /// Get the pixel buffer as RGBA bytes, row-major.
    pub(crate) fn rgba(&self) -> &[u8] {
        self.raster.as_u8_slice()
    }
}

/// Assemble sources into frames on a common canvas.
///
/// The canvas is `canvas` when given, otherwise the maximum width and
/// height across all decoded sources.  Returns the canvas and frames;
/// frame order is source order.
pub(crate) fn assemble(
    sources: Vec<SourceFrame>,
    canvas: Option<(u16, u16)>,
    delay_cs: u16,
    disposal: DisposalMethod,
) -> Result<(u16, u16, Vec<Frame>)> {
    if sources.is_empty() {
        return Err(Error::EmptyInput);
    }
    let mut decoded = Vec::with_capacity(sources.len());
    for source_frame in sources {
        let image = match source_frame.source {
            Source::Path(path) => decode_path(path)?,
            Source::Image(image) => image,
        };
        decoded.push((image, source_frame.delay_cs, source_frame.disposal));
    }
    let (width, height) = match canvas {
        Some((w, h)) => (u32::from(w), u32::from(h)),
        None => decoded.iter().fold((0, 0), |(w, h), (img, _, _)| {
            (w.max(img.width()), h.max(img.height()))
        }),
    };
    if width == 0
        || height == 0
        || width > MAX_DIMENSION
        || height > MAX_DIMENSION
    {
        return Err(Error::UnsupportedDimensions(width, height));
    }
    let frames = decoded
        .into_iter()
        .map(|(image, delay, disp)| Frame {
            raster: normalize(image, width, height),
            delay_cs: delay.unwrap_or(delay_cs),
            disposal: disp.unwrap_or(disposal),
        })
        .collect();
    Ok((width as u16, height as u16, frames))
}

/// Read and decode one source file, retrying a failed read once.
fn decode_path(path: PathBuf) -> Result<RgbaImage> {
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!("retrying source read {}: {}", path.display(), err);
            fs::read(&path).map_err(|_| Error::SourceRead(path.clone()))?
        }
    };
    let image = image::load_from_memory(&bytes)
        .map_err(|_| Error::SourceRead(path))?;
    Ok(image.into_rgba8())
}

/// Fit one decoded image onto the canvas.
///
/// Oversized images are scaled to the canvas exactly; smaller images
/// are centered on an opaque black background.
fn normalize(image: RgbaImage, width: u32, height: u32) -> Raster<SRgba8> {
    let image = if image.width() > width || image.height() > height {
        imageops::resize(&image, width, height, FilterType::Triangle)
    } else {
        image
    };
    if image.width() == width && image.height() == height {
        return Raster::with_u8_buffer(width, height, image.into_raw());
    }
    let left = (width - image.width()) / 2;
    let top = (height - image.height()) / 2;
    let mut buffer = vec![0u8; width as usize * height as usize * 4];
    // opaque black background
    for pixel in buffer.chunks_exact_mut(4) {
        pixel[3] = 0xFF;
    }
    let row_bytes = image.width() as usize * 4;
    let raw = image.as_raw();
    for row in 0..image.height() as usize {
        let src = row * row_bytes;
        let dst = ((top as usize + row) * width as usize + left as usize) * 4;
        buffer[dst..dst + row_bytes]
            .copy_from_slice(&raw[src..src + row_bytes]);
    }
    Raster::with_u8_buffer(width, height, buffer)
}
