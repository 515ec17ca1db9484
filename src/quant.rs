// quant.rs
//
//! Palette quantization: reduce frame colors to at most 256 entries.
//!
//! If the distinct colors across all frames fit one table, a single
//! global palette is built in first-appearance order.  Otherwise each
//! frame is reduced independently with median cut.  All arithmetic is
//! integer arithmetic; every tie breaks on a fixed rule (red before
//! green before blue, lower palette index first) so identical input
//! always yields identical output.
use crate::block::ColorTableSize;
use crate::error::{Error, Result};
use crate::frame::Frame;
use pix::rgb::{Rgb, SRgb8};
use std::collections::HashMap;

/// Maximum colors in a GIF color table
pub const MAX_COLORS: usize = 256;

/// Alpha threshold; anything below is treated as transparent
const OPAQUE_MIN: u8 = 128;

/// An ordered color table with an optional reserved transparency slot
pub struct Palette {
    colors: Vec<SRgb8>,
    transparent: Option<u8>,
}

impl Palette {
    pub(crate) fn new(colors: Vec<SRgb8>, transparent: Option<u8>) -> Self {
        debug_assert!(colors.len() <= MAX_COLORS);
        Palette { colors, transparent }
    }

    /// Get the number of colors, including the transparency slot.
    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn colors(&self) -> &[SRgb8] {
        &self.colors
    }

    /// Get the reserved transparent index, if any.
    pub fn transparent(&self) -> Option<u8> {
        self.transparent
    }

    pub(crate) fn table_size(&self) -> ColorTableSize {
        ColorTableSize::for_colors(self.colors.len())
    }

    /// Get the LZW minimum code size for this palette.
    pub(crate) fn min_code_size(&self) -> u8 {
        (self.table_size().bits() + 1).max(2)
    }

    /// Serialize as RGB triples, zero-padded to a power of two.
    pub(crate) fn table_bytes(&self) -> Vec<u8> {
        let size = self.table_size();
        let mut bytes = Vec::with_capacity(size.size_bytes());
        for color in &self.colors {
            bytes.push(u8::from(Rgb::red(*color)));
            bytes.push(u8::from(Rgb::green(*color)));
            bytes.push(u8::from(Rgb::blue(*color)));
        }
        bytes.resize(size.size_bytes(), 0);
        bytes
    }
}

/// A frame's pixels replaced by palette indices, one byte per pixel
pub struct IndexedFrame {
    indices: Vec<u8>,
    local: Option<Palette>,
}

impl IndexedFrame {
    pub fn indices(&self) -> &[u8] {
        &self.indices
    }

    /// Get the local palette, or `None` when the global one applies.
    pub fn local_palette(&self) -> Option<&Palette> {
        self.local.as_ref()
    }
}

/// Result of quantizing an encode job's frames
pub struct Quantized {
    pub(crate) global: Option<Palette>,
    pub(crate) frames: Vec<IndexedFrame>,
}

impl Quantized {
    /// Get the palette in effect for one frame.
    pub(crate) fn palette(&self, frame: usize) -> &Palette {
        match self.frames[frame].local {
            Some(ref local) => local,
            None => match self.global {
                Some(ref global) => global,
                None => unreachable!("frame with neither palette"),
            },
        }
    }
}

/// Quantize all frames of a job.
///
/// `key` designates a color to be mapped to the transparency slot.
pub(crate) fn quantize(
    frames: &[Frame],
    key: Option<SRgb8>,
) -> Result<Quantized> {
    let key = key.map(triple);
    // union of opaque colors, in first-appearance order
    let mut order = Vec::new();
    let mut seen = HashMap::new();
    let mut transparent_used = false;
    for frame in frames {
        for px in frame.rgba().chunks_exact(4) {
            let rgb = [px[0], px[1], px[2]];
            if px[3] < OPAQUE_MIN || Some(rgb) == key {
                transparent_used = true;
            } else if seen.insert(rgb, ()).is_none() {
                order.push(rgb);
            }
        }
    }
    let budget = MAX_COLORS - transparent_used as usize;
    if order.is_empty() && !transparent_used {
        return Err(Error::Quantization("no colors in input"));
    }
    if order.len() <= budget {
        global_exact(frames, key, order, transparent_used)
    } else {
        debug!(
            "{} distinct colors exceed global budget {}; using local \
             palettes",
            order.len(),
            budget
        );
        local_median_cut(frames, key, budget, transparent_used)
    }
}

/// Build one exact global palette shared by every frame.
fn global_exact(
    frames: &[Frame],
    key: Option<[u8; 3]>,
    order: Vec<[u8; 3]>,
    transparent_used: bool,
) -> Result<Quantized> {
    let mut colors = Vec::with_capacity(order.len() + 1);
    let transparent = if transparent_used {
        // reserved slot; the color itself is never displayed
        colors.push(SRgb8::new(0, 0, 0));
        Some(0)
    } else {
        None
    };
    let base = colors.len() as u8;
    let mut lookup = HashMap::with_capacity(order.len());
    for (i, rgb) in order.iter().enumerate() {
        colors.push(SRgb8::new(rgb[0], rgb[1], rgb[2]));
        lookup.insert(*rgb, base + i as u8);
    }
    let palette = Palette::new(colors, transparent);
    let indexed = frames
        .iter()
        .map(|frame| {
            let indices = index_exact(frame, key, &lookup, transparent);
            debug_assert!(indices
                .iter()
                .all(|&i| (i as usize) < palette.len()));
            IndexedFrame { indices, local: None }
        })
        .collect();
    Ok(Quantized { global: Some(palette), frames: indexed })
}

/// Index one frame against the exact global lookup table.
fn index_exact(
    frame: &Frame,
    key: Option<[u8; 3]>,
    lookup: &HashMap<[u8; 3], u8>,
    transparent: Option<u8>,
) -> Vec<u8> {
    frame
        .rgba()
        .chunks_exact(4)
        .map(|px| {
            let rgb = [px[0], px[1], px[2]];
            if px[3] < OPAQUE_MIN || Some(rgb) == key {
                transparent.unwrap_or(0)
            } else {
                lookup[&rgb]
            }
        })
        .collect()
}

/// Reduce each frame independently to a local palette.
fn local_median_cut(
    frames: &[Frame],
    key: Option<[u8; 3]>,
    budget: usize,
    transparent_used: bool,
) -> Result<Quantized> {
    let mut indexed = Vec::with_capacity(frames.len());
    for frame in frames {
        let hist = histogram(frame, key);
        if hist.is_empty() && !transparent_used {
            return Err(Error::Quantization("frame has no opaque colors"));
        }
        let reduced = median_cut(hist, budget);
        let mut colors = Vec::with_capacity(reduced.len() + 1);
        let transparent = if transparent_used {
            colors.push(SRgb8::new(0, 0, 0));
            Some(0)
        } else {
            None
        };
        colors.extend(
            reduced.iter().map(|c| SRgb8::new(c[0], c[1], c[2])),
        );
        let palette = Palette::new(colors, transparent);
        let indices = index_nearest(frame, key, &palette, &reduced);
        debug_assert!(indices.iter().all(|&i| (i as usize) < palette.len()));
        indexed.push(IndexedFrame { indices, local: Some(palette) });
    }
    Ok(Quantized { global: None, frames: indexed })
}

/// Count the distinct opaque colors of one frame, sorted by (r, g, b).
fn histogram(frame: &Frame, key: Option<[u8; 3]>) -> Vec<([u8; 3], u64)> {
    let mut counts = HashMap::new();
    for px in frame.rgba().chunks_exact(4) {
        let rgb = [px[0], px[1], px[2]];
        if px[3] >= OPAQUE_MIN && Some(rgb) != key {
            *counts.entry(rgb).or_insert(0u64) += 1;
        }
    }
    let mut hist: Vec<_> = counts.into_iter().collect();
    hist.sort_unstable_by_key(|&(rgb, _)| rgb);
    hist
}

/// Reduce a histogram to at most `budget` colors by median cut.
///
/// Boxes split on the channel with the widest range; range ties pick
/// red before green before blue, and the earliest box wins among
/// equally wide boxes.  Box colors are population-weighted channel
/// means, rounded to nearest (half away from zero).
fn median_cut(hist: Vec<([u8; 3], u64)>, budget: usize) -> Vec<[u8; 3]> {
    if hist.len() <= budget {
        return hist.into_iter().map(|(rgb, _)| rgb).collect();
    }
    let mut boxes = vec![hist];
    while boxes.len() < budget {
        let mut best: Option<(usize, usize, u8)> = None;
        for (i, entries) in boxes.iter().enumerate() {
            if entries.len() < 2 {
                continue;
            }
            let (chan, range) = widest_channel(entries);
            if best.map_or(true, |(_, _, r)| range > r) {
                best = Some((i, chan, range));
            }
        }
        let (i, chan) = match best {
            Some((i, chan, _)) => (i, chan),
            None => break,
        };
        let mut entries = std::mem::replace(&mut boxes[i], Vec::new());
        entries.sort_unstable_by_key(|&(rgb, _)| (rgb[chan], rgb));
        let upper = entries.split_off(split_point(&entries));
        boxes[i] = entries;
        boxes.push(upper);
    }
    boxes.iter().map(|entries| box_mean(entries)).collect()
}

/// Find the channel with the widest value range in a box.
fn widest_channel(entries: &[([u8; 3], u64)]) -> (usize, u8) {
    let mut lo = [u8::MAX; 3];
    let mut hi = [u8::MIN; 3];
    for (rgb, _) in entries {
        for chan in 0..3 {
            lo[chan] = lo[chan].min(rgb[chan]);
            hi[chan] = hi[chan].max(rgb[chan]);
        }
    }
    let ranges = [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]];
    // strict comparison: red wins over green wins over blue on ties
    let mut chan = 0;
    for c in 1..3 {
        if ranges[c] > ranges[chan] {
            chan = c;
        }
    }
    (chan, ranges[chan])
}

/// Find the weighted median split point of a sorted box.
fn split_point(entries: &[([u8; 3], u64)]) -> usize {
    let total: u64 = entries.iter().map(|&(_, n)| n).sum();
    let mut acc = 0;
    for (i, &(_, n)) in entries.iter().enumerate() {
        acc += n;
        if acc * 2 >= total {
            // keep both halves non-empty
            return (i + 1).min(entries.len() - 1).max(1);
        }
    }
    entries.len() - 1
}

/// Get the population-weighted mean color of a box.
fn box_mean(entries: &[([u8; 3], u64)]) -> [u8; 3] {
    let mut sums = [0u64; 3];
    let mut total = 0u64;
    for &(rgb, n) in entries {
        for chan in 0..3 {
            sums[chan] += u64::from(rgb[chan]) * n;
        }
        total += n;
    }
    debug_assert!(total > 0);
    let mut mean = [0u8; 3];
    for chan in 0..3 {
        mean[chan] = ((sums[chan] + total / 2) / total) as u8;
    }
    mean
}

/// Index one frame against a reduced palette by nearest color.
fn index_nearest(
    frame: &Frame,
    key: Option<[u8; 3]>,
    palette: &Palette,
    reduced: &[[u8; 3]],
) -> Vec<u8> {
    let base = palette.transparent().map_or(0, |t| t + 1);
    let mut cache: HashMap<[u8; 3], u8> = HashMap::new();
    frame
        .rgba()
        .chunks_exact(4)
        .map(|px| {
            let rgb = [px[0], px[1], px[2]];
            if px[3] < OPAQUE_MIN || Some(rgb) == key {
                return palette.transparent().unwrap_or(0);
            }
            *cache
                .entry(rgb)
                .or_insert_with(|| base + nearest(reduced, rgb))
        })
        .collect()
}

/// Find the nearest palette entry by squared channel distance.
///
/// Distance ties resolve to the lowest index.
fn nearest(colors: &[[u8; 3]], rgb: [u8; 3]) -> u8 {
    let mut best = 0;
    let mut best_dist = u32::MAX;
    for (i, c) in colors.iter().enumerate() {
        let dist = dist_sq(*c, rgb);
        if dist < best_dist {
            best = i;
            best_dist = dist;
        }
    }
    best as u8
}

/// Sum of squared channel differences.
fn dist_sq(a: [u8; 3], b: [u8; 3]) -> u32 {
    (0..3)
        .map(|c| {
            let d = i32::from(a[c]) - i32::from(b[c]);
            (d * d) as u32
        })
        .sum()
}

/// Convert a palette color to raw channel bytes.
fn triple(color: SRgb8) -> [u8; 3] {
    [
        u8::from(Rgb::red(color)),
        u8::from(Rgb::green(color)),
        u8::from(Rgb::blue(color)),
    ]
}
