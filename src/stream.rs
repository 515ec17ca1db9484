// stream.rs
//
//! GIF89a bitstream serialization.
//!
//! Layout is fixed by the format: signature, logical screen
//! descriptor, optional global color table, optional Netscape loop
//! extension, then per frame a graphic control extension, image
//! descriptor, optional local color table and the LZW data packed
//! into sub-blocks of at most 255 bytes, ending with one trailer
//! byte.
use crate::block::{
    GraphicControl, ImageDesc, LogicalScreenDesc, NetscapeLoop,
};
use crate::lzw::Compressor;
use crate::quant::Palette;
use std::io::{self, BufWriter, Write};

/// Signature and version written for every file
const SIGNATURE: &[u8; 6] = b"GIF89a";

/// Extension introducer
const EXTENSION: u8 = 0x21;

/// Graphic control extension label
const GRAPHIC_CONTROL: u8 = 0xF9;

/// Application extension label
const APPLICATION: u8 = 0xFF;

/// Image separator
const IMAGE_SEPARATOR: u8 = 0x2C;

/// GIF trailer
const TRAILER: u8 = 0x3B;

/// Serializer for one GIF bitstream
pub(crate) struct GifStream<W: Write> {
    writer: BufWriter<W>,
    buffer: Vec<u8>,
}

impl<W: Write> GifStream<W> {
    pub fn new(writer: W) -> Self {
        GifStream {
            writer: BufWriter::new(writer),
            buffer: Vec::with_capacity(1 << 12),
        }
    }

    /// Write everything up to the first frame.
    pub fn preamble(
        &mut self,
        width: u16,
        height: u16,
        global: Option<&Palette>,
        loop_count: Option<u16>,
    ) -> io::Result<()> {
        self.writer.write_all(SIGNATURE)?;
        let desc = LogicalScreenDesc::default()
            .with_screen_width(width)
            .with_screen_height(height)
            .with_global_table(global.map(|p| p.table_size()));
        let mut buf = Vec::with_capacity(7);
        buf.push(desc.screen_width() as u8);
        buf.push((desc.screen_width() >> 8) as u8);
        buf.push(desc.screen_height() as u8);
        buf.push((desc.screen_height() >> 8) as u8);
        buf.push(desc.flags());
        buf.push(desc.background_color_idx());
        buf.push(0); // pixel aspect ratio
        self.writer.write_all(&buf)?;
        if let Some(palette) = global {
            self.writer.write_all(&palette.table_bytes())?;
        }
        if let Some(count) = loop_count {
            self.netscape_loop(&NetscapeLoop::new(count))?;
        }
        Ok(())
    }

    /// Write the Netscape application extension.
    fn netscape_loop(&mut self, ext: &NetscapeLoop) -> io::Result<()> {
        self.writer.write_all(&[EXTENSION, APPLICATION])?;
        let app_id = NetscapeLoop::APP_ID;
        self.writer.write_all(&[app_id.len() as u8])?;
        self.writer.write_all(app_id)?;
        let data = ext.data();
        self.writer.write_all(&[data.len() as u8])?;
        self.writer.write_all(&data)?;
        self.writer.write_all(&[0]) // block terminator
    }

    /// Write one complete frame.
    pub fn frame(
        &mut self,
        control: &GraphicControl,
        desc: &ImageDesc,
        local: Option<&Palette>,
        min_code_size: u8,
        indices: &[u8],
    ) -> io::Result<()> {
        self.graphic_control(control)?;
        self.image_desc(desc)?;
        if let Some(palette) = local {
            self.writer.write_all(&palette.table_bytes())?;
        }
        self.image_data(min_code_size, indices)
    }

    fn graphic_control(&mut self, control: &GraphicControl) -> io::Result<()> {
        let delay = control.delay_time_cs();
        self.writer.write_all(&[
            EXTENSION,
            GRAPHIC_CONTROL,
            4, // block size
            control.flags(),
            delay as u8,
            (delay >> 8) as u8,
            control.transparent_color_idx(),
            0, // block terminator
        ])
    }

    fn image_desc(&mut self, desc: &ImageDesc) -> io::Result<()> {
        let mut buf = Vec::with_capacity(10);
        buf.push(IMAGE_SEPARATOR);
        buf.push(desc.left() as u8);
        buf.push((desc.left() >> 8) as u8);
        buf.push(desc.top() as u8);
        buf.push((desc.top() >> 8) as u8);
        buf.push(desc.width() as u8);
        buf.push((desc.width() >> 8) as u8);
        buf.push(desc.height() as u8);
        buf.push((desc.height() >> 8) as u8);
        buf.push(desc.flags());
        self.writer.write_all(&buf)
    }

    /// Compress and write one frame's index stream.
    fn image_data(
        &mut self,
        min_code_size: u8,
        indices: &[u8],
    ) -> io::Result<()> {
        self.writer.write_all(&[min_code_size.max(2)])?;
        self.buffer.clear();
        let mut compressor = Compressor::new(min_code_size);
        compressor.compress(indices, &mut self.buffer);
        for chunk in self.buffer.chunks(0xFF) {
            self.writer.write_all(&[chunk.len() as u8])?;
            self.writer.write_all(chunk)?;
        }
        self.writer.write_all(&[0]) // end of sub-blocks
    }

    /// Write the trailer and flush.
    pub fn finish(mut self) -> io::Result<()> {
        self.writer.write_all(&[TRAILER])?;
        self.writer.flush()
    }
}
