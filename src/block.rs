// block.rs
//
//! GIF89a block types used on the encode side.
//!
//! Byte layouts are fixed by the GIF89a specification; these types
//! only hold the typed fields and pack the flag bytes.

/// How the canvas is treated before rendering the next frame
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum DisposalMethod {
    /// No disposal specified
    NoAction,
    /// Leave the frame in place
    Keep,
    /// Restore to background color
    Background,
    /// Restore to previous frame
    Previous,
}

impl Default for DisposalMethod {
    fn default() -> Self {
        DisposalMethod::Keep
    }
}

impl From<DisposalMethod> for u8 {
    fn from(d: DisposalMethod) -> Self {
        use self::DisposalMethod::*;
        match d {
            NoAction => 0,
            Keep => 1,
            Background => 2,
            Previous => 3,
        }
    }
}

/// Size field for a global or local color table.
///
/// A GIF color table always holds a power of two entries, between 2
/// and 256; the descriptor flags carry `bits`, where the table length
/// is `2 << bits`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ColorTableSize {
    bits: u8,
}

impl ColorTableSize {
    /// Get the smallest table size holding `colors` entries.
    pub fn for_colors(colors: usize) -> Self {
        let mut bits = 0;
        while (2 << bits) < colors && bits < 7 {
            bits += 1;
        }
        ColorTableSize { bits }
    }

    /// Get the size bits for descriptor flags.
    pub fn bits(self) -> u8 {
        self.bits
    }

    /// Get the number of table entries.
    pub fn entries(self) -> usize {
        2 << self.bits
    }

    /// Get the table length in bytes (RGB triples).
    pub fn size_bytes(self) -> usize {
        self.entries() * 3
    }
}

/// Logical screen descriptor
#[derive(Debug, Default)]
pub struct LogicalScreenDesc {
    screen_width: u16,
    screen_height: u16,
    global_table: Option<ColorTableSize>,
    background_color_idx: u8,
}

impl LogicalScreenDesc {
    const COLOR_TABLE_PRESENT: u8 = 0b1000_0000;
    const COLOR_RESOLUTION: u8 = 0b0111_0000;
    const COLOR_TABLE_SIZE: u8 = 0b0000_0111;

    pub fn with_screen_width(mut self, screen_width: u16) -> Self {
        self.screen_width = screen_width;
        self
    }

    pub fn screen_width(&self) -> u16 {
        self.screen_width
    }

    pub fn with_screen_height(mut self, screen_height: u16) -> Self {
        self.screen_height = screen_height;
        self
    }

    pub fn screen_height(&self) -> u16 {
        self.screen_height
    }

    pub fn with_global_table(mut self, size: Option<ColorTableSize>) -> Self {
        self.global_table = size;
        self
    }

    pub fn with_background_color_idx(mut self, idx: u8) -> Self {
        self.background_color_idx = idx;
        self
    }

    pub fn background_color_idx(&self) -> u8 {
        self.background_color_idx
    }

    /// Pack the flag byte: table presence, color resolution, size bits.
    pub fn flags(&self) -> u8 {
        match self.global_table {
            Some(size) => {
                let bits = size.bits() & Self::COLOR_TABLE_SIZE;
                Self::COLOR_TABLE_PRESENT
                    | ((bits << 4) & Self::COLOR_RESOLUTION)
                    | bits
            }
            None => 0,
        }
    }
}

/// Graphic control extension, written before each image descriptor
#[derive(Debug, Default)]
pub struct GraphicControl {
    disposal_method: DisposalMethod,
    delay_time_cs: u16,
    transparent_color: Option<u8>,
}

impl GraphicControl {
    const DISPOSAL_METHOD: u8 = 0b0001_1100;
    const TRANSPARENT_COLOR: u8 = 0b0000_0001;

    pub fn with_disposal_method(mut self, disposal: DisposalMethod) -> Self {
        self.disposal_method = disposal;
        self
    }

    pub fn disposal_method(&self) -> DisposalMethod {
        self.disposal_method
    }

    pub fn with_delay_time_cs(mut self, delay_time_cs: u16) -> Self {
        self.delay_time_cs = delay_time_cs;
        self
    }

    pub fn delay_time_cs(&self) -> u16 {
        self.delay_time_cs
    }

    pub fn with_transparent_color(mut self, idx: Option<u8>) -> Self {
        self.transparent_color = idx;
        self
    }

    pub fn transparent_color(&self) -> Option<u8> {
        self.transparent_color
    }

    pub fn transparent_color_idx(&self) -> u8 {
        self.transparent_color.unwrap_or(0)
    }

    /// Pack the flag byte: disposal method and transparency flag.
    pub fn flags(&self) -> u8 {
        let disposal = u8::from(self.disposal_method) << 2;
        let transparent = self.transparent_color.is_some() as u8;
        (disposal & Self::DISPOSAL_METHOD)
            | (transparent & Self::TRANSPARENT_COLOR)
    }
}

/// Image descriptor, one per frame
#[derive(Debug, Default)]
pub struct ImageDesc {
    left: u16,
    top: u16,
    width: u16,
    height: u16,
    local_table: Option<ColorTableSize>,
}

impl ImageDesc {
    const COLOR_TABLE_PRESENT: u8 = 0b1000_0000;
    const COLOR_TABLE_SIZE: u8 = 0b0000_0111;

    pub fn with_left(mut self, left: u16) -> Self {
        self.left = left;
        self
    }

    pub fn left(&self) -> u16 {
        self.left
    }

    pub fn with_top(mut self, top: u16) -> Self {
        self.top = top;
        self
    }

    pub fn top(&self) -> u16 {
        self.top
    }

    pub fn with_width(mut self, width: u16) -> Self {
        self.width = width;
        self
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn with_height(mut self, height: u16) -> Self {
        self.height = height;
        self
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn with_local_table(mut self, size: Option<ColorTableSize>) -> Self {
        self.local_table = size;
        self
    }

    /// Pack the flag byte: local table presence and size bits.
    pub fn flags(&self) -> u8 {
        match self.local_table {
            Some(size) => {
                Self::COLOR_TABLE_PRESENT
                    | (size.bits() & Self::COLOR_TABLE_SIZE)
            }
            None => 0,
        }
    }
}

/// Netscape application extension carrying the animation loop count
#[derive(Debug, Default)]
pub struct NetscapeLoop {
    loop_count: u16,
}

impl NetscapeLoop {
    /// Application identifier / authentication code sub-block.
    pub const APP_ID: &'static [u8; 11] = b"NETSCAPE2.0";

    /// Create a loop extension; zero means loop forever.
    pub fn new(loop_count: u16) -> Self {
        NetscapeLoop { loop_count }
    }

    /// Get the loop count (zero means loop forever).
    pub fn loop_count(&self) -> u16 {
        self.loop_count
    }

    /// Get the data sub-block: sub-block ID plus count, little-endian.
    pub fn data(&self) -> [u8; 3] {
        [1, self.loop_count as u8, (self.loop_count >> 8) as u8]
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn color_table_sizes() {
        let t = ColorTableSize::for_colors(0);
        assert_eq!((t.bits(), t.entries()), (0, 2));
        let t = ColorTableSize::for_colors(2);
        assert_eq!((t.bits(), t.entries()), (0, 2));
        let t = ColorTableSize::for_colors(3);
        assert_eq!((t.bits(), t.entries()), (1, 4));
        let t = ColorTableSize::for_colors(7);
        assert_eq!((t.bits(), t.entries()), (2, 8));
        let t = ColorTableSize::for_colors(16);
        assert_eq!((t.bits(), t.entries()), (3, 16));
        let t = ColorTableSize::for_colors(17);
        assert_eq!((t.bits(), t.entries()), (4, 32));
        let t = ColorTableSize::for_colors(130);
        assert_eq!((t.bits(), t.entries()), (7, 256));
        let t = ColorTableSize::for_colors(256);
        assert_eq!((t.bits(), t.size_bytes()), (7, 768));
    }

    #[test]
    fn screen_desc_flags() {
        let d = LogicalScreenDesc::default()
            .with_screen_width(4)
            .with_screen_height(4);
        assert_eq!(d.flags(), 0);
        let d = d.with_global_table(Some(ColorTableSize::for_colors(256)));
        assert_eq!(d.flags(), 0b1111_0111);
        let d = LogicalScreenDesc::default()
            .with_global_table(Some(ColorTableSize::for_colors(4)));
        assert_eq!(d.flags(), 0b1001_0001);
    }

    #[test]
    fn graphic_control_flags() {
        let g = GraphicControl::default();
        assert_eq!(g.flags(), 0b0000_0100);
        let g = GraphicControl::default()
            .with_disposal_method(DisposalMethod::Background)
            .with_transparent_color(Some(0));
        assert_eq!(g.flags(), 0b0000_1001);
        assert_eq!(g.transparent_color_idx(), 0);
        let g = GraphicControl::default()
            .with_disposal_method(DisposalMethod::NoAction);
        assert_eq!(g.flags(), 0);
    }

    #[test]
    fn image_desc_flags() {
        let d = ImageDesc::default().with_width(8).with_height(8);
        assert_eq!(d.flags(), 0);
        let d = d.with_local_table(Some(ColorTableSize::for_colors(64)));
        assert_eq!(d.flags(), 0b1000_0101);
    }

    #[test]
    fn netscape_loop_data() {
        assert_eq!(NetscapeLoop::new(0).data(), [1, 0, 0]);
        assert_eq!(NetscapeLoop::new(4).data(), [1, 4, 0]);
        assert_eq!(NetscapeLoop::new(0x0102).data(), [1, 2, 1]);
        assert_eq!(NetscapeLoop::new(4).loop_count(), 4);
    }
}
