// lzw.rs
//
//! Lempel-Ziv-Welch compression, GIF variant.
//!
//! The GIF flavor of LZW starts one bit wider than the palette depth,
//! reserves a clear code and an end-of-information code at the top of
//! the initial table, grows the code width as soon as the next free
//! code no longer fits the current width, and resets the dictionary
//! with a clear code once all 4096 codes are taken.

/// Maximum code width allowed for GIF
const MAX_BITS: u8 = 12;

/// Total dictionary entries at maximum width
const TABLE_SIZE: usize = 1 << MAX_BITS;

/// LZW compressor for one or more index streams
///
/// The dictionary is a table of strings addressed by code.  Each code
/// links to the first code extending it (`child`), the next code
/// sharing its parent (`sibling`), and the byte it appends (`suffix`).
pub struct Compressor {
    /// Minimum code size (palette bit depth, 2 to 8)
    min_code_size: u8,
    /// First extension of each code
    child: Vec<u16>,
    /// Next code sharing the same parent
    sibling: Vec<u16>,
    /// Byte appended by each code
    suffix: Vec<u8>,
    /// Next free dictionary code
    next_code: u16,
    /// Current code width in bits
    code_bits: u8,
    /// Bit accumulator, packed LSB first
    acc: u32,
    /// Number of bits held in the accumulator
    n_bits: u8,
}

impl Compressor {
    /// Create a new compressor.
    ///
    /// `min_code_size` is clamped to the 2 to 8 range required by the
    /// container format.
    pub fn new(min_code_size: u8) -> Self {
        let min_code_size = min_code_size.max(2).min(8);
        let mut comp = Compressor {
            min_code_size,
            child: vec![0; TABLE_SIZE],
            sibling: vec![0; TABLE_SIZE],
            suffix: vec![0; TABLE_SIZE],
            next_code: 0,
            code_bits: 0,
            acc: 0,
            n_bits: 0,
        };
        comp.reset_dict();
        comp
    }

    /// Get the clear code.
    fn clear_code(&self) -> u16 {
        1 << self.min_code_size
    }

    /// Get the end-of-information code.
    fn end_code(&self) -> u16 {
        self.clear_code() + 1
    }

    /// Rebuild the fixed initial dictionary.
    fn reset_dict(&mut self) {
        for link in &mut self.child {
            *link = 0;
        }
        for link in &mut self.sibling {
            *link = 0;
        }
        self.next_code = self.end_code() + 1;
        self.code_bits = self.min_code_size + 1;
    }

    /// Pack one code into the output buffer, LSB first.
    fn pack(&mut self, code: u16, out: &mut Vec<u8>) {
        self.acc |= u32::from(code) << self.n_bits;
        self.n_bits += self.code_bits;
        while self.n_bits >= 8 {
            out.push(self.acc as u8);
            self.acc >>= 8;
            self.n_bits -= 8;
        }
    }

    /// Flush any partial byte left in the accumulator.
    fn flush(&mut self, out: &mut Vec<u8>) {
        if self.n_bits > 0 {
            out.push(self.acc as u8);
        }
        self.acc = 0;
        self.n_bits = 0;
    }

    /// Find the code for `parent` extended by `byte`.
    fn find(&self, parent: u16, byte: u8) -> Option<u16> {
        let mut code = self.child[parent as usize];
        while code != 0 {
            if self.suffix[code as usize] == byte {
                return Some(code);
            }
            code = self.sibling[code as usize];
        }
        None
    }

    /// Insert a new code for `parent` extended by `byte`.
    fn insert(&mut self, parent: u16, byte: u8) {
        let code = self.next_code;
        self.suffix[code as usize] = byte;
        let mut link = self.child[parent as usize];
        if link == 0 {
            self.child[parent as usize] = code;
        } else {
            while self.sibling[link as usize] != 0 {
                link = self.sibling[link as usize];
            }
            self.sibling[link as usize] = code;
        }
        self.next_code += 1;
        // grow early: the next free code must fit the current width
        if self.next_code > (1u16 << self.code_bits)
            && self.code_bits < MAX_BITS
        {
            self.code_bits += 1;
        }
    }

    /// Compress an index stream into `out`.
    ///
    /// The dictionary and bit accumulator are rebuilt on every call, so
    /// one compressor may be reused across frames; identical input
    /// always produces identical output.
    pub fn compress(&mut self, bytes: &[u8], out: &mut Vec<u8>) {
        self.acc = 0;
        self.n_bits = 0;
        self.reset_dict();
        let clear = self.clear_code();
        self.pack(clear, out);
        let mut iter = bytes.iter();
        let mut parent = match iter.next() {
            Some(&byte) => u16::from(byte),
            None => {
                let end = self.end_code();
                self.pack(end, out);
                self.flush(out);
                return;
            }
        };
        for &byte in iter {
            match self.find(parent, byte) {
                Some(code) => parent = code,
                None => {
                    self.pack(parent, out);
                    if (self.next_code as usize) < TABLE_SIZE {
                        self.insert(parent, byte);
                    } else {
                        self.pack(clear, out);
                        self.reset_dict();
                    }
                    parent = u16::from(byte);
                }
            }
        }
        self.pack(parent, out);
        let end = self.end_code();
        self.pack(end, out);
        self.flush(out);
    }
}

/// Decompress a GIF LZW stream (round-trip verification only).
#[cfg(test)]
pub(crate) fn decompress(min_code_size: u8, bytes: &[u8]) -> Vec<u8> {
    let min_code_size = min_code_size.max(2).min(8);
    let clear = 1u16 << min_code_size;
    let end = clear + 1;
    let mut prefix = vec![0u16; TABLE_SIZE];
    let mut suffix = vec![0u8; TABLE_SIZE];
    let mut next = end + 1;
    let mut width = min_code_size + 1;
    let mut acc: u32 = 0;
    let mut n_bits: u8 = 0;
    let mut prev: Option<u16> = None;
    let mut out = Vec::new();
    let mut input = bytes.iter();
    loop {
        while n_bits < width {
            match input.next() {
                Some(&byte) => {
                    acc |= u32::from(byte) << n_bits;
                    n_bits += 8;
                }
                None => return out,
            }
        }
        let code = (acc & ((1u32 << width) - 1)) as u16;
        acc >>= width;
        n_bits -= width;
        if code == clear {
            next = end + 1;
            width = min_code_size + 1;
            prev = None;
            continue;
        }
        if code == end {
            return out;
        }
        let start = out.len();
        if code < next {
            expand(code, clear, &prefix, &suffix, &mut out);
        } else {
            assert_eq!(code, next, "corrupt lzw stream");
            let prev = prev.expect("corrupt lzw stream");
            expand(prev, clear, &prefix, &suffix, &mut out);
            let first = out[start];
            out.push(first);
        }
        if let Some(prev) = prev {
            if (next as usize) < TABLE_SIZE {
                prefix[next as usize] = prev;
                suffix[next as usize] = out[start];
                next += 1;
                if next == (1u16 << width) && width < MAX_BITS {
                    width += 1;
                }
            }
        }
        prev = Some(code);
    }
}

/// Append the string for one code to the output buffer.
#[cfg(test)]
fn expand(
    code: u16,
    clear: u16,
    prefix: &[u16],
    suffix: &[u8],
    out: &mut Vec<u8>,
) {
    let start = out.len();
    let mut code = code;
    while code > clear {
        out.push(suffix[code as usize]);
        code = prefix[code as usize];
    }
    out.push(code as u8);
    out[start..].reverse();
}
