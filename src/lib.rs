// lib.rs      flipbook crate.
//
//! Assemble ordered sequences of still images into animated GIF files.
//!
//! The pipeline has four stages, driven by an [encode job]:
//!
//! 1. The frame assembler decodes each source in caller order and
//!    normalizes it to a common canvas.
//! 2. The palette quantizer reduces frame colors to a global or
//!    per-frame palette of at most 256 entries.
//! 3. The LZW encoder compresses each indexed frame.
//! 4. The stream writer serializes the GIF89a bitstream to a
//!    temporary file, promoted to the destination only on success.
//!
//! ## Example: three frames into a looping GIF
//! ```no_run
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! use flipbook::{EncodeOptions, Flipbook, SourceFrame};
//!
//! let sources = vec![
//!     SourceFrame::from_path("a.png"),
//!     SourceFrame::from_path("b.png"),
//!     SourceFrame::from_path("c.png"),
//! ];
//! let options = EncodeOptions::default()
//!     .with_loop_count(0)
//!     .with_delay_cs(10);
//! let job = Flipbook::new().encode(sources, "out.gif", options)?;
//! let path = job.wait()?;
//! # let _ = path;
//! # Ok(())
//! # }
//! ```
//!
//! [encode job]: struct.Flipbook.html#method.encode
#[macro_use]
extern crate log;

pub mod block;
mod error;
mod frame;
mod job;
pub mod lzw;
mod quant;
mod stream;

pub use crate::error::{Error, Result};
pub use crate::frame::{Frame, Source, SourceFrame};
pub use crate::job::{EncodeOptions, Flipbook, JobHandle};
