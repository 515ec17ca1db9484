// job.rs
//
//! Encode job orchestration.
//!
//! A [Flipbook] owns the registry of active destinations and spawns
//! one worker thread per encode job.  The worker drives the pipeline
//! stages in order, writes to a `.part` file next to the destination
//! and promotes it only after a successful flush, so a failed or
//! cancelled job never leaves a partial file at the destination.
use crate::block::{DisposalMethod, GraphicControl, ImageDesc};
use crate::error::{Error, Result};
use crate::frame::{self, Frame, SourceFrame};
use crate::quant::{self, Quantized};
use crate::stream::GifStream;
use pix::rgb::SRgb8;
use std::collections::HashSet;
use std::ffi::OsString;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;

/// Completion listener, invoked exactly once per job
type Listener = Box<dyn FnOnce(&Result<PathBuf>) + Send + 'static>;

/// Pipeline stage of one encode job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    Assembling,
    Quantizing,
    Encoding,
    Writing,
    Completed,
    Failed,
}

/// Options for one encode job
pub struct EncodeOptions {
    loop_count: Option<u16>,
    delay_cs: u16,
    canvas: Option<(u16, u16)>,
    disposal: DisposalMethod,
    transparent: Option<SRgb8>,
    listener: Option<Listener>,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        EncodeOptions {
            loop_count: None,
            delay_cs: 10,
            canvas: None,
            disposal: DisposalMethod::default(),
            transparent: None,
            listener: None,
        }
    }
}

impl EncodeOptions {
    /// Set the animation loop count; zero means loop forever.
    ///
    /// Without a loop count no Netscape extension is written and the
    /// animation plays once.
    pub fn with_loop_count(mut self, loop_count: u16) -> Self {
        self.loop_count = Some(loop_count);
        self
    }

    /// Set the default display delay in centiseconds.
    pub fn with_delay_cs(mut self, delay_cs: u16) -> Self {
        self.delay_cs = delay_cs;
        self
    }

    /// Fix the canvas size instead of deriving it from the sources.
    pub fn with_canvas(mut self, width: u16, height: u16) -> Self {
        self.canvas = Some((width, height));
        self
    }

    /// Set the default disposal method for all frames.
    pub fn with_disposal(mut self, disposal: DisposalMethod) -> Self {
        self.disposal = disposal;
        self
    }

    /// Designate a color to become fully transparent.
    pub fn with_transparent(mut self, color: SRgb8) -> Self {
        self.transparent = Some(color);
        self
    }

    /// Attach a completion listener.
    ///
    /// Called exactly once on the worker thread, after the destination
    /// file has been written and closed (or the job has failed), with
    /// the same result the [JobHandle] delivers.
    pub fn with_listener<F>(mut self, listener: F) -> Self
    where
        F: FnOnce(&Result<PathBuf>) + Send + 'static,
    {
        self.listener = Some(Box::new(listener));
        self
    }
}

/// Handle to a running encode job
///
/// The result is delivered exactly once, through [wait] and through
/// the optional completion listener.
///
/// [wait]: struct.JobHandle.html#method.wait
pub struct JobHandle {
    dest: PathBuf,
    cancel: Arc<AtomicBool>,
    rx: Receiver<Result<PathBuf>>,
    thread: Option<thread::JoinHandle<()>>,
}

impl JobHandle {
    /// Get the destination path of this job.
    pub fn destination(&self) -> &Path {
        &self.dest
    }

    /// Request cancellation.
    ///
    /// The job stops at the next stage or frame boundary; a partially
    /// written file is removed, and the destination is left untouched.
    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    /// Block until the job completes, returning the destination path.
    pub fn wait(mut self) -> Result<PathBuf> {
        let result = self.rx.recv().unwrap_or_else(|_| {
            Err(Error::Write(io::Error::new(
                io::ErrorKind::Other,
                "encode worker terminated",
            )))
        });
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        result
    }
}

/// Animated GIF encoder front end
///
/// Each call to [encode] runs as an independent job on its own worker
/// thread, with no state shared between jobs except the registry that
/// enforces one active job per destination path.  Paths are compared
/// as given, without canonicalization.
///
/// [encode]: struct.Flipbook.html#method.encode
#[derive(Clone, Default)]
pub struct Flipbook {
    active: Arc<Mutex<HashSet<PathBuf>>>,
}

impl Flipbook {
    pub fn new() -> Self {
        Flipbook::default()
    }

    /// Start encoding `sources`, in order, into a GIF at `dest`.
    ///
    /// Fails fast with [JobInProgress](enum.Error.html) when another
    /// job for `dest` is still active; every other error is reported
    /// through the completion signal of the returned [JobHandle].
    pub fn encode<P>(
        &self,
        sources: Vec<SourceFrame>,
        dest: P,
        options: EncodeOptions,
    ) -> Result<JobHandle>
    where
        P: Into<PathBuf>,
    {
        let dest = dest.into();
        {
            let mut active = lock(&self.active);
            if !active.insert(dest.clone()) {
                return Err(Error::JobInProgress(dest));
            }
        }
        let guard = ActiveGuard {
            active: Arc::clone(&self.active),
            dest: dest.clone(),
        };
        let cancel = Arc::new(AtomicBool::new(false));
        let (tx, rx) = mpsc::channel();
        let worker_cancel = Arc::clone(&cancel);
        let worker_dest = dest.clone();
        let mut options = options;
        let listener = options.listener.take();
        let thread = thread::Builder::new()
            .name("flipbook-encode".to_string())
            .spawn(move || {
                let _guard = guard;
                let result =
                    run(sources, &worker_dest, options, &worker_cancel);
                if let Err(err) = &result {
                    debug!(
                        "{}: -> {:?}: {}",
                        worker_dest.display(),
                        Stage::Failed,
                        err
                    );
                }
                if let Some(listener) = listener {
                    listener(&result);
                }
                let _ = tx.send(result);
            })
            .map_err(Error::Write)?;
        Ok(JobHandle {
            dest,
            cancel,
            rx,
            thread: Some(thread),
        })
    }
}

/// Registry entry removed when the worker finishes, however it exits
struct ActiveGuard {
    active: Arc<Mutex<HashSet<PathBuf>>>,
    dest: PathBuf,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        lock(&self.active).remove(&self.dest);
    }
}

/// Lock the registry, recovering from a poisoned mutex.
fn lock(
    active: &Mutex<HashSet<PathBuf>>,
) -> std::sync::MutexGuard<'_, HashSet<PathBuf>> {
    active.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Run the pipeline for one job.
fn run(
    sources: Vec<SourceFrame>,
    dest: &Path,
    options: EncodeOptions,
    cancel: &AtomicBool,
) -> Result<PathBuf> {
    let mut stage = Stage::Idle;
    advance(&mut stage, Stage::Assembling, dest);
    check_cancel(cancel)?;
    let (width, height, frames) = frame::assemble(
        sources,
        options.canvas,
        options.delay_cs,
        options.disposal,
    )?;
    advance(&mut stage, Stage::Quantizing, dest);
    check_cancel(cancel)?;
    let quantized = quant::quantize(&frames, options.transparent)?;
    advance(&mut stage, Stage::Encoding, dest);
    check_cancel(cancel)?;
    write_output(
        &mut stage,
        dest,
        width,
        height,
        &frames,
        &quantized,
        options.loop_count,
        cancel,
    )?;
    advance(&mut stage, Stage::Completed, dest);
    Ok(dest.to_path_buf())
}

/// Log one stage transition.
fn advance(stage: &mut Stage, next: Stage, dest: &Path) {
    debug!("{}: {:?} -> {:?}", dest.display(), *stage, next);
    *stage = next;
}

fn check_cancel(cancel: &AtomicBool) -> Result<()> {
    if cancel.load(Ordering::Relaxed) {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}

/// Encode all frames into a temp file, then promote it to `dest`.
#[allow(clippy::too_many_arguments)]
fn write_output(
    stage: &mut Stage,
    dest: &Path,
    width: u16,
    height: u16,
    frames: &[Frame],
    quantized: &Quantized,
    loop_count: Option<u16>,
    cancel: &AtomicBool,
) -> Result<()> {
    let part = part_path(dest);
    let file = File::create(&part).map_err(Error::Write)?;
    let result =
        write_stream(file, width, height, frames, quantized, loop_count,
            cancel);
    match result {
        Ok(()) => {
            advance(stage, Stage::Writing, dest);
            fs::rename(&part, dest).map_err(|err| {
                let _ = fs::remove_file(&part);
                Error::Write(err)
            })
        }
        Err(err) => {
            let _ = fs::remove_file(&part);
            Err(err)
        }
    }
}

/// Serialize the whole bitstream into one open file.
fn write_stream(
    file: File,
    width: u16,
    height: u16,
    frames: &[Frame],
    quantized: &Quantized,
    loop_count: Option<u16>,
    cancel: &AtomicBool,
) -> Result<()> {
    let mut stream = GifStream::new(file);
    stream
        .preamble(width, height, quantized.global.as_ref(), loop_count)
        .map_err(Error::Write)?;
    for (i, frame) in frames.iter().enumerate() {
        check_cancel(cancel)?;
        let palette = quantized.palette(i);
        let control = GraphicControl::default()
            .with_disposal_method(frame.disposal())
            .with_delay_time_cs(frame.delay_cs())
            .with_transparent_color(palette.transparent());
        let indexed = &quantized.frames[i];
        let local = indexed.local_palette();
        let desc = ImageDesc::default()
            .with_width(width)
            .with_height(height)
            .with_local_table(local.map(|p| p.table_size()));
        stream
            .frame(
                &control,
                &desc,
                local,
                palette.min_code_size(),
                indexed.indices(),
            )
            .map_err(Error::Write)?;
    }
    stream.finish().map_err(Error::Write)
}

/// Get the temporary path a job writes to before promotion.
fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(OsString::from)
        .unwrap_or_else(|| OsString::from("out.gif"));
    name.push(".part");
    dest.with_file_name(name)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::lzw;
    use image::{Rgba, RgbaImage};
    use std::env;
    use std::process;
    use std::sync::mpsc::channel;

    fn init() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn temp_dest(name: &str) -> PathBuf {
        env::temp_dir()
            .join(format!("flipbook-{}-{}.gif", process::id(), name))
    }

    fn solid(rgba: [u8; 4]) -> SourceFrame {
        SourceFrame::from_image(RgbaImage::from_pixel(10, 10, Rgba(rgba)))
    }

    /// Frames with thousands of distinct colors keep a job busy long
    /// enough for cancellation / exclusivity tests to observe it.
    fn heavy_sources(frames: u32) -> Vec<SourceFrame> {
        (0..frames)
            .map(|f| {
                SourceFrame::from_image(RgbaImage::from_fn(
                    128,
                    128,
                    |x, y| {
                        Rgba([(x * 2) as u8, (y * 2) as u8, f as u8, 255])
                    },
                ))
            })
            .collect()
    }

    /// Minimal GIF reader used to verify produced files
    struct ParsedGif {
        global: Vec<[u8; 3]>,
        has_loop: bool,
        frames: Vec<ParsedFrame>,
    }

    struct ParsedFrame {
        local: Vec<[u8; 3]>,
        indices: Vec<u8>,
    }

    fn read_table(bytes: &[u8], pos: &mut usize, flags: u8) -> Vec<[u8; 3]> {
        let mut table = Vec::new();
        if flags & 0x80 != 0 {
            let entries = 2usize << (flags & 0x07);
            for _ in 0..entries {
                table.push([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2]]);
                *pos += 3;
            }
        }
        table
    }

    fn skip_sub_blocks(bytes: &[u8], pos: &mut usize) -> Vec<u8> {
        let mut data = Vec::new();
        loop {
            let len = bytes[*pos] as usize;
            *pos += 1;
            if len == 0 {
                return data;
            }
            data.extend_from_slice(&bytes[*pos..*pos + len]);
            *pos += len;
        }
    }

    fn parse(bytes: &[u8]) -> ParsedGif {
        assert_eq!(&bytes[..6], b"GIF89a");
        let mut pos = 6;
        let flags = bytes[pos + 4];
        pos += 7;
        let global = read_table(bytes, &mut pos, flags);
        let mut gif = ParsedGif { global, has_loop: false, frames: vec![] };
        loop {
            let code = bytes[pos];
            pos += 1;
            match code {
                0x21 => {
                    let label = bytes[pos];
                    pos += 1;
                    let data = skip_sub_blocks(bytes, &mut pos);
                    if label == 0xFF && data.starts_with(b"NETSCAPE2.0") {
                        gif.has_loop = true;
                    }
                }
                0x2C => {
                    let flags = bytes[pos + 8];
                    pos += 9;
                    let local = read_table(bytes, &mut pos, flags);
                    let min_code_size = bytes[pos];
                    pos += 1;
                    let data = skip_sub_blocks(bytes, &mut pos);
                    let indices = lzw::decompress(min_code_size, &data);
                    gif.frames.push(ParsedFrame { local, indices });
                }
                0x3B => break,
                code => panic!("unexpected block code {:02X}", code),
            }
        }
        assert_eq!(pos, bytes.len());
        gif
    }

    #[test]
    fn three_solid_frames_scenario() {
        init();
        let dest = temp_dest("solid");
        let sources = vec![
            solid([255, 0, 0, 255]),
            solid([0, 255, 0, 255]),
            solid([0, 0, 255, 255]),
        ];
        let options = EncodeOptions::default()
            .with_loop_count(0)
            .with_delay_cs(10);
        let job = Flipbook::new().encode(sources, &dest, options).unwrap();
        let path = job.wait().unwrap();
        assert_eq!(path, dest);
        let bytes = fs::read(&dest).unwrap();
        let gif = parse(&bytes);
        assert!(gif.has_loop);
        assert_eq!(gif.frames.len(), 3);
        let expected =
            [[255u8, 0, 0], [0, 255, 0], [0, 0, 255]];
        for (frame, want) in gif.frames.iter().zip(&expected) {
            assert_eq!(frame.indices.len(), 100);
            assert!(frame.local.is_empty());
            let first = frame.indices[0] as usize;
            assert_eq!(gif.global[first], *want);
            // solid frame: one index everywhere
            assert!(frame.indices.iter().all(|&i| i == frame.indices[0]));
        }
        fs::remove_file(&dest).unwrap();
    }

    #[test]
    fn encoding_is_deterministic() {
        let make = || {
            vec![
                SourceFrame::from_image(RgbaImage::from_fn(
                    40,
                    40,
                    |x, y| Rgba([(x * 6) as u8, (y * 6) as u8, 128, 255]),
                )),
                solid([12, 34, 56, 255]),
            ]
        };
        let a = temp_dest("det-a");
        let b = temp_dest("det-b");
        let fb = Flipbook::new();
        fb.encode(make(), &a, EncodeOptions::default())
            .unwrap()
            .wait()
            .unwrap();
        fb.encode(make(), &b, EncodeOptions::default())
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(fs::read(&a).unwrap(), fs::read(&b).unwrap());
        fs::remove_file(&a).unwrap();
        fs::remove_file(&b).unwrap();
    }

    #[test]
    fn empty_input_creates_no_file() {
        let dest = temp_dest("empty");
        let job = Flipbook::new()
            .encode(vec![], &dest, EncodeOptions::default())
            .unwrap();
        match job.wait() {
            Err(Error::EmptyInput) => (),
            _ => panic!("expected EmptyInput"),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn failed_job_leaves_no_file() {
        let dest = temp_dest("atomic");
        let sources = vec![
            solid([1, 1, 1, 255]),
            solid([2, 2, 2, 255]),
            SourceFrame::from_path("/nonexistent/flipbook/3.png"),
            solid([4, 4, 4, 255]),
            solid([5, 5, 5, 255]),
        ];
        let job = Flipbook::new()
            .encode(sources, &dest, EncodeOptions::default())
            .unwrap();
        match job.wait() {
            Err(Error::SourceRead(_)) => (),
            _ => panic!("expected SourceRead"),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn unwritable_destination() {
        let dest = PathBuf::from("/nonexistent-dir/flipbook/out.gif");
        let job = Flipbook::new()
            .encode(
                vec![solid([1, 2, 3, 255])],
                &dest,
                EncodeOptions::default(),
            )
            .unwrap();
        match job.wait() {
            Err(Error::Write(_)) => (),
            _ => panic!("expected Write"),
        }
    }

    #[test]
    fn second_job_for_same_destination_fails_fast() {
        let dest = temp_dest("exclusive");
        let fb = Flipbook::new();
        let job = fb
            .encode(heavy_sources(20), &dest, EncodeOptions::default())
            .unwrap();
        match fb.encode(
            vec![solid([0, 0, 0, 255])],
            &dest,
            EncodeOptions::default(),
        ) {
            Err(Error::JobInProgress(path)) => assert_eq!(path, dest),
            _ => panic!("expected JobInProgress"),
        }
        // first job is unaffected
        job.wait().unwrap();
        assert!(dest.exists());
        fs::remove_file(&dest).unwrap();
    }

    #[test]
    fn destination_registry_frees_after_completion() {
        let dest = temp_dest("refree");
        let fb = Flipbook::new();
        fb.encode(
            vec![solid([7, 7, 7, 255])],
            &dest,
            EncodeOptions::default(),
        )
        .unwrap()
        .wait()
        .unwrap();
        // same destination is available again
        fb.encode(
            vec![solid([8, 8, 8, 255])],
            &dest,
            EncodeOptions::default(),
        )
        .unwrap()
        .wait()
        .unwrap();
        fs::remove_file(&dest).unwrap();
    }

    #[test]
    fn independent_destinations_run_in_parallel() {
        let a = temp_dest("par-a");
        let b = temp_dest("par-b");
        let fb = Flipbook::new();
        let job_a = fb
            .encode(heavy_sources(4), &a, EncodeOptions::default())
            .unwrap();
        let job_b = fb
            .encode(heavy_sources(4), &b, EncodeOptions::default())
            .unwrap();
        job_a.wait().unwrap();
        job_b.wait().unwrap();
        fs::remove_file(&a).unwrap();
        fs::remove_file(&b).unwrap();
    }

    #[test]
    fn cancelled_job_leaves_no_file() {
        init();
        let dest = temp_dest("cancel");
        let job = Flipbook::new()
            .encode(heavy_sources(30), &dest, EncodeOptions::default())
            .unwrap();
        job.cancel();
        match job.wait() {
            Err(Error::Cancelled) => (),
            _ => panic!("expected Cancelled"),
        }
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
    }

    #[test]
    fn listener_fires_once_with_result() {
        let dest = temp_dest("listener");
        let (tx, rx) = channel();
        let options = EncodeOptions::default().with_listener(move |result| {
            tx.send(result.as_ref().ok().cloned()).unwrap();
        });
        Flipbook::new()
            .encode(vec![solid([3, 3, 3, 255])], &dest, options)
            .unwrap()
            .wait()
            .unwrap();
        assert_eq!(rx.recv().unwrap(), Some(dest.clone()));
        assert!(rx.try_recv().is_err());
        fs::remove_file(&dest).unwrap();
    }

    #[test]
    fn part_path_appends_suffix() {
        assert_eq!(
            part_path(Path::new("/tmp/out.gif")),
            Path::new("/tmp/out.gif.part")
        );
        assert_eq!(part_path(Path::new("anim")), Path::new("anim.part"));
    }
}
