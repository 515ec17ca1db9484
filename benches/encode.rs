use criterion::{black_box, criterion_group, criterion_main, Criterion};
use flipbook::lzw::Compressor;
use flipbook::{EncodeOptions, Flipbook, SourceFrame};
use image::{Rgba, RgbaImage};

fn compress_indices(crit: &mut Criterion) {
    let data: Vec<u8> = (0..65_536u32)
        .map(|i| (i.wrapping_mul(31) >> 2) as u8)
        .collect();
    crit.bench_function("lzw_compress_64k", |b| {
        b.iter(|| {
            let mut out = Vec::with_capacity(32_768);
            Compressor::new(8).compress(black_box(&data), &mut out);
            out
        })
    });
}

fn encode_job(crit: &mut Criterion) {
    let dest = std::env::temp_dir().join("flipbook-bench.gif");
    crit.bench_function("encode_16_frames", |b| {
        b.iter(|| {
            let sources: Vec<_> = (0..16u8)
                .map(|f| {
                    SourceFrame::from_image(RgbaImage::from_fn(
                        64,
                        64,
                        |x, y| {
                            Rgba([(x * 4) as u8, (y * 4) as u8, f, 255])
                        },
                    ))
                })
                .collect();
            let job = Flipbook::new()
                .encode(sources, &dest, EncodeOptions::default())
                .unwrap();
            job.wait().unwrap()
        })
    });
    let _ = std::fs::remove_file(&dest);
}

criterion_group!(benches, compress_indices, encode_job);
criterion_main!(benches);
