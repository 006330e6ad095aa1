// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Criterion benchmarks for the per-page hot paths in scanpaper-document:
// binarisation of an A4-sized scan and cropping of a dense text layer.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use image::{DynamicImage, GrayImage, Luma};

use scanpaper_document::{Bbox, BboxKind, BboxTree, ImageProcessor};

// ---------------------------------------------------------------------------
// Benchmarks
// ---------------------------------------------------------------------------

/// Threshold a 1240x1754 (A4 at 150 dpi) grey page with a dark text band.
fn bench_threshold(c: &mut Criterion) {
    let (width, height) = (1240u32, 1754u32);
    let mut img = GrayImage::from_pixel(width, height, Luma([235u8]));
    for y in 200..260 {
        for x in 100..1100 {
            img.put_pixel(x, y, Luma([20u8]));
        }
    }
    let dynamic = DynamicImage::ImageLuma8(img);

    c.bench_function("threshold (1240x1754)", |b| {
        b.iter(|| {
            let result = ImageProcessor::from_dynamic(black_box(dynamic.clone())).threshold(128);
            black_box(result.into_dynamic());
        });
    });
}

/// Crop a text layer of 60 lines x 12 words to the top half of the page.
fn bench_text_layer_crop(c: &mut Criterion) {
    let mut boxes = vec![Bbox::new(BboxKind::Page, [0, 0, 1240, 1754], 0)];
    for line in 0..60u32 {
        let top = 40 + line * 28;
        boxes.push(Bbox::new(BboxKind::Line, [60, top, 1180, top + 24], 1));
        for word in 0..12u32 {
            let left = 60 + word * 93;
            boxes.push(Bbox::new(BboxKind::Word, [left, top, left + 80, top + 24], 2).with_text("word"));
        }
    }
    let tree = BboxTree::from_boxes(boxes);

    c.bench_function("text layer crop (780 boxes)", |b| {
        b.iter(|| black_box(tree.crop(0, 0, 1240, 877)));
    });
}

criterion_group!(benches, bench_threshold, bench_text_layer_crop);
criterion_main!(benches);
