#![allow(missing_docs)]
#![allow(clippy::unwrap_used)]

use divan::bench;
use markscan_core::config::ScanConfig;
use markscan_core::filter;
use markscan_core::image::ImageView;
use markscan_core::test_utils::{SheetSpec, render_sheet};
use markscan_core::threshold::{AdaptiveThreshold, otsu_inv};

fn main() {
    divan::main();
}

#[bench]
fn bench_adaptive_gaussian_warp_size(bencher: divan::Bencher) {
    let config = ScanConfig::default();
    let data = vec![128u8; config.warp_width * config.warp_height];
    let img = ImageView::new(&data, config.warp_width, config.warp_height, config.warp_width).unwrap();
    let threshold = AdaptiveThreshold::for_markers(&config);

    bencher.bench_local(move || threshold.apply(&img));
}

#[bench]
fn bench_adaptive_mean_rendered_sheet(bencher: divan::Bencher) {
    let spec = SheetSpec::default();
    let sheet = render_sheet(&spec, &spec.sample_answers());
    let threshold = AdaptiveThreshold::for_bubbles(&spec.config());

    bencher.bench_local(|| threshold.apply(&sheet.view()));
}

#[bench]
fn bench_clahe_warp_size(bencher: divan::Bencher) {
    let config = ScanConfig::default();
    let (w, h) = (config.warp_width, config.warp_height);
    let data: Vec<u8> = (0..w * h).map(|i| ((i * 31) % 251) as u8).collect();
    let img = ImageView::new(&data, w, h, w).unwrap();

    bencher.bench_local(move || filter::clahe(&img, config.clahe_clip_limit, config.clahe_tiles));
}

#[bench]
fn bench_otsu_window(bencher: divan::Bencher) {
    let spec = SheetSpec::default();
    let sheet = render_sheet(&spec, &[]);
    let window = sheet.view().sub_view(0, 0, 40, 40);

    bencher.bench_local(move || otsu_inv(&window));
}
