//! Criterion microbenches for omescale's hot paths.
//!
//! Run with: `cargo bench`
//!
//! These benchmarks measure the performance of:
//! - Block-average downsampling (u16 and f32)
//! - Pyramid level selection
//! - OME-XML descriptor extraction and rewriting

use std::hint::black_box;
use std::path::Path;

use criterion::{criterion_group, criterion_main, Criterion, Throughput};
use ndarray::{ArrayD, IxDyn};

use omescale::ome::{from_ome_xml_str, rewrite_descriptor, RewriteRequest};
use omescale::pixels::{downsample, PixelData};
use omescale::pyramid::{select_level, PyramidLevel};
use omescale::RunContext;

const OME_FIXTURE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0" Name="bench">
    <Pixels ID="Pixels:0" DimensionOrder="XYCZT" Type="uint16" SizeX="2048" SizeY="2048" SizeC="3" SizeZ="1" SizeT="1" PhysicalSizeX="0.325" PhysicalSizeY="0.325">
      <Channel ID="Channel:0:0" Name="DAPI" SamplesPerPixel="1"><LightPath/></Channel>
      <Channel ID="Channel:0:1" Name="CD3" SamplesPerPixel="1"><LightPath/></Channel>
      <Channel ID="Channel:0:2" Name="CD8" SamplesPerPixel="1"><LightPath/></Channel>
      <TiffData IFD="0" PlaneCount="3"/>
    </Pixels>
  </Image>
</OME>"#;

fn ctx() -> RunContext {
    RunContext::detached(Path::new("bench.ome.tiff"))
}

/// Benchmark 4× block averaging of a 3-channel 1024² u16 image.
fn bench_downsample_u16(c: &mut Criterion) {
    let input = PixelData::U16(ArrayD::from_shape_fn(IxDyn(&[3, 1024, 1024]), |idx| {
        (idx[1] ^ idx[2]) as u16
    }));
    let ctx = ctx();
    let mut group = c.benchmark_group("downsample");
    group.throughput(Throughput::Bytes(input.nbytes()));

    group.bench_function("u16_3x1024x1024_factor4", |b| {
        b.iter(|| {
            let out = downsample(&ctx, black_box(input.clone()), 4, 1, 2).unwrap();
            black_box(out)
        })
    });

    group.finish();
}

/// Benchmark 3× block averaging of a 1023² f32 image (with no remainder).
fn bench_downsample_f32(c: &mut Criterion) {
    let input = PixelData::F32(ArrayD::from_shape_fn(IxDyn(&[1023, 1023]), |idx| {
        (idx[0] * 3 + idx[1]) as f32 * 0.5
    }));
    let ctx = ctx();
    let mut group = c.benchmark_group("downsample");
    group.throughput(Throughput::Bytes(input.nbytes()));

    group.bench_function("f32_1023x1023_factor3", |b| {
        b.iter(|| {
            let out = downsample(&ctx, black_box(input.clone()), 3, 0, 1).unwrap();
            black_box(out)
        })
    });

    group.finish();
}

/// Benchmark selection over a deep pyramid.
fn bench_select_level(c: &mut Criterion) {
    let levels: Vec<PyramidLevel> = (0..12)
        .map(|index| PyramidLevel::from_scale(index, 0.1725, 1.0))
        .collect();
    let ctx = ctx();

    c.bench_function("select_level_12", |b| {
        b.iter(|| black_box(select_level(&ctx, black_box(&levels)).unwrap()))
    });
}

/// Benchmark descriptor extraction and rewrite.
fn bench_descriptor(c: &mut Criterion) {
    let ctx = ctx();
    let channels: Vec<String> = vec!["DAPI".into(), "CD3".into(), "CD8".into()];
    let mut group = c.benchmark_group("ome_xml");
    group.throughput(Throughput::Bytes(OME_FIXTURE.len() as u64));

    group.bench_function("extract", |b| {
        b.iter(|| black_box(from_ome_xml_str(black_box(OME_FIXTURE))))
    });

    group.bench_function("rewrite", |b| {
        let request = RewriteRequest {
            shape: &[3, 666, 666],
            axes: "CYX",
            physical_size: 0.975,
            channel_names: &channels,
            pixel_type: Some("uint16"),
            plane_count: 3,
        };
        b.iter(|| black_box(rewrite_descriptor(&ctx, Some(black_box(OME_FIXTURE)), &request)))
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_downsample_u16,
    bench_downsample_f32,
    bench_select_level,
    bench_descriptor
);
criterion_main!(benches);
