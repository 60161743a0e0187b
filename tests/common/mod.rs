#![allow(dead_code)]

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use ndarray::{ArrayD, IxDyn};
use omescale::pixels::PixelData;
use omescale::tiff_io::TiffWriter;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

/// A minimal OME-XML document for a `C×Y×X` image stored as one page per
/// channel.
pub fn ome_xml(size_x: usize, size_y: usize, physical: Option<f64>, channels: &[&str]) -> String {
    let physical_attrs = physical
        .map(|mpp| format!(r#" PhysicalSizeX="{mpp}" PhysicalSizeY="{mpp}""#))
        .unwrap_or_default();
    let channel_elems: String = channels
        .iter()
        .enumerate()
        .map(|(idx, name)| {
            format!(r#"<Channel ID="Channel:0:{idx}" Name="{name}" SamplesPerPixel="1"><LightPath/></Channel>"#)
        })
        .collect();

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="UTF-8"?>"#,
            r#"<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">"#,
            r#"<Image ID="Image:0" Name="fixture">"#,
            r#"<Pixels ID="Pixels:0" DimensionOrder="XYCZT" Type="uint16" "#,
            r#"SizeX="{x}" SizeY="{y}" SizeC="{c}" SizeZ="1" SizeT="1"{physical}>"#,
            r#"{channels}<TiffData IFD="0" PlaneCount="{c}"/>"#,
            r#"</Pixels></Image></OME>"#
        ),
        x = size_x,
        y = size_y,
        c = channels.len().max(1),
        physical = physical_attrs,
        channels = channel_elems,
    )
}

/// `C×H×W` u16 image where every `block×block` tile holds
/// `c*1000 + (y/block)*10 + x/block`.
pub fn blocky_u16(channels: usize, height: usize, width: usize, block: usize) -> PixelData {
    PixelData::U16(ArrayD::from_shape_fn(IxDyn(&[channels, height, width]), |idx| {
        (idx[0] * 1000 + (idx[1] / block) * 10 + idx[2] / block) as u16
    }))
}

/// Write `images` one after another into a TIFF at `path`; the
/// description goes on the first page.
pub fn write_tiff(path: &Path, images: &[PixelData], description: Option<&str>) {
    let file = File::create(path).expect("create fixture");
    let mut writer = TiffWriter::new(BufWriter::new(file), false).expect("write tiff header");
    for (idx, image) in images.iter().enumerate() {
        let description = if idx == 0 { description } else { None };
        writer
            .append_image(image, description)
            .expect("append fixture image");
    }
    writer.finish().expect("finish fixture");
}

/// Three-channel single-level slide at 0.25 µm/pixel, 48×64.
pub fn write_quarter_micron_slide(path: &Path) {
    let xml = ome_xml(64, 48, Some(0.25), &["DAPI", "CD3", "CD8"]);
    write_tiff(path, &[blocky_u16(3, 48, 64, 4)], Some(&xml));
}

/// Two-channel pyramid at 0.5 µm/pixel with levels 128, 64 and 32.
pub fn write_half_micron_pyramid(path: &Path) {
    let xml = ome_xml(128, 128, Some(0.5), &["DAPI", "PanCK"]);
    let levels = [
        blocky_u16(2, 128, 128, 2),
        blocky_u16(2, 64, 64, 1),
        blocky_u16(2, 32, 32, 1),
    ];
    write_tiff(path, &levels, Some(&xml));
}

/// Single-channel pyramid at 0.25 µm/pixel whose levels shrink by 4 each
/// step (256, 64, 16).
pub fn write_quartering_pyramid(path: &Path) {
    let xml = ome_xml(256, 256, Some(0.25), &["DAPI"]);
    let levels = [
        blocky_u16(1, 256, 256, 4),
        blocky_u16(1, 64, 64, 1),
        blocky_u16(1, 16, 16, 1),
    ];
    write_tiff(path, &levels, Some(&xml));
}

/// Interleaved RGB slide (one 3-sample page) at 0.5 µm/pixel, 32×48.
///
/// Each 2×2 block of sample `c` holds `(y/2)*10 + x/2 + c*30`.
pub fn write_rgb_slide(path: &Path) {
    let (width, height) = (48u32, 32u32);
    let mut data = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            for c in 0..3 {
                data.push(((y / 2) * 10 + x / 2 + c * 30) as u8);
            }
        }
    }
    let xml = ome_xml(width as usize, height as usize, Some(0.5), &["RGB"]);

    let file = File::create(path).expect("create fixture");
    let mut encoder = TiffEncoder::new(BufWriter::new(file)).expect("tiff encoder");
    let mut image = encoder
        .new_image::<colortype::RGB8>(width, height)
        .expect("rgb image");
    image
        .encoder()
        .write_tag(Tag::ImageDescription, xml.as_str())
        .expect("description tag");
    image.write_data(&data).expect("rgb data");
}
