//! Read calibration and channel names from an OME-XML descriptor.

use roxmltree::{Document, Node};

use super::{AxisSizes, ImageDescriptor, Lookup, PhysicalSize};
use crate::context::RunContext;

/// Extract the descriptor fields the rescaler needs.
///
/// `text` is the raw ImageDescription of the first page. An absent or
/// unparsable descriptor is logged and yields a descriptor where nothing is
/// known; it never fails.
pub fn extract_descriptor(ctx: &RunContext, text: Option<&str>) -> ImageDescriptor {
    let Some(text) = text else {
        tracing::warn!(parent: &ctx.span, "No OME metadata found");
        return ImageDescriptor::missing();
    };

    match parse_descriptor(text) {
        Ok(descriptor) => {
            if let Lookup::Malformed { detail } = &descriptor.physical_size {
                tracing::warn!(parent: &ctx.span, %detail, "Unusable physical size in OME metadata");
            }
            descriptor
        }
        Err(detail) => {
            tracing::error!(parent: &ctx.span, %detail, "Failed to parse OME metadata");
            ImageDescriptor::malformed(detail)
        }
    }
}

/// Parse a descriptor from a UTF-8 string.
///
/// This helper is primarily useful for testing/fuzzing parse behavior in-memory.
pub fn from_ome_xml_str(xml: &str) -> ImageDescriptor {
    parse_descriptor(xml).unwrap_or_else(ImageDescriptor::malformed)
}

/// Parse a descriptor from bytes.
///
/// Invalid UTF-8 is reported as a malformed descriptor.
pub fn from_ome_xml_slice(bytes: &[u8]) -> ImageDescriptor {
    match std::str::from_utf8(bytes) {
        Ok(xml) => from_ome_xml_str(xml),
        Err(source) => ImageDescriptor::malformed(format!("input is not valid UTF-8: {source}")),
    }
}

fn parse_descriptor(text: &str) -> Result<ImageDescriptor, String> {
    let document = Document::parse(text).map_err(|source| source.to_string())?;

    let Some(pixels) = find_pixels(&document) else {
        return Ok(ImageDescriptor::missing());
    };

    let channel_names = pixels
        .children()
        .filter(|node| is_element_named(*node, "Channel"))
        .map(|channel| channel.attribute("Name").unwrap_or_default().to_string())
        .collect();

    Ok(ImageDescriptor {
        dimension_order: pixels.attribute("DimensionOrder").map(ToOwned::to_owned),
        physical_size: physical_size(pixels),
        channel_names,
        sizes: AxisSizes {
            x: parse_size(pixels, "SizeX"),
            y: parse_size(pixels, "SizeY"),
            z: parse_size(pixels, "SizeZ"),
            c: parse_size(pixels, "SizeC"),
            t: parse_size(pixels, "SizeT"),
        },
    })
}

/// The first `Pixels` element in document order, in any OME schema version.
pub(crate) fn find_pixels<'a, 'input>(document: &'a Document<'input>) -> Option<Node<'a, 'input>> {
    document
        .descendants()
        .find(|node| is_element_named(*node, "Pixels"))
}

pub(crate) fn is_element_named(node: Node<'_, '_>, name: &str) -> bool {
    node.is_element() && node.tag_name().name() == name
}

fn physical_size(pixels: Node<'_, '_>) -> Lookup<PhysicalSize> {
    let raw_x = non_empty_attribute(pixels, "PhysicalSizeX");
    let raw_y = non_empty_attribute(pixels, "PhysicalSizeY");

    let (Some(raw_x), Some(raw_y)) = (raw_x, raw_y) else {
        return Lookup::Missing;
    };

    match (parse_positive(raw_x), parse_positive(raw_y)) {
        (Some(x), Some(y)) => Lookup::Found(PhysicalSize {
            x,
            y,
            unit: non_empty_attribute(pixels, "PhysicalSizeXUnit").map(ToOwned::to_owned),
        }),
        _ => Lookup::Malformed {
            detail: format!(
                "PhysicalSizeX='{raw_x}' / PhysicalSizeY='{raw_y}'; expected positive finite numbers"
            ),
        },
    }
}

fn non_empty_attribute<'a>(node: Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.attribute(name)
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn parse_positive(raw: &str) -> Option<f64> {
    raw.parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}

fn parse_size(pixels: Node<'_, '_>, name: &str) -> Option<usize> {
    non_empty_attribute(pixels, name).and_then(|raw| raw.parse::<usize>().ok())
}
