//! Rewrite an OME-XML descriptor for a rescaled image.
//!
//! `roxmltree` is read-only, so the rewrite is expressed as a set of byte
//! range edits against the original text: the `Pixels` start tag is
//! re-rendered with updated attributes, `Channel` elements are renamed or
//! replaced, and stale `TiffData`/`Plane` entries are replaced by a single
//! `TiffData` that covers the new planes. Everything else is copied as-is.

use std::ops::Range;

use roxmltree::{Document, Node};

use super::extract::{find_pixels, is_element_named};
use super::xml_escape;
use crate::context::RunContext;

const DEFAULT_UNIT: &str = "µm";

/// The new geometry a descriptor has to describe.
#[derive(Clone, Debug)]
pub struct RewriteRequest<'a> {
    /// Output array shape, in `axes` order.
    pub shape: &'a [usize],
    /// Final axis label of the output array, e.g. `CYX`.
    pub axes: &'a str,
    /// New isotropic physical pixel size.
    pub physical_size: f64,
    /// Expected channel names; empty when unknown.
    pub channel_names: &'a [String],
    /// OME pixel type of the output (`uint16`, `float`, ...).
    pub pixel_type: Option<&'a str>,
    /// Number of IFDs the output file holds.
    pub plane_count: usize,
}

/// Produce an updated descriptor, or `None` when there is nothing to update.
///
/// Returns `None` if `original` is absent or cannot be parsed. A descriptor
/// without a `Pixels` node is returned unchanged.
pub fn rewrite_descriptor(
    ctx: &RunContext,
    original: Option<&str>,
    request: &RewriteRequest<'_>,
) -> Option<String> {
    let Some(text) = original else {
        tracing::warn!(parent: &ctx.span, "No OME metadata to preserve");
        return None;
    };

    let document = match Document::parse(text) {
        Ok(document) => document,
        Err(source) => {
            tracing::error!(parent: &ctx.span, error = %source, "Failed to modify OME-XML");
            return None;
        }
    };

    let Some(pixels) = find_pixels(&document) else {
        tracing::warn!(parent: &ctx.span, "OME metadata has no Pixels node; keeping it unchanged");
        return Some(text.to_string());
    };

    match plan_edits(ctx, text, pixels, request) {
        Some(edits) => {
            tracing::info!(
                parent: &ctx.span,
                dimension_order = request.axes,
                "Successfully modified OME-XML metadata"
            );
            Some(apply_edits(text, edits))
        }
        None => {
            tracing::error!(parent: &ctx.span, "Failed to modify OME-XML: unreadable Pixels start tag");
            None
        }
    }
}

#[derive(Debug)]
struct Edit {
    range: Range<usize>,
    replacement: String,
}

fn plan_edits(
    ctx: &RunContext,
    text: &str,
    pixels: Node<'_, '_>,
    request: &RewriteRequest<'_>,
) -> Option<Vec<Edit>> {
    let element = pixels.range();
    let (mut start_tag, tag_end) = StartTag::scan(text, element.start)?;
    let prefix = start_tag.prefix().to_string();

    let unit = start_tag
        .get("PhysicalSizeXUnit")
        .filter(|unit| !unit.trim().is_empty())
        .map(ToOwned::to_owned)
        .unwrap_or_else(|| DEFAULT_UNIT.to_string());
    let size = format_float(request.physical_size);
    start_tag.set("PhysicalSizeX", &size);
    start_tag.set("PhysicalSizeY", &size);
    start_tag.set("PhysicalSizeXUnit", &unit);
    start_tag.set("PhysicalSizeYUnit", &unit);

    let axis_size = |axis: char, fallback: Option<usize>| -> Option<usize> {
        request
            .axes
            .find(axis)
            .or(fallback)
            .and_then(|idx| request.shape.get(idx).copied())
    };
    let ndim = request.shape.len();
    let size_x = axis_size('X', ndim.checked_sub(1)).unwrap_or(1);
    let size_y = axis_size('Y', ndim.checked_sub(2)).unwrap_or(1);
    start_tag.set("SizeX", &size_x.to_string());
    start_tag.set("SizeY", &size_y.to_string());
    for (attr, axis) in [("SizeC", 'C'), ("SizeZ", 'Z'), ("SizeT", 'T')] {
        let value = axis_size(axis, None).unwrap_or(1);
        start_tag.set(attr, &value.to_string());
    }
    start_tag.set("DimensionOrder", request.axes);
    if let Some(pixel_type) = request.pixel_type {
        start_tag.set("Type", pixel_type);
    }

    let channels: Vec<Node<'_, '_>> = pixels
        .children()
        .filter(|node| is_element_named(*node, "Channel"))
        .collect();
    let stale: Vec<Node<'_, '_>> = pixels
        .children()
        .filter(|node| is_element_named(*node, "TiffData") || is_element_named(*node, "Plane"))
        .collect();

    let tiff_data = format!(
        "<{prefix}TiffData IFD=\"0\" PlaneCount=\"{}\"/>",
        request.plane_count
    );
    let expected = request.channel_names;
    let replace_channels = !expected.is_empty() && channels.len() != expected.len();
    if replace_channels {
        tracing::warn!(
            parent: &ctx.span,
            from = channels.len(),
            to = expected.len(),
            "Adjusting channel count"
        );
    }
    let new_channels = || -> String {
        expected
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                format!(
                    "<{prefix}Channel ID=\"Channel:0:{idx}\" Name=\"{}\" SamplesPerPixel=\"1\"><{prefix}LightPath/></{prefix}Channel>",
                    xml_escape(name)
                )
            })
            .collect()
    };

    if start_tag.self_closing {
        // No children to edit: expand into a full element.
        start_tag.self_closing = false;
        let children = if replace_channels {
            new_channels()
        } else {
            String::new()
        };
        return Some(vec![Edit {
            range: element,
            replacement: format!(
                "{}{children}{tiff_data}</{}>",
                start_tag.render(),
                start_tag.name
            ),
        }]);
    }

    let mut edits = vec![Edit {
        range: element.start..tag_end,
        replacement: start_tag.render(),
    }];

    if replace_channels {
        match channels.split_first() {
            Some((first, rest)) => {
                edits.push(Edit {
                    range: first.range(),
                    replacement: new_channels(),
                });
                edits.extend(rest.iter().map(|channel| Edit {
                    range: channel.range(),
                    replacement: String::new(),
                }));
            }
            None => edits.push(Edit {
                range: tag_end..tag_end,
                replacement: new_channels(),
            }),
        }
    } else if !expected.is_empty() {
        for (channel, name) in channels.iter().zip(expected) {
            let (mut tag, end) = StartTag::scan(text, channel.range().start)?;
            tag.set("Name", &xml_escape(name));
            edits.push(Edit {
                range: channel.range().start..end,
                replacement: tag.render(),
            });
        }
    }

    match stale.split_first() {
        Some((first, rest)) => {
            edits.push(Edit {
                range: first.range(),
                replacement: tiff_data,
            });
            edits.extend(rest.iter().map(|node| Edit {
                range: node.range(),
                replacement: String::new(),
            }));
        }
        None => {
            let closing = text[..element.end].rfind("</")?;
            edits.push(Edit {
                range: closing..closing,
                replacement: tiff_data,
            });
        }
    }

    Some(edits)
}

/// Apply non-overlapping edits. Insertions at the same offset keep the
/// order in which they were planned.
fn apply_edits(text: &str, edits: Vec<Edit>) -> String {
    let mut indexed: Vec<(usize, Edit)> = edits.into_iter().enumerate().collect();
    indexed.sort_by_key(|(seq, edit)| (edit.range.start, *seq));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for (_, edit) in indexed {
        out.push_str(&text[cursor..edit.range.start]);
        out.push_str(&edit.replacement);
        cursor = edit.range.end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Render a float the way the descriptor expects, always with a decimal
/// point.
pub(crate) fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// A start tag split into name and attributes.
///
/// Attribute values are kept escaped exactly as they appear in the source.
#[derive(Debug)]
struct StartTag {
    name: String,
    attributes: Vec<(String, String)>,
    self_closing: bool,
}

impl StartTag {
    /// Scan the start tag beginning at `start` (which must point at `<`).
    /// Returns the tag and the offset just past its closing `>`.
    fn scan(text: &str, start: usize) -> Option<(Self, usize)> {
        let bytes = text.as_bytes();
        if bytes.get(start) != Some(&b'<') {
            return None;
        }

        let mut pos = start + 1;
        let name_start = pos;
        while pos < bytes.len() && !is_tag_delimiter(bytes[pos]) {
            pos += 1;
        }
        let name = text.get(name_start..pos)?.to_string();

        let mut attributes = Vec::new();
        loop {
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            match *bytes.get(pos)? {
                b'>' => {
                    return Some((
                        Self {
                            name,
                            attributes,
                            self_closing: false,
                        },
                        pos + 1,
                    ))
                }
                b'/' if bytes.get(pos + 1) == Some(&b'>') => {
                    return Some((
                        Self {
                            name,
                            attributes,
                            self_closing: true,
                        },
                        pos + 2,
                    ))
                }
                _ => {}
            }

            let key_start = pos;
            while pos < bytes.len() && bytes[pos] != b'=' && !is_tag_delimiter(bytes[pos]) {
                pos += 1;
            }
            let key = text.get(key_start..pos)?.to_string();
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            if *bytes.get(pos)? != b'=' {
                return None;
            }
            pos += 1;
            while pos < bytes.len() && bytes[pos].is_ascii_whitespace() {
                pos += 1;
            }
            let quote = *bytes.get(pos)?;
            if quote != b'"' && quote != b'\'' {
                return None;
            }
            let value_start = pos + 1;
            let value_len = bytes.get(value_start..)?.iter().position(|b| *b == quote)?;
            let value = text.get(value_start..value_start + value_len)?.to_string();
            pos = value_start + value_len + 1;

            attributes.push((key, value));
        }
    }

    fn prefix(&self) -> &str {
        self.name
            .split_once(':')
            .map(|(prefix, _)| &self.name[..prefix.len() + 1])
            .unwrap_or("")
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(name, _)| name == key)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute; `value` must already be escaped.
    fn set(&mut self, key: &str, value: &str) {
        match self.attributes.iter_mut().find(|(name, _)| name == key) {
            Some((_, existing)) => *existing = value.to_string(),
            None => self.attributes.push((key.to_string(), value.to_string())),
        }
    }

    fn render(&self) -> String {
        let mut out = format!("<{}", self.name);
        for (key, value) in &self.attributes {
            out.push_str(&format!(" {key}=\"{}\"", value.replace('"', "&quot;")));
        }
        out.push_str(if self.self_closing { "/>" } else { ">" });
        out
    }
}

fn is_tag_delimiter(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == b'>' || byte == b'/'
}

/// Fuzz-only entrypoint: rewrite arbitrary text for a fixed small image.
#[cfg(feature = "fuzzing")]
pub fn fuzz_rewrite(text: &str) -> Option<String> {
    let ctx = RunContext::detached(std::path::Path::new("<fuzz>"));
    let channel_names = vec!["A".to_string(), "B".to_string()];
    let request = RewriteRequest {
        shape: &[2, 16, 16],
        axes: "CYX",
        physical_size: 1.0,
        channel_names: &channel_names,
        pixel_type: Some("uint16"),
        plane_count: 2,
    };
    rewrite_descriptor(&ctx, Some(text), &request)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ome::{extract::from_ome_xml_str, Lookup};
    use std::path::Path;

    const THREE_CHANNELS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<OME xmlns="http://www.openmicroscopy.org/Schemas/OME/2016-06">
  <Image ID="Image:0">
    <Pixels ID="Pixels:0" DimensionOrder="XYCZT" Type="uint16" SizeX="400" SizeY="300" SizeZ="1" SizeC="3" SizeT="1" PhysicalSizeX="0.25" PhysicalSizeY="0.25">
      <Channel ID="Channel:0:0" Name="A" SamplesPerPixel="1"/>
      <Channel ID="Channel:0:1" Name="B" SamplesPerPixel="1"/>
      <Channel ID="Channel:0:2" Name="C" SamplesPerPixel="1"/>
      <TiffData IFD="0" PlaneCount="3"/>
    </Pixels>
  </Image>
  <StructuredAnnotations/>
</OME>"#;

    fn ctx() -> RunContext {
        RunContext::detached(Path::new("test.ome.tiff"))
    }

    fn names(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn request<'a>(shape: &'a [usize], channel_names: &'a [String]) -> RewriteRequest<'a> {
        RewriteRequest {
            shape,
            axes: "CYX",
            physical_size: 1.0,
            channel_names,
            pixel_type: Some("uint16"),
            plane_count: shape[0],
        }
    }

    fn parse(xml: &str) -> Document<'_> {
        Document::parse(xml).expect("rewritten descriptor parses")
    }

    #[test]
    fn updates_geometry_and_calibration() {
        let channel_names = names(&["A", "B", "C"]);
        let shape = [3, 75, 100];
        let xml = rewrite_descriptor(&ctx(), Some(THREE_CHANNELS), &request(&shape, &channel_names))
            .expect("rewrite");
        let document = parse(&xml);
        let pixels = find_pixels(&document).expect("pixels");

        assert_eq!(pixels.attribute("PhysicalSizeX"), Some("1.0"));
        assert_eq!(pixels.attribute("PhysicalSizeY"), Some("1.0"));
        assert_eq!(pixels.attribute("PhysicalSizeXUnit"), Some("µm"));
        assert_eq!(pixels.attribute("SizeX"), Some("100"));
        assert_eq!(pixels.attribute("SizeY"), Some("75"));
        assert_eq!(pixels.attribute("SizeC"), Some("3"));
        assert_eq!(pixels.attribute("SizeZ"), Some("1"));
        assert_eq!(pixels.attribute("SizeT"), Some("1"));
        assert_eq!(pixels.attribute("DimensionOrder"), Some("CYX"));
        assert!(xml.contains("<StructuredAnnotations/>"));
    }

    #[test]
    fn replaces_channels_when_counts_differ() {
        let channel_names = names(&["DAPI", "CD3", "CD8", "CD20", "PanCK"]);
        let shape = [5, 75, 100];
        let xml = rewrite_descriptor(&ctx(), Some(THREE_CHANNELS), &request(&shape, &channel_names))
            .expect("rewrite");
        let document = parse(&xml);
        let pixels = find_pixels(&document).expect("pixels");

        let channels: Vec<_> = pixels
            .children()
            .filter(|node| is_element_named(*node, "Channel"))
            .collect();
        assert_eq!(channels.len(), 5);
        for (idx, channel) in channels.iter().enumerate() {
            assert_eq!(channel.attribute("ID"), Some(format!("Channel:0:{idx}").as_str()));
            assert_eq!(channel.attribute("Name"), Some(channel_names[idx].as_str()));
            assert!(channel
                .children()
                .any(|child| is_element_named(child, "LightPath")));
        }

        // Channels must come before TiffData.
        let kinds: Vec<_> = pixels
            .children()
            .filter(|node| node.is_element())
            .map(|node| node.tag_name().name().to_string())
            .collect();
        assert_eq!(kinds.last().map(String::as_str), Some("TiffData"));
        assert_eq!(from_ome_xml_str(&xml).channel_names, channel_names);
    }

    #[test]
    fn renames_channels_in_place_when_counts_match() {
        let channel_names = names(&["X1", "X2", "X3"]);
        let shape = [3, 75, 100];
        let xml = rewrite_descriptor(&ctx(), Some(THREE_CHANNELS), &request(&shape, &channel_names))
            .expect("rewrite");
        let document = parse(&xml);
        let pixels = find_pixels(&document).expect("pixels");
        let channels: Vec<_> = pixels
            .children()
            .filter(|node| is_element_named(*node, "Channel"))
            .collect();

        assert_eq!(channels.len(), 3);
        assert_eq!(channels[1].attribute("ID"), Some("Channel:0:1"));
        assert_eq!(channels[1].attribute("Name"), Some("X2"));
        assert_eq!(channels[1].attribute("SamplesPerPixel"), Some("1"));
    }

    #[test]
    fn empty_expected_list_leaves_channels_alone() {
        let shape = [3, 75, 100];
        let xml = rewrite_descriptor(&ctx(), Some(THREE_CHANNELS), &request(&shape, &[]))
            .expect("rewrite");
        assert_eq!(from_ome_xml_str(&xml).channel_names, names(&["A", "B", "C"]));
    }

    #[test]
    fn stale_tiff_data_is_replaced() {
        let channel_names = names(&["A", "B", "C"]);
        let shape = [3, 75, 100];
        let mut req = request(&shape, &channel_names);
        req.plane_count = 3;
        let xml = rewrite_descriptor(&ctx(), Some(THREE_CHANNELS), &req).expect("rewrite");
        let document = parse(&xml);
        let tiff_data: Vec<_> = document
            .descendants()
            .filter(|node| is_element_named(*node, "TiffData"))
            .collect();
        assert_eq!(tiff_data.len(), 1);
        assert_eq!(tiff_data[0].attribute("PlaneCount"), Some("3"));
    }

    #[test]
    fn self_closing_pixels_is_expanded() {
        let xml = r#"<ome:OME xmlns:ome="http://www.openmicroscopy.org/Schemas/OME/2016-06"><ome:Image><ome:Pixels SizeX="8" SizeY="8" PhysicalSizeX="0.5" PhysicalSizeY="0.5" PhysicalSizeXUnit="nm"/></ome:Image></ome:OME>"#;
        let channel_names = names(&["only"]);
        let shape = [1, 4, 4];
        let rewritten = rewrite_descriptor(&ctx(), Some(xml), &request(&shape, &channel_names))
            .expect("rewrite");
        let descriptor = from_ome_xml_str(&rewritten);

        assert_eq!(descriptor.channel_names, channel_names);
        assert_eq!(descriptor.sizes.x, Some(4));
        match descriptor.physical_size {
            Lookup::Found(size) => {
                assert_eq!(size.x, 1.0);
                assert_eq!(size.unit.as_deref(), Some("nm"));
            }
            other => panic!("expected physical size, got {other:?}"),
        }
        assert!(rewritten.contains("<ome:Channel ID=\"Channel:0:0\""));
        assert!(rewritten.contains("<ome:TiffData IFD=\"0\" PlaneCount=\"1\"/>"));
    }

    #[test]
    fn no_descriptor_produces_nothing() {
        let shape = [1, 4, 4];
        assert!(rewrite_descriptor(&ctx(), None, &request(&shape, &[])).is_none());
    }

    #[test]
    fn unparsable_descriptor_produces_nothing() {
        let shape = [1, 4, 4];
        assert!(rewrite_descriptor(&ctx(), Some("<OME"), &request(&shape, &[])).is_none());
    }

    #[test]
    fn descriptor_without_pixels_is_unchanged() {
        let shape = [1, 4, 4];
        let xml = "<OME><Image/></OME>";
        assert_eq!(
            rewrite_descriptor(&ctx(), Some(xml), &request(&shape, &[])).as_deref(),
            Some(xml)
        );
    }

    #[test]
    fn start_tag_scan_handles_quotes_and_prefixes() {
        let text = r#"<ome:Pixels A='x"y' B = "2" />"#;
        let (tag, end) = StartTag::scan(text, 0).expect("scan");
        assert_eq!(tag.name, "ome:Pixels");
        assert_eq!(tag.prefix(), "ome:");
        assert_eq!(tag.get("A"), Some("x\"y"));
        assert_eq!(tag.get("B"), Some("2"));
        assert!(tag.self_closing);
        assert_eq!(end, text.len());
    }

    #[test]
    fn format_float_keeps_decimal_point() {
        assert_eq!(format_float(1.0), "1.0");
        assert_eq!(format_float(0.325), "0.325");
    }
}
