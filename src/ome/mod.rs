//! OME-XML descriptor handling.
//!
//! The descriptor is the XML block an OME-TIFF carries in the
//! ImageDescription tag of its first page. This module reads the pieces the
//! rescaler needs from it (physical pixel size, channel names, declared
//! dimension sizes), infers axis roles, and rewrites the descriptor so it
//! matches a rescaled image.
//!
//! # Design Principles
//!
//! 1. **Never fatal on read**: a missing or broken descriptor is reported as
//!    an explicit [`Lookup`] state. Callers decide what is required.
//!
//! 2. **Minimal rewrite**: the rewriter edits the original text in place and
//!    leaves every byte it does not need to touch alone, so vendor
//!    annotations and structured annotations survive a rescale.

pub mod axes;
pub mod extract;
pub mod rewrite;

pub use axes::{coerce_axes, declared_layout, resolve_axes, AxisConfidence, ResolvedAxes};
pub use extract::{extract_descriptor, from_ome_xml_slice, from_ome_xml_str};
pub use rewrite::{rewrite_descriptor, RewriteRequest};

/// Outcome of looking up a field in the descriptor.
///
/// Distinguishes "the descriptor does not say" from "the descriptor says
/// something we could not understand", so callers branch on a tag instead of
/// catching errors.
#[derive(Clone, Debug, PartialEq)]
pub enum Lookup<T> {
    /// The field is present and valid.
    Found(T),
    /// No descriptor, or the descriptor has no such field.
    Missing,
    /// The descriptor or the field could not be parsed.
    Malformed { detail: String },
}

impl<T> Lookup<T> {
    /// Returns the value if it was found.
    pub fn as_found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Missing | Lookup::Malformed { .. } => None,
        }
    }
}

/// Physical size of one pixel along X and Y.
#[derive(Clone, Debug, PartialEq)]
pub struct PhysicalSize {
    pub x: f64,
    pub y: f64,
    /// Unit symbol declared for X, if any (OME default is micrometres).
    pub unit: Option<String>,
}

/// Per-axis sizes declared on the `Pixels` node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AxisSizes {
    pub x: Option<usize>,
    pub y: Option<usize>,
    pub z: Option<usize>,
    pub c: Option<usize>,
    pub t: Option<usize>,
}

impl AxisSizes {
    /// Size for an OME axis letter (`X`, `Y`, `Z`, `C`, `T`).
    pub fn get(&self, axis: char) -> Option<usize> {
        match axis {
            'X' => self.x,
            'Y' => self.y,
            'Z' => self.z,
            'C' => self.c,
            'T' => self.t,
            _ => None,
        }
    }
}

/// Everything the rescaler reads from an embedded descriptor.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageDescriptor {
    /// OME `DimensionOrder`, e.g. `XYCZT`.
    pub dimension_order: Option<String>,
    /// Physical pixel size.
    pub physical_size: Lookup<PhysicalSize>,
    /// Channel names in document order; empty when unknown.
    pub channel_names: Vec<String>,
    /// Declared sizes per axis.
    pub sizes: AxisSizes,
}

impl ImageDescriptor {
    /// A descriptor state where nothing is known.
    pub fn missing() -> Self {
        Self {
            dimension_order: None,
            physical_size: Lookup::Missing,
            channel_names: Vec::new(),
            sizes: AxisSizes::default(),
        }
    }

    /// A descriptor state for text that failed to parse.
    pub fn malformed(detail: impl Into<String>) -> Self {
        Self {
            physical_size: Lookup::Malformed {
                detail: detail.into(),
            },
            ..Self::missing()
        }
    }
}

pub(crate) fn xml_escape(raw: &str) -> String {
    raw.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_as_found_only_yields_found_values() {
        assert_eq!(Lookup::Found(3).as_found(), Some(&3));
        assert_eq!(Lookup::<i32>::Missing.as_found(), None);
        assert_eq!(
            Lookup::<i32>::Malformed {
                detail: "bad".into()
            }
            .as_found(),
            None
        );
    }

    #[test]
    fn axis_sizes_lookup_by_letter() {
        let sizes = AxisSizes {
            x: Some(10),
            y: Some(20),
            z: Some(1),
            c: Some(3),
            t: None,
        };
        assert_eq!(sizes.get('X'), Some(10));
        assert_eq!(sizes.get('C'), Some(3));
        assert_eq!(sizes.get('T'), None);
        assert_eq!(sizes.get('Q'), None);
    }

    #[test]
    fn xml_escape_handles_special_characters() {
        assert_eq!(xml_escape("a<b & \"c\""), "a&lt;b &amp; &quot;c&quot;");
    }
}
