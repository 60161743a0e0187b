//! Fuzz target for OME-XML descriptor extraction.
//!
//! Extraction must never panic: whatever the bytes, the result is a
//! descriptor with an explicit found/missing/malformed physical size.

#![no_main]

use libfuzzer_sys::fuzz_target;
use omescale::ome::from_ome_xml_slice;

fuzz_target!(|data: &[u8]| {
    // Cap input size to avoid excessive memory usage.
    if data.len() > 10 * 1024 * 1024 {
        return;
    }

    let _ = from_ome_xml_slice(data);
});
