//! Fuzz target for OME-XML descriptor rewriting.
//!
//! Any rewritten output must itself be well-formed XML.

#![no_main]

use libfuzzer_sys::fuzz_target;
use omescale::ome::rewrite::fuzz_rewrite;

fuzz_target!(|data: &[u8]| {
    if data.len() > 1024 * 1024 {
        return;
    }
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(rewritten) = fuzz_rewrite(text) {
        if roxmltree::Document::parse(text).is_ok() {
            assert!(
                roxmltree::Document::parse(&rewritten).is_ok(),
                "rewrite produced malformed XML"
            );
        }
    }
});
