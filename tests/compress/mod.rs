//! Header compression integration tests: name/value blocks and the shared
//! zlib contexts, through the public API only.

use spdy_sans_io::compress::parse_name_value_block;
use spdy_sans_io::{HeaderCompressor, HeaderDecompressor};

mod blocks;
mod contexts;

pub fn as_pairs<'a>(list: &[(&'a str, &'a str)]) -> Vec<(&'a [u8], &'a [u8])> {
    list.iter().map(|(n, v)| (n.as_bytes(), v.as_bytes())).collect()
}

/// Compress `list` on one side and inflate it on the other.
pub fn exchange(
    compressor: &mut HeaderCompressor,
    decompressor: &mut HeaderDecompressor,
    list: &[(&str, &str)],
) -> (usize, Vec<(String, String)>) {
    let mut wire = Vec::new();
    compressor.compress_headers(&as_pairs(list), &mut wire).unwrap();

    let mut plain = Vec::new();
    decompressor.decompress(&wire, &mut plain).unwrap();
    let decoded = parse_name_value_block(&plain)
        .unwrap()
        .into_iter()
        .map(|(n, v)| {
            (
                String::from_utf8(n.to_vec()).unwrap(),
                String::from_utf8(v.to_vec()).unwrap(),
            )
        })
        .collect();
    (wire.len(), decoded)
}
