//! Tests for the shared, dictionary-seeded deflate/inflate contexts

use super::*;

const REQUEST: &[(&str, &str)] = &[
    (":method", "GET"),
    (":path", "/index.html"),
    (":version", "HTTP/1.1"),
    (":host", "www.example.com"),
    (":scheme", "https"),
    ("accept", "text/html"),
    ("accept-language", "en-US"),
    ("user-agent", "Mozilla/5.0"),
];

fn raw_len(list: &[(&str, &str)]) -> usize {
    4 + list.iter().map(|(n, v)| 8 + n.len() + v.len()).sum::<usize>()
}

#[test]
fn test_dictionary_shrinks_first_block() {
    let mut compressor = HeaderCompressor::new();
    let mut decompressor = HeaderDecompressor::new();

    let (wire_len, decoded) = exchange(&mut compressor, &mut decompressor, REQUEST);
    assert!(wire_len < raw_len(REQUEST));
    assert_eq!(decoded.len(), REQUEST.len());
    for ((name, value), (want_name, want_value)) in decoded.iter().zip(REQUEST) {
        assert_eq!(name, want_name);
        assert_eq!(value, want_value);
    }
}

#[test]
fn test_history_shrinks_repeated_block() {
    let mut compressor = HeaderCompressor::new();
    let mut decompressor = HeaderDecompressor::new();

    let (first, _) = exchange(&mut compressor, &mut decompressor, REQUEST);
    let (second, decoded) = exchange(&mut compressor, &mut decompressor, REQUEST);
    assert!(second < first);
    assert_eq!(decoded.len(), REQUEST.len());
}

#[test]
fn test_many_blocks_stay_in_step() {
    let mut compressor = HeaderCompressor::new();
    let mut decompressor = HeaderDecompressor::new();

    for i in 0..50 {
        let path = format!("/item/{i}");
        let list = [(":status", "200 OK"), (":version", "HTTP/1.1"), ("x-path", path.as_str())];
        let (_, decoded) = exchange(&mut compressor, &mut decompressor, &list);
        assert_eq!(decoded[2].1, path);
    }
}

#[test]
fn test_skipping_a_block_desynchronizes() {
    let mut compressor = HeaderCompressor::new();
    let mut decompressor = HeaderDecompressor::new();

    // The first block is never inflated, so the dictionary and history the
    // second block relies on are missing.
    let mut lost = Vec::new();
    compressor.compress_headers(&as_pairs(REQUEST), &mut lost).unwrap();

    let mut wire = Vec::new();
    compressor.compress_headers(&as_pairs(REQUEST), &mut wire).unwrap();
    let mut plain = Vec::new();
    let intact = decompressor.decompress(&wire, &mut plain).is_ok()
        && parse_name_value_block(&plain).is_ok_and(|pairs| pairs == as_pairs(REQUEST));
    assert!(!intact);
}

#[test]
fn test_discard_keeps_receiver_in_step() {
    let mut compressor = HeaderCompressor::new();
    let mut decompressor = HeaderDecompressor::new();

    let mut pushed = Vec::new();
    compressor
        .compress_headers(&as_pairs(&[(":status", "200"), (":path", "/style.css")]), &mut pushed)
        .unwrap();
    decompressor.discard(&pushed).unwrap();

    let (_, decoded) = exchange(&mut compressor, &mut decompressor, REQUEST);
    assert_eq!(decoded[1], (":path".to_string(), "/index.html".to_string()));
}
