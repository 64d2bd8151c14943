//! Tests for name/value block layout and multi-valued headers

use std::collections::BTreeMap;

use spdy_sans_io::compress::{
    merge_header_value, parse_header_blocks, parse_name_value_block, split_header_values,
    write_name_value_block,
};

use super::*;

#[test]
fn test_block_layout() {
    let mut block = Vec::new();
    write_name_value_block(&mut block, &as_pairs(&[("ab", "xyz")]));
    assert_eq!(
        block,
        [0, 0, 0, 1, 0, 0, 0, 2, b'a', b'b', 0, 0, 0, 3, b'x', b'y', b'z']
    );
}

#[test]
fn test_empty_block() {
    let mut block = Vec::new();
    write_name_value_block(&mut block, &[]);
    assert_eq!(block, [0, 0, 0, 0]);
    assert!(parse_name_value_block(&block).unwrap().is_empty());
}

#[test]
fn test_repeated_names_survive_as_multiset() {
    let mut merged = BTreeMap::new();
    for (name, value) in [("set-cookie", "a=1"), ("vary", "accept"), ("set-cookie", "b=2")] {
        merge_header_value(&mut merged, name.as_bytes(), value.as_bytes());
    }

    let pairs: Vec<(&[u8], &[u8])> = merged
        .iter()
        .map(|(n, v)| (n.as_slice(), v.as_slice()))
        .collect();
    let mut compressor = HeaderCompressor::new();
    let mut decompressor = HeaderDecompressor::new();
    let mut wire = Vec::new();
    compressor.compress_headers(&pairs, &mut wire).unwrap();
    let mut plain = Vec::new();
    decompressor.decompress(&wire, &mut plain).unwrap();

    let mut seen: Vec<(String, String)> = Vec::new();
    for (name, value) in parse_name_value_block(&plain).unwrap() {
        for part in split_header_values(value) {
            seen.push((
                String::from_utf8_lossy(name).into_owned(),
                String::from_utf8_lossy(part).into_owned(),
            ));
        }
    }
    seen.sort();

    let expected = [("set-cookie", "a=1"), ("set-cookie", "b=2"), ("vary", "accept")];
    assert_eq!(seen.len(), expected.len());
    for ((name, value), (want_name, want_value)) in seen.iter().zip(expected) {
        assert_eq!(name, want_name);
        assert_eq!(value, want_value);
    }
}

#[test]
fn test_header_frames_accumulate() {
    let mut buffer = Vec::new();
    write_name_value_block(&mut buffer, &as_pairs(&[(":status", "200"), (":version", "HTTP/1.1")]));
    write_name_value_block(&mut buffer, &as_pairs(&[("x-late", "1")]));

    let names: Vec<&[u8]> = parse_header_blocks(&buffer)
        .unwrap()
        .into_iter()
        .map(|(n, _)| n)
        .collect();
    let expected: [&[u8]; 3] = [b":status", b":version", b"x-late"];
    assert_eq!(names, expected);
}

#[test]
fn test_lengths_past_the_end_are_rejected() {
    let block = [0, 0, 0, 1, 0, 0, 0, 9, b'a', 0, 0, 0, 0];
    assert!(parse_name_value_block(&block).is_err());
    assert!(parse_header_blocks(&block).is_err());
}
