//! CLI command implementations.

pub mod decode;
pub mod idset;
pub mod pcl;

use fxsync_codec::StreamType;

/// Parses hex text, ignoring whitespace.
pub fn parse_hex(text: &str) -> Result<Vec<u8>, Box<dyn std::error::Error>> {
    let digits: Vec<u8> = text
        .bytes()
        .filter(|byte| !byte.is_ascii_whitespace())
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits ({})", digits.len()).into());
    }
    digits
        .chunks(2)
        .map(|pair| -> Result<u8, Box<dyn std::error::Error>> {
            let pair = std::str::from_utf8(pair)?;
            Ok(u8::from_str_radix(pair, 16).map_err(|_| format!("invalid hex byte {pair:?}"))?)
        })
        .collect()
}

/// Looks up a stream type by its lowercase name.
pub fn parse_stream_type(name: &str) -> Result<StreamType, Box<dyn std::error::Error>> {
    StreamType::ALL
        .into_iter()
        .find(|kind| kind.name() == name)
        .ok_or_else(|| {
            let known: Vec<_> = StreamType::ALL.iter().map(|kind| kind.name()).collect();
            format!("unknown stream type {name:?}; expected one of {}", known.join(", ")).into()
        })
}
