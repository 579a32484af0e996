//! GLOBSET command stream.
//!
//! A GLOBSET encodes a sorted set of 48-bit counters as a stack machine
//! over their 6-byte big-endian forms. Push commands append common prefix
//! bytes; once the stack holds all six bytes the push names a single
//! counter and is not retained. Bitmask and range commands spell out the
//! remaining suffix bytes.

use crate::error::{CoreError, CoreResult};
use crate::ids::GlobalCounter;
use crate::wire::{counter_from_bytes, counter_to_bytes, WireReader, WireWriter};

/// Terminates the command stream.
pub const END: u8 = 0x00;
/// Removes the most recent push.
pub const POP: u8 = 0x50;
/// Start byte plus an 8-bit mask over the following values.
pub const BITMASK: u8 = 0x42;
/// Low and high suffixes of a range.
pub const RANGE: u8 = 0x52;

const WIDTH: usize = GlobalCounter::SIZE;

/// Widest window a bitmask can describe: the start byte plus eight more.
const BITMASK_SPAN: u64 = 8;

/// Writes the command stream for normalized `(low, high)` ranges.
///
/// Ranges must be sorted, non-overlapping and non-adjacent. The output is
/// deterministic for a given set.
pub fn encode(writer: &mut WireWriter, ranges: &[(u64, u64)]) {
    if !ranges.is_empty() {
        encode_group(writer, ranges, 0);
    }
    writer.put_u8(END);
}

fn encode_group(writer: &mut WireWriter, ranges: &[(u64, u64)], depth: usize) {
    let common = common_prefix(ranges, depth);
    if depth + common == WIDTH {
        // every endpoint is the same value
        writer.put_u8(common as u8);
        writer.put_bytes(&counter_to_bytes(ranges[0].0)[depth..]);
        return;
    }
    if common > 0 {
        writer.put_u8(common as u8);
        writer.put_bytes(&counter_to_bytes(ranges[0].0)[depth..depth + common]);
        encode_group(writer, ranges, depth + common);
        writer.put_u8(POP);
        return;
    }
    if depth == WIDTH - 1 {
        encode_last_byte(writer, ranges);
        return;
    }

    let mut start = 0;
    while start < ranges.len() {
        let (low, high) = ranges[start];
        let lead = counter_to_bytes(low)[depth];
        if counter_to_bytes(high)[depth] != lead {
            write_range(writer, low, high, depth);
            start += 1;
            continue;
        }
        let mut end = start + 1;
        while end < ranges.len()
            && counter_to_bytes(ranges[end].0)[depth] == lead
            && counter_to_bytes(ranges[end].1)[depth] == lead
        {
            end += 1;
        }
        encode_group(writer, &ranges[start..end], depth);
        start = end;
    }
}

fn encode_last_byte(writer: &mut WireWriter, ranges: &[(u64, u64)]) {
    let mut index = 0;
    while index < ranges.len() {
        let start = ranges[index].0;
        let mut end = index + 1;
        while end < ranges.len() && ranges[end].1 <= start + BITMASK_SPAN {
            end += 1;
        }
        if end - index > 1 {
            let mut mask = 0u8;
            for &(low, high) in &ranges[index..end] {
                for value in low.max(start + 1)..=high {
                    mask |= 1 << (value - start - 1);
                }
            }
            writer.put_u8(BITMASK);
            writer.put_u8(counter_to_bytes(start)[WIDTH - 1]);
            writer.put_u8(mask);
        } else {
            let (low, high) = ranges[index];
            if low == high {
                writer.put_u8(1);
                writer.put_u8(counter_to_bytes(low)[WIDTH - 1]);
            } else {
                write_range(writer, low, high, WIDTH - 1);
            }
        }
        index = end;
    }
}

fn write_range(writer: &mut WireWriter, low: u64, high: u64, depth: usize) {
    writer.put_u8(RANGE);
    writer.put_bytes(&counter_to_bytes(low)[depth..]);
    writer.put_bytes(&counter_to_bytes(high)[depth..]);
}

/// Number of bytes from `depth` shared by every range endpoint.
fn common_prefix(ranges: &[(u64, u64)], depth: usize) -> usize {
    let first = counter_to_bytes(ranges[0].0);
    let mut common = WIDTH - depth;
    for &(low, high) in ranges {
        for endpoint in [low, high] {
            let bytes = counter_to_bytes(endpoint);
            let shared = first[depth..]
                .iter()
                .zip(&bytes[depth..])
                .take_while(|(a, b)| a == b)
                .count();
            common = common.min(shared);
        }
    }
    common
}

/// Reads one command stream up to and including its end command.
///
/// Returns the raw ranges in stream order; the caller normalizes them.
pub fn decode(reader: &mut WireReader<'_>) -> CoreResult<Vec<(u64, u64)>> {
    let mut stack: Vec<u8> = Vec::with_capacity(WIDTH);
    let mut pushes: Vec<usize> = Vec::new();
    let mut ranges = Vec::new();

    loop {
        let offset = reader.position();
        let command = reader.read_u8()?;
        match command {
            END => return Ok(ranges),
            1..=6 => {
                let len = usize::from(command);
                if stack.len() + len > WIDTH {
                    return Err(CoreError::invalid_idset(format!(
                        "push of {len} bytes at offset {offset} overflows a {}-byte prefix",
                        stack.len()
                    )));
                }
                stack.extend_from_slice(reader.read_bytes(len)?);
                if stack.len() == WIDTH {
                    let value = counter_from_bytes(&stack);
                    ranges.push((value, value));
                    stack.truncate(WIDTH - len);
                } else {
                    pushes.push(len);
                }
            }
            POP => {
                let len = pushes.pop().ok_or_else(|| {
                    CoreError::invalid_idset(format!("pop on empty stack at offset {offset}"))
                })?;
                stack.truncate(stack.len() - len);
            }
            BITMASK => {
                if stack.len() != WIDTH - 1 {
                    return Err(CoreError::invalid_idset(format!(
                        "bitmask at offset {offset} needs a 5-byte prefix, have {}",
                        stack.len()
                    )));
                }
                let start = reader.read_u8()?;
                let mask = reader.read_u8()?;
                let base = counter_from_bytes(&stack) << 8;
                let start = base | u64::from(start);
                ranges.push((start, start));
                for bit in 0..8u64 {
                    if mask & (1 << bit) != 0 {
                        let value = start + bit + 1;
                        if value > base | 0xFF {
                            return Err(CoreError::invalid_idset(format!(
                                "bitmask at offset {offset} runs past the prefix"
                            )));
                        }
                        ranges.push((value, value));
                    }
                }
            }
            RANGE => {
                let len = WIDTH - stack.len();
                let mut low = stack.clone();
                low.extend_from_slice(reader.read_bytes(len)?);
                let mut high = stack.clone();
                high.extend_from_slice(reader.read_bytes(len)?);
                let (low, high) = (counter_from_bytes(&low), counter_from_bytes(&high));
                if low > high {
                    return Err(CoreError::invalid_idset(format!(
                        "range at offset {offset} has low {low:#x} above high {high:#x}"
                    )));
                }
                ranges.push((low, high));
            }
            other => {
                return Err(CoreError::invalid_idset(format!(
                    "unknown command {other:#04x} at offset {offset}"
                )))
            }
        }
    }
}
