//! Byte-level readers and writers for identifier layouts.
//!
//! All endianness handling for GUIDs, counters, long-term ids and
//! short-term ids goes through [`WireReader`] and [`WireWriter`].

use bytes::{BufMut, BytesMut};

use crate::error::{CoreError, CoreResult};
use crate::ids::{GlobalCounter, LongTermId, ReplicaId, ReplicaIndex, ShortTermId};
use crate::pcl::Xid;

const COUNTER_SIZE: usize = GlobalCounter::SIZE;

/// 6-byte big-endian form of a counter value; bits above 48 are dropped.
pub(crate) fn counter_to_bytes(value: u64) -> [u8; COUNTER_SIZE] {
    let wide = value.to_be_bytes();
    let mut out = [0u8; COUNTER_SIZE];
    out.copy_from_slice(&wide[8 - COUNTER_SIZE..]);
    out
}

/// Big-endian value of up to eight bytes.
pub(crate) fn counter_from_bytes(bytes: &[u8]) -> u64 {
    bytes
        .iter()
        .fold(0u64, |acc, byte| (acc << 8) | u64::from(*byte))
}

/// 22-byte form of a long-term id: GUID then big-endian counter.
pub(crate) fn long_term_id_to_bytes(id: &LongTermId) -> [u8; LongTermId::SIZE] {
    let mut out = [0u8; LongTermId::SIZE];
    out[..16].copy_from_slice(id.replica.as_bytes());
    out[16..].copy_from_slice(&counter_to_bytes(id.counter.value()));
    out
}

/// Raw value of a short-term id: little-endian index, then big-endian counter.
pub(crate) fn short_term_id_raw(index: ReplicaIndex, counter: GlobalCounter) -> u64 {
    let mut bytes = [0u8; 8];
    bytes[..2].copy_from_slice(&index.to_le_bytes());
    bytes[2..].copy_from_slice(&counter_to_bytes(counter.value()));
    u64::from_le_bytes(bytes)
}

/// Splits a raw short-term id into its index and counter parts.
pub(crate) fn short_term_id_parts(raw: u64) -> (ReplicaIndex, u64) {
    let bytes = raw.to_le_bytes();
    (
        u16::from_le_bytes([bytes[0], bytes[1]]),
        counter_from_bytes(&bytes[2..]),
    )
}

/// Sequential reader over a byte slice.
#[derive(Debug, Clone)]
pub struct WireReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `data`.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Current offset.
    #[inline]
    #[must_use]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left to read.
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Returns true once every byte has been consumed.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Unread tail of the input.
    #[must_use]
    pub fn rest(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    /// Reads `len` bytes.
    #[inline]
    pub fn read_bytes(&mut self, len: usize) -> CoreResult<&'a [u8]> {
        if len > self.remaining() {
            return Err(CoreError::Truncated {
                offset: self.pos,
                needed: len,
                available: self.remaining(),
            });
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    /// Reads exactly `N` bytes into an array.
    #[inline]
    pub fn read_array<const N: usize>(&mut self) -> CoreResult<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    /// Peeks at a little-endian `u32` without consuming it.
    pub fn peek_u32_le(&self) -> CoreResult<u32> {
        self.clone().read_u32_le()
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> CoreResult<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    /// Reads a little-endian `u16`.
    pub fn read_u16_le(&mut self) -> CoreResult<u16> {
        self.read_array().map(u16::from_le_bytes)
    }

    /// Reads a little-endian `u32`.
    pub fn read_u32_le(&mut self) -> CoreResult<u32> {
        self.read_array().map(u32::from_le_bytes)
    }

    /// Reads a little-endian `u64`.
    pub fn read_u64_le(&mut self) -> CoreResult<u64> {
        self.read_array().map(u64::from_le_bytes)
    }

    /// Reads a 16-byte replica GUID.
    pub fn read_replica_id(&mut self) -> CoreResult<ReplicaId> {
        self.read_array().map(ReplicaId::from_bytes)
    }

    /// Reads a 6-byte big-endian counter.
    pub fn read_counter(&mut self) -> CoreResult<GlobalCounter> {
        self.read_array().map(GlobalCounter::from_bytes)
    }

    /// Reads a little-endian `u16` length and then that many bytes.
    pub fn read_u16_prefixed(&mut self) -> CoreResult<&'a [u8]> {
        let len = usize::from(self.read_u16_le()?);
        self.read_bytes(len)
    }

    /// Reads a 22-byte long-term id.
    pub fn read_long_term_id(&mut self) -> CoreResult<LongTermId> {
        let replica = self.read_replica_id()?;
        let counter = self.read_counter()?;
        Ok(LongTermId::new(replica, counter))
    }

    /// Reads an 8-byte short-term id.
    pub fn read_short_term_id(&mut self) -> CoreResult<ShortTermId> {
        self.read_u64_le().map(ShortTermId::from_raw)
    }

    /// Reads a size-prefixed XID (1-byte size, GUID, big-endian local id).
    ///
    /// The local id may be 1 to 8 bytes but must fit in 48 bits.
    pub fn read_sized_xid(&mut self) -> CoreResult<Xid> {
        let size = usize::from(self.read_u8()?);
        if !(17..=24).contains(&size) {
            return Err(CoreError::invalid_pcl(format!("XID size {size} out of range")));
        }
        let replica = self.read_replica_id()?;
        let local = self.read_bytes(size - 16)?;
        Ok(Xid::new(replica, GlobalCounter::new(counter_from_bytes(local))?))
    }
}

/// Growable writer for identifier layouts.
#[derive(Debug, Default)]
pub struct WireWriter {
    buffer: BytesMut,
}

impl WireWriter {
    /// Creates an empty writer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with preallocated capacity.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
        }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Borrows the written bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Consumes the writer.
    #[must_use]
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer.to_vec()
    }

    /// Writes raw bytes.
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.buffer.put_slice(bytes);
    }

    /// Writes one byte.
    pub fn put_u8(&mut self, value: u8) {
        self.buffer.put_u8(value);
    }

    /// Writes a little-endian `u16`.
    pub fn put_u16_le(&mut self, value: u16) {
        self.buffer.put_u16_le(value);
    }

    /// Writes `bytes` behind a little-endian `u16` length.
    ///
    /// Fails without writing anything if `bytes` is longer than `u16::MAX`.
    pub fn put_u16_prefixed(&mut self, bytes: &[u8]) -> CoreResult<()> {
        let len = u16::try_from(bytes.len()).map_err(|_| CoreError::InvalidLength {
            what: "length-prefixed value",
            expected: usize::from(u16::MAX),
            found: bytes.len(),
        })?;
        self.buffer.put_u16_le(len);
        self.buffer.put_slice(bytes);
        Ok(())
    }

    /// Writes a little-endian `u32`.
    pub fn put_u32_le(&mut self, value: u32) {
        self.buffer.put_u32_le(value);
    }

    /// Writes a little-endian `u64`.
    pub fn put_u64_le(&mut self, value: u64) {
        self.buffer.put_u64_le(value);
    }

    /// Writes a replica GUID.
    pub fn put_replica_id(&mut self, replica: &ReplicaId) {
        self.buffer.put_slice(replica.as_bytes());
    }

    /// Writes a 6-byte counter.
    pub fn put_counter(&mut self, counter: GlobalCounter) {
        self.buffer.put_slice(&counter.to_bytes());
    }

    /// Writes a 22-byte long-term id.
    pub fn put_long_term_id(&mut self, id: &LongTermId) {
        self.buffer.put_slice(&long_term_id_to_bytes(id));
    }

    /// Writes an 8-byte short-term id.
    pub fn put_short_term_id(&mut self, id: ShortTermId) {
        self.buffer.put_u64_le(id.raw());
    }

    /// Writes a size-prefixed XID with a 6-byte local id.
    pub fn put_sized_xid(&mut self, xid: &Xid) {
        self.put_u8(Xid::SIZE as u8);
        self.put_replica_id(&xid.replica);
        self.put_counter(xid.counter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_read_reports_offset() {
        let mut reader = WireReader::new(&[1, 2, 3]);
        reader.read_u8().unwrap();
        assert_eq!(
            reader.read_u32_le(),
            Err(CoreError::Truncated {
                offset: 1,
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn long_term_id_roundtrip_through_writer() {
        let id = LongTermId::new(
            ReplicaId::from_bytes([0xAB; 16]),
            GlobalCounter::new(0x0A0B0C).unwrap(),
        );
        let mut writer = WireWriter::new();
        writer.put_long_term_id(&id);
        assert_eq!(writer.len(), LongTermId::SIZE);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_long_term_id().unwrap(), id);
        assert!(reader.is_empty());
    }

    #[test]
    fn sized_xid_accepts_short_local_ids() {
        let mut bytes = vec![18u8];
        bytes.extend_from_slice(&[1u8; 16]);
        bytes.extend_from_slice(&[0x01, 0x02]);
        let xid = WireReader::new(&bytes).read_sized_xid().unwrap();
        assert_eq!(xid.counter.value(), 0x0102);
    }

    #[test]
    fn sized_xid_rejects_bad_size() {
        let mut bytes = vec![16u8];
        bytes.extend_from_slice(&[0u8; 16]);
        assert!(matches!(
            WireReader::new(&bytes).read_sized_xid(),
            Err(CoreError::InvalidPcl { .. })
        ));
    }

    #[test]
    fn short_term_parts_split_at_two_bytes() {
        let counter = GlobalCounter::new(0x0102_0304_0506).unwrap();
        let raw = short_term_id_raw(0x0A0B, counter);
        assert_eq!(raw.to_le_bytes(), [0x0B, 0x0A, 1, 2, 3, 4, 5, 6]);
        assert_eq!(short_term_id_parts(raw), (0x0A0B, 0x0102_0304_0506));
    }

    #[test]
    fn u16_prefixed_roundtrip() {
        let mut writer = WireWriter::new();
        writer.put_u16_prefixed(&[7, 8, 9]).unwrap();
        assert_eq!(writer.as_bytes(), &[3, 0, 7, 8, 9]);
        let bytes = writer.into_bytes();
        let mut reader = WireReader::new(&bytes);
        assert_eq!(reader.read_u16_prefixed().unwrap(), &[7, 8, 9]);
        assert!(reader.is_empty());
    }

    #[test]
    fn u16_prefixed_rejects_oversized_values() {
        let mut writer = WireWriter::new();
        assert!(matches!(
            writer.put_u16_prefixed(&vec![0u8; 0x1_0000]),
            Err(CoreError::InvalidLength { found: 0x1_0000, .. })
        ));
        assert!(writer.is_empty());
    }

    #[test]
    fn u16_prefixed_reports_short_payload() {
        let mut reader = WireReader::new(&[5, 0, 1, 2]);
        assert!(matches!(
            reader.read_u16_prefixed(),
            Err(CoreError::Truncated { offset: 2, needed: 5, available: 2 })
        ));
    }

    #[test]
    fn peek_does_not_consume() {
        let reader = WireReader::new(&[0x03, 0x00, 0x09, 0x40]);
        assert_eq!(reader.peek_u32_le().unwrap(), 0x4009_0003);
        assert_eq!(reader.position(), 0);
    }
}
