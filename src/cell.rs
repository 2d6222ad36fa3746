/*
Leaf cell layout:     [key: varint][payload_len: varint][payload bytes]
Internal cell layout: [key: varint][child_page: u32 big-endian]

The payload of a leaf cell is an encoded record. The child of an internal
cell is the page holding keys strictly below the cell key.
*/

use crate::errors::{DbError, Result};
use crate::util::{pack_varint, unpack_uint32, unpack_varint, varint_len};

#[derive(Debug, Clone, PartialEq)]
pub struct LeafCell {
    pub key: u64,
    pub payload: Vec<u8>,
}

impl LeafCell {
    pub fn new(key: u64, payload: Vec<u8>) -> LeafCell {
        LeafCell { key, payload }
    }

    /// Parse a leaf cell. Returns the cell and the number of bytes read.
    pub fn from_bytes(data: &[u8], offset: usize) -> Result<(LeafCell, usize)> {
        let (key, consumed) = unpack_varint(data, offset)?;
        let mut pos = offset + consumed;

        let (payload_len, consumed) = unpack_varint(data, pos)?;
        pos += consumed;

        let end = pos + payload_len as usize;
        if end > data.len() {
            return Err(DbError::corrupt("leaf cell payload is truncated"));
        }
        let payload = data[pos..end].to_vec();

        Ok((LeafCell { key, payload }, end - offset))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = pack_varint(self.key);
        out.extend(pack_varint(self.payload.len() as u64));
        out.extend(&self.payload);
        out
    }

    pub fn encoded_len(&self) -> usize {
        varint_len(self.key) + varint_len(self.payload.len() as u64) + self.payload.len()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InternalCell {
    pub key: u64,
    pub child: u32,
}

impl InternalCell {
    pub fn new(key: u64, child: u32) -> InternalCell {
        InternalCell { key, child }
    }

    /// Parse an internal cell. Returns the cell and the number of bytes read.
    pub fn from_bytes(data: &[u8], offset: usize) -> Result<(InternalCell, usize)> {
        let (key, consumed) = unpack_varint(data, offset)?;
        let child = unpack_uint32(data, offset + consumed)?;
        Ok((InternalCell { key, child }, consumed + 4))
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = pack_varint(self.key);
        out.extend(self.child.to_be_bytes());
        out
    }

    pub fn encoded_len(&self) -> usize {
        varint_len(self.key) + 4
    }

    /// Byte offset of the child pointer within the encoded cell.
    pub fn child_field_offset(key: u64) -> usize {
        varint_len(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_cell_round_trip() {
        let cell = LeafCell::new(42, vec![1, 2, 3]);
        let bytes = cell.to_bytes();
        assert_eq!(bytes.len(), cell.encoded_len());

        let (parsed, consumed) = LeafCell::from_bytes(&bytes, 0).unwrap();
        assert_eq!(parsed, cell);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_leaf_cell_large_key() {
        let cell = LeafCell::new(1 << 40, vec![0xAB; 100]);
        let (parsed, _) = LeafCell::from_bytes(&cell.to_bytes(), 0).unwrap();
        assert_eq!(parsed.key, 1 << 40);
        assert_eq!(parsed.payload.len(), 100);
    }

    #[test]
    fn test_leaf_cell_truncated_payload() {
        let cell = LeafCell::new(7, vec![9; 16]);
        let bytes = cell.to_bytes();
        assert!(LeafCell::from_bytes(&bytes[..bytes.len() - 1], 0).is_err());
    }

    #[test]
    fn test_leaf_cell_at_offset() {
        let cell = LeafCell::new(3, vec![5, 6]);
        let mut data = vec![0xFFu8; 4];
        data.extend(cell.to_bytes());
        let (parsed, _) = LeafCell::from_bytes(&data, 4).unwrap();
        assert_eq!(parsed, cell);
    }

    #[test]
    fn test_internal_cell_round_trip() {
        let cell = InternalCell::new(300, 12);
        let bytes = cell.to_bytes();
        assert_eq!(bytes.len(), cell.encoded_len());

        let (parsed, consumed) = InternalCell::from_bytes(&bytes, 0).unwrap();
        assert_eq!(parsed, cell);
        assert_eq!(consumed, bytes.len());
    }

    #[test]
    fn test_internal_cell_child_field_offset() {
        assert_eq!(InternalCell::child_field_offset(5), 1);
        assert_eq!(InternalCell::child_field_offset(300), 2);
        let cell = InternalCell::new(300, 0xDEAD);
        let bytes = cell.to_bytes();
        let offset = InternalCell::child_field_offset(300);
        assert_eq!(unpack_uint32(&bytes, offset).unwrap(), 0xDEAD);
    }
}
