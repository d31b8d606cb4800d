//! Netlink attribute (rtattr) handling.

use super::error::{Error, Result};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

/// Netlink attribute alignment.
pub const NLA_ALIGNTO: usize = 4;

/// Align a length to NLA_ALIGNTO boundary.
#[inline]
pub const fn nla_align(len: usize) -> usize {
    (len + NLA_ALIGNTO - 1) & !(NLA_ALIGNTO - 1)
}

/// Size of the attribute header.
pub const NLA_HDRLEN: usize = 4; // nla_align(size_of::<NlAttr>())

/// Netlink attribute header (mirrors struct rtattr).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct NlAttr {
    /// Length including header.
    pub nla_len: u16,
    /// Attribute type.
    pub nla_type: u16,
}

impl NlAttr {
    /// Create a new attribute header.
    pub fn new(attr_type: u16, data_len: usize) -> Self {
        Self {
            nla_len: (NLA_HDRLEN + data_len) as u16,
            nla_type: attr_type,
        }
    }

    /// Get the payload length (total length minus header).
    pub fn payload_len(&self) -> usize {
        (self.nla_len as usize).saturating_sub(NLA_HDRLEN)
    }

    /// Convert to bytes.
    pub fn as_bytes(&self) -> &[u8] {
        <Self as IntoBytes>::as_bytes(self)
    }

    /// Parse from bytes.
    pub fn from_bytes(data: &[u8]) -> Result<&Self> {
        Self::ref_from_prefix(data)
            .map(|(r, _)| r)
            .map_err(|_| Error::Truncated {
                expected: std::mem::size_of::<Self>(),
                actual: data.len(),
            })
    }
}

/// Lenient iterator over netlink attributes in a buffer.
///
/// Stops at the first malformed record, leaving it unconsumed. Use
/// [`parse_attrs`] when such leftovers have to be reported.
pub struct AttrIter<'a> {
    data: &'a [u8],
}

impl<'a> AttrIter<'a> {
    /// Create a new attribute iterator.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    /// Bytes the iterator has not consumed yet.
    pub fn remaining(&self) -> usize {
        self.data.len()
    }
}

impl<'a> Iterator for AttrIter<'a> {
    /// Returns (attribute type, payload data).
    type Item = (u16, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        if self.data.len() < NLA_HDRLEN {
            return None;
        }

        let attr = NlAttr::from_bytes(self.data).ok()?;

        let len = attr.nla_len as usize;
        if len < NLA_HDRLEN || len > self.data.len() {
            return None;
        }

        // A record whose padding runs past the buffer is malformed too.
        let aligned_len = nla_align(len);
        if aligned_len > self.data.len() {
            return None;
        }

        let payload = &self.data[NLA_HDRLEN..len];
        self.data = &self.data[aligned_len..];

        Some((attr.nla_type, payload))
    }
}

/// Walk an attribute block strictly.
///
/// Every record must have a valid length and the walk must consume the
/// block exactly, padding included. A block that ends in the middle of a
/// record is an error.
pub fn parse_attrs(data: &[u8]) -> Result<Vec<(u16, &[u8])>> {
    let mut iter = AttrIter::new(data);
    let attrs: Vec<_> = iter.by_ref().collect();

    if iter.remaining() != 0 {
        return Err(Error::InvalidAttribute(format!(
            "attribute walk ended mid-record with {} bytes left",
            iter.remaining()
        )));
    }

    Ok(attrs)
}

/// Helper functions for extracting typed values from attribute payloads.
pub mod get {
    use super::*;

    /// Extract a u32 value (native endian). The payload must be exactly
    /// four bytes.
    pub fn u32_ne(data: &[u8]) -> Result<u32> {
        let bytes: [u8; 4] = data
            .try_into()
            .map_err(|_| Error::InvalidAttribute(format!("u32 attribute of {} bytes", data.len())))?;
        Ok(u32::from_ne_bytes(bytes))
    }}
