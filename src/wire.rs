//! Wire-format walking helpers.
//!
//! These locate field boundaries inside a raw DNS message without decoding
//! record contents. Every helper returns `None` when the buffer ends before
//! the field it is looking for; compression pointer targets are never
//! followed or validated.

pub const HEADER_LEN: usize = 12;

/// Offset of ANCOUNT in the header.
pub const ANCOUNT_OFFSET: usize = 6;
/// Offset of NSCOUNT in the header.
pub const NSCOUNT_OFFSET: usize = 8;
/// Offset of ARCOUNT in the header.
pub const ARCOUNT_OFFSET: usize = 10;

/// TC bit, in the first flags byte.
const TRUNCATED_FLAG: u8 = 0x02;

const POINTER_MASK: u8 = 0xC0;

/// Read a big-endian `u16` at `offset`.
#[inline]
pub fn read_u16(buf: &[u8], offset: usize) -> Option<u16> {
    let bytes = buf.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Read a big-endian `u32` at `offset`.
#[inline]
pub fn read_u32(buf: &[u8], offset: usize) -> Option<u32> {
    let bytes = buf.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Whether the header's TC bit is set.
pub fn is_truncated(buf: &[u8]) -> bool {
    buf.get(2).is_some_and(|flags| flags & TRUNCATED_FLAG != 0)
}

/// Skip a (possibly compressed) name starting at `offset`.
///
/// A name is a run of length-prefixed labels ending either in a zero byte or
/// in a 2-byte compression pointer. Returns the offset just past it.
pub fn skip_name(buf: &[u8], mut offset: usize) -> Option<usize> {
    loop {
        let len = *buf.get(offset)?;
        match len & POINTER_MASK {
            POINTER_MASK => {
                buf.get(offset + 1)?;
                return Some(offset + 2);
            }
            0 if len == 0 => return Some(offset + 1),
            0 => {
                offset += 1 + len as usize;
            }
            // 0x40 and 0x80 label types are obsolete/reserved.
            _ => return None,
        }
    }
}

/// Skip an uncompressed name, as found in a question we are about to
/// forward. Pointers are refused here because the bytes become a cache key.
pub fn skip_plain_name(buf: &[u8], mut offset: usize) -> Option<usize> {
    loop {
        let len = *buf.get(offset)?;
        if len == 0 {
            return Some(offset + 1);
        }
        if len & POINTER_MASK != 0 {
            return None;
        }
        offset += 1 + len as usize;
    }
}

/// Skip a question entry (QNAME + QTYPE + QCLASS).
pub fn skip_question(buf: &[u8], offset: usize) -> Option<usize> {
    let end = skip_name(buf, offset)? + 4;
    (end <= buf.len()).then_some(end)
}

/// Location of one resource record's TTL field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordTtl {
    /// Offset of the 4-byte TTL.
    pub ttl_offset: usize,
    /// Offset of the record that follows.
    pub next: usize,
}

/// Walk one resource record starting at `offset`.
///
/// Records have to be walked in order: a record's start is only known once
/// the previous record's name and RDATA have been skipped.
pub fn locate_record_ttl(buf: &[u8], offset: usize) -> Option<RecordTtl> {
    // NAME, then TYPE + CLASS
    let ttl_offset = skip_name(buf, offset)? + 4;
    let rdlength = read_u16(buf, ttl_offset + 4)? as usize;
    let next = ttl_offset + 6 + rdlength;

    if next > buf.len() {
        return None;
    }

    Some(RecordTtl { ttl_offset, next })
}

/// Render a question name as dotted text for logging.
pub fn name_to_string(buf: &[u8], mut offset: usize) -> Option<String> {
    let mut name = String::new();

    loop {
        let len = *buf.get(offset)? as usize;
        if len == 0 {
            break;
        }
        if len as u8 & POINTER_MASK != 0 {
            return None;
        }
        let label = buf.get(offset + 1..offset + 1 + len)?;
        if !name.is_empty() {
            name.push('.');
        }
        name.push_str(&String::from_utf8_lossy(label));
        offset += 1 + len;
    }

    if name.is_empty() {
        name.push('.');
    }

    Some(name)
}
