//! Client query parsing.
//!
//! A query is reduced to its header and first question. Everything after the
//! question (EDNS OPT records in practice) is dropped and ARCOUNT is zeroed, so
//! the same bytes can be forwarded upstream and compared for cache hits.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::wire::{self, ARCOUNT_OFFSET, HEADER_LEN};

/// A client query without EDNS.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Query {
    id: [u8; 2],
    /// Header + question, ARCOUNT zeroed.
    canonical: Vec<u8>,
}

impl Query {
    /// Parse a raw client datagram.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_LEN {
            return Err(Error::MalformedQuery("header truncated"));
        }
        if wire::read_u16(data, 4) == Some(0) {
            return Err(Error::MalformedQuery("no question"));
        }

        let name_end = wire::skip_plain_name(data, HEADER_LEN)
            .ok_or(Error::MalformedQuery("question name truncated or compressed"))?;
        // QTYPE + QCLASS
        let question_end = name_end + 4;
        if question_end > data.len() {
            return Err(Error::MalformedQuery("question truncated"));
        }

        let mut canonical = data[..question_end].to_vec();
        canonical[ARCOUNT_OFFSET] = 0;
        canonical[ARCOUNT_OFFSET + 1] = 0;

        Ok(Self {
            id: [data[0], data[1]],
            canonical,
        })
    }

    /// Transaction id, as sent by the client.
    pub fn id(&self) -> [u8; 2] {
        self.id
    }

    /// QNAME + QTYPE + QCLASS. This is the cache key.
    pub fn question(&self) -> &[u8] {
        &self.canonical[HEADER_LEN..]
    }

    /// Bytes forwarded upstream.
    pub fn canonical(&self) -> &[u8] {
        &self.canonical
    }

    pub fn qtype(&self) -> u16 {
        let question = self.question();
        u16::from_be_bytes([question[question.len() - 4], question[question.len() - 3]])
    }

    /// Dotted name for log lines.
    pub fn name(&self) -> String {
        wire::name_to_string(&self.canonical, HEADER_LEN).unwrap_or_else(|| "<unknown>".to_string())
    }

    /// Check a deserialized query still has the shape `parse` produces.
    pub(crate) fn verify(&self) -> Result<()> {
        let reparsed = Query::parse(&self.canonical)?;
        if reparsed != *self {
            return Err(Error::MalformedQuery("stored query is not canonical"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{build_query, with_edns};

    #[test]
    fn parse_extracts_id_and_question() {
        let raw = build_query(0xBEEF, "www.example.com", 1);

        let query = Query::parse(&raw).unwrap();

        assert_eq!(query.id(), [0xBE, 0xEF]);
        assert_eq!(query.question(), &raw[12..]);
        assert_eq!(query.qtype(), 1);
        assert_eq!(query.name(), "www.example.com");
    }

    #[test]
    fn parse_strips_edns() {
        let plain = build_query(7, "example.com", 28);
        let raw = with_edns(plain.clone());

        let query = Query::parse(&raw).unwrap();

        assert_eq!(query.canonical(), plain.as_slice());
        assert_eq!(&query.canonical()[10..12], &[0, 0]);
    }

    #[test]
    fn parse_zeroes_full_arcount() {
        let mut raw = with_edns(build_query(7, "example.com", 1));
        raw[10] = 0x01;

        let query = Query::parse(&raw).unwrap();

        assert_eq!(&query.canonical()[10..12], &[0, 0]);
    }

    #[test]
    fn parse_leaves_other_header_fields() {
        let mut raw = build_query(7, "example.com", 1);
        raw[2] = 0x01;
        raw[3] = 0x20;

        let query = Query::parse(&raw).unwrap();

        assert_eq!(&query.canonical()[..10], &raw[..10]);
    }

    #[test]
    fn same_question_different_edns_is_equal_question() {
        let a = Query::parse(&build_query(1, "example.com", 1)).unwrap();
        let b = Query::parse(&with_edns(build_query(2, "example.com", 1))).unwrap();

        assert_eq!(a.question(), b.question());
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn parse_rejects_short_header() {
        assert!(matches!(Query::parse(&[0u8; 11]), Err(Error::MalformedQuery(_))));
    }

    #[test]
    fn parse_rejects_truncated_question() {
        let raw = build_query(1, "example.com", 1);

        assert!(Query::parse(&raw[..raw.len() - 2]).is_err());
        assert!(Query::parse(&raw[..14]).is_err());
    }

    #[test]
    fn parse_rejects_empty_question_section() {
        let mut raw = build_query(1, "example.com", 1);
        raw[5] = 0;

        assert!(matches!(Query::parse(&raw), Err(Error::MalformedQuery("no question"))));
    }

    #[test]
    fn parse_rejects_compressed_question() {
        let mut raw = build_query(1, "example.com", 1)[..12].to_vec();
        raw.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);

        assert!(Query::parse(&raw).is_err());
    }

    #[test]
    fn verify_accepts_parsed_query() {
        let query = Query::parse(&with_edns(build_query(1, "example.com", 1))).unwrap();

        assert!(query.verify().is_ok());
    }
}
