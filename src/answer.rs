//! Cached upstream answers with live TTL rewriting.
//!
//! An answer keeps the upstream reply byte-for-byte and remembers where each
//! answer/authority record's TTL lives. Serving it rewrites the transaction id
//! and every TTL in place, counting down from the capture time. Additional
//! records are never walked, so their TTLs are left as received.

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{Error, Result};
use crate::query::Query;
use crate::upstream::Upstream;
use crate::wire::{self, ANCOUNT_OFFSET, HEADER_LEN, NSCOUNT_OFFSET};

/// Where one record's 4-byte TTL lives, and what it was at capture time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TtlField {
    pub offset: usize,
    pub original: u32,
}

/// Outcome of serving a cached answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Served from the stored buffer.
    Fresh(Vec<u8>),
    /// The stored answer had expired and was fetched again first.
    Refreshed(Vec<u8>),
}

impl Resolution {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Resolution::Fresh(bytes) | Resolution::Refreshed(bytes) => bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    query: Query,
    buffer: Vec<u8>,
    captured_at: u64,
    ttls: Vec<TtlField>,
}

impl CachedAnswer {
    /// Parse an upstream reply to `query`, captured at `captured_at`
    /// (Unix epoch milliseconds).
    pub fn parse(query: Query, response: &[u8], captured_at: u64) -> Result<Self> {
        let ttls = locate_ttls(&query, response)?;

        Ok(Self {
            query,
            buffer: response.to_vec(),
            captured_at,
            ttls,
        })
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    /// Cache key; identical to the originating query's question.
    pub fn question(&self) -> &[u8] {
        self.query.question()
    }

    pub fn ttl_fields(&self) -> &[TtlField] {
        &self.ttls
    }

    pub fn captured_at(&self) -> u64 {
        self.captured_at
    }

    /// Whether `query` asks the same question. Ids and EDNS framing are ignored.
    pub fn matches(&self, query: &Query) -> bool {
        self.question() == query.question()
    }

    /// Truncated replies and replies without any TTL-bearing record are
    /// served but not kept.
    pub fn is_cacheable(&self) -> bool {
        !self.ttls.is_empty() && !wire::is_truncated(&self.buffer)
    }

    fn elapsed_secs(&self, now: u64) -> i64 {
        (now.saturating_sub(self.captured_at) / 1000) as i64
    }

    /// Remaining TTL of `field` at `now`, possibly non-positive.
    pub fn remaining(&self, field: &TtlField, now: u64) -> i64 {
        field.original as i64 - self.elapsed_secs(now)
    }

    pub fn is_expired(&self, now: u64) -> bool {
        self.ttls.is_empty() || self.ttls.iter().any(|f| self.remaining(f, now) <= 0)
    }

    /// Serve this answer to `query`, refreshing it from `upstream` first if
    /// any record has run out of TTL.
    ///
    /// At most one refresh happens per call. If the refreshed reply is itself
    /// already expired the upstream is misbehaving and the call fails with
    /// `MalformedResponse`. A failed refresh leaves the stale entry untouched.
    pub async fn get_response(
        &mut self,
        query: &Query,
        upstream: &dyn Upstream,
        clock: &dyn Clock,
    ) -> Result<Resolution> {
        let mut refreshed = false;

        loop {
            if let Some(bytes) = self.render(query.id(), clock.now_millis()) {
                return Ok(if refreshed {
                    Resolution::Refreshed(bytes)
                } else {
                    Resolution::Fresh(bytes)
                });
            }
            if refreshed {
                return Err(Error::MalformedResponse("refreshed answer is already expired"));
            }

            self.refresh(upstream, clock).await?;
            refreshed = true;
        }
    }

    /// Fetch the original query again and replace this entry with the reply.
    pub async fn refresh(&mut self, upstream: &dyn Upstream, clock: &dyn Clock) -> Result<()> {
        let response = upstream.forward(&self.query).await?;
        let ttls = locate_ttls(&self.query, &response)?;

        self.buffer = response;
        self.captured_at = clock.now_millis();
        self.ttls = ttls;

        Ok(())
    }

    /// Rewrite id and TTLs for `now`, or `None` if any TTL has run out.
    fn render(&mut self, id: [u8; 2], now: u64) -> Option<Vec<u8>> {
        let elapsed = self.elapsed_secs(now);
        if self.ttls.iter().any(|f| f.original as i64 - elapsed <= 0) {
            return None;
        }

        self.buffer[..2].copy_from_slice(&id);
        for field in &self.ttls {
            let remaining = (field.original as i64 - elapsed) as u32;
            self.buffer[field.offset..field.offset + 4].copy_from_slice(&remaining.to_be_bytes());
        }

        Some(self.buffer.clone())
    }

    /// Re-walk a deserialized entry and check it still describes its buffer.
    pub(crate) fn verify(&self) -> Result<()> {
        self.query.verify()?;

        let offsets = locate_ttls(&self.query, &self.buffer)?;
        let consistent = offsets.len() == self.ttls.len()
            && offsets
                .iter()
                .zip(&self.ttls)
                .all(|(walked, stored)| walked.offset == stored.offset);

        if !consistent {
            return Err(Error::MalformedResponse("stored TTL offsets do not match the record walk"));
        }
        Ok(())
    }
}

/// Walk the answer and authority sections of `response`, collecting one
/// `TtlField` per record.
fn locate_ttls(query: &Query, response: &[u8]) -> Result<Vec<TtlField>> {
    if response.len() < HEADER_LEN {
        return Err(Error::MalformedResponse("header truncated"));
    }

    let question_end = wire::skip_question(response, HEADER_LEN)
        .ok_or(Error::MalformedResponse("question truncated"))?;
    if response[HEADER_LEN..question_end] != *query.question() {
        return Err(Error::MalformedResponse("question does not match query"));
    }

    let answers = wire::read_u16(response, ANCOUNT_OFFSET).unwrap_or(0) as usize;
    let authority = wire::read_u16(response, NSCOUNT_OFFSET).unwrap_or(0) as usize;
    let count = answers + authority;

    let mut ttls = Vec::with_capacity(count);
    let mut offset = question_end;
    for _ in 0..count {
        let record = wire::locate_record_ttl(response, offset)
            .ok_or(Error::MalformedResponse("record runs past end of message"))?;
        ttls.push(TtlField {
            offset: record.ttl_offset,
            original: wire::read_u32(response, record.ttl_offset).unwrap_or(0),
        });
        offset = record.next;
    }

    Ok(ttls)
}
