//! Message builders and scripted collaborators shared by unit tests.

use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::{BoxFuture, FutureExt};

use crate::error::{Error, Result};
use crate::query::Query;
use crate::upstream::Upstream;

pub fn build_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(512);

    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00]); // Flags: standard query, RD
    packet.extend_from_slice(&[0x00, 0x01]); // QDCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ANCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // NSCOUNT
    packet.extend_from_slice(&[0x00, 0x00]); // ARCOUNT

    encode_name(&mut packet, domain);
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01]); // Class: IN

    packet
}

/// Append an OPT pseudo-record advertising a 4096-byte payload.
pub fn with_edns(mut query: Vec<u8>) -> Vec<u8> {
    query.push(0x00); // root name
    query.extend_from_slice(&[0x00, 0x29]); // Type: OPT
    query.extend_from_slice(&[0x10, 0x00]); // UDP payload size
    query.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]); // ext-rcode, version, flags
    query.extend_from_slice(&[0x00, 0x00]); // RDLENGTH
    query[11] = 0x01;
    query
}

pub fn encode_name(buf: &mut Vec<u8>, domain: &str) {
    for label in domain.split('.').filter(|l| !l.is_empty()) {
        buf.push(label.len() as u8);
        buf.extend_from_slice(label.as_bytes());
    }
    buf.push(0);
}

pub enum Owner {
    /// Pointer to the question name at offset 12.
    Question,
    Name(String),
}

pub struct Record {
    pub owner: Owner,
    pub rtype: u16,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl Record {
    pub fn a_ptr(ttl: u32) -> Self {
        Self {
            owner: Owner::Question,
            rtype: 1,
            ttl,
            rdata: vec![93, 184, 216, 34],
        }
    }

    pub fn named(name: &str, rtype: u16, ttl: u32, rdata: &[u8]) -> Self {
        Self {
            owner: Owner::Name(name.to_string()),
            rtype,
            ttl,
            rdata: rdata.to_vec(),
        }
    }

    pub fn encode_into(&self, buf: &mut Vec<u8>) {
        match &self.owner {
            Owner::Question => buf.extend_from_slice(&[0xC0, 0x0C]),
            Owner::Name(name) => encode_name(buf, name),
        }
        buf.extend_from_slice(&self.rtype.to_be_bytes());
        buf.extend_from_slice(&[0x00, 0x01]); // Class: IN
        buf.extend_from_slice(&self.ttl.to_be_bytes());
        buf.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        buf.extend_from_slice(&self.rdata);
    }
}

/// Build a response to `query` (header + question, as forwarded upstream).
pub fn build_response(query: &[u8], answers: &[Record], authority: &[Record]) -> Vec<u8> {
    let mut response = query.to_vec();
    response[2] = 0x81;
    response[3] = 0x80;
    response[6..8].copy_from_slice(&(answers.len() as u16).to_be_bytes());
    response[8..10].copy_from_slice(&(authority.len() as u16).to_be_bytes());

    for record in answers.iter().chain(authority) {
        record.encode_into(&mut response);
    }

    response
}

/// Build a response for an already parsed query.
pub fn answer_for(query: &Query, answers: &[Record]) -> Vec<u8> {
    build_response(query.canonical(), answers, &[])
}

/// Upstream that replays queued replies and counts how often it was asked.
pub struct ScriptedUpstream {
    replies: Mutex<VecDeque<Vec<u8>>>,
    calls: AtomicUsize,
}

impl ScriptedUpstream {
    pub fn new(replies: Vec<Vec<u8>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn unreachable_addr() -> SocketAddr {
    SocketAddr::from(([192, 0, 2, 1], 53))
}

impl Upstream for ScriptedUpstream {
    fn forward<'a>(&'a self, _query: &'a Query) -> BoxFuture<'a, Result<Vec<u8>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let reply = self.replies.lock().unwrap().pop_front();

        async move {
            reply.ok_or_else(|| Error::UpstreamUnavailable {
                addr: unreachable_addr(),
                source: io::Error::new(io::ErrorKind::ConnectionRefused, "no scripted reply"),
            })
        }
        .boxed()
    }
}
