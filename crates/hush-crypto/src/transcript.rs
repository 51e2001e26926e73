//! Canonical byte encoding for hashed fields.
//!
//! Every field is written as `tag(u32 be) || len(u32 be) || bytes` after a
//! leading domain string, so event ids and signing inputs never depend on
//! field boundaries or serializer whitespace.

use bytes::{BufMut, BytesMut};
use sha2::{Digest, Sha256};

/// Field tags.
pub mod tags {
    pub const DOMAIN: u32 = 0;
    pub const SENDER: u32 = 1;
    pub const RECIPIENT: u32 = 2;
    pub const KIND: u32 = 3;
    pub const TIMESTAMP: u32 = 4;
    pub const CONTENT: u32 = 5;
}

#[derive(Clone, Debug, Default)]
pub struct Transcript {
    buf: BytesMut,
}

impl Transcript {
    pub fn new(domain: &'static str) -> Self {
        let mut transcript = Self {
            buf: BytesMut::with_capacity(256),
        };
        transcript.append_str(tags::DOMAIN, domain);
        transcript
    }

    fn field(&mut self, tag: u32, len: usize) {
        self.buf.put_u32(tag);
        self.buf.put_u32(len as u32);
    }

    pub fn append_bytes(&mut self, tag: u32, data: &[u8]) -> &mut Self {
        self.field(tag, data.len());
        self.buf.put_slice(data);
        self
    }

    pub fn append_u64(&mut self, tag: u32, value: u64) -> &mut Self {
        self.field(tag, 8);
        self.buf.put_u64(value);
        self
    }

    pub fn append_str(&mut self, tag: u32, value: &str) -> &mut Self {
        self.append_bytes(tag, value.as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// SHA-256 of the encoded fields.
    pub fn finalize(self) -> [u8; 32] {
        Sha256::digest(&self.buf).into()
    }
}
