//! Header compression (RFC 7541) on top of `fluke-hpack`.
//!
//! Each session owns one decoder for client blocks and one encoder for
//! response blocks; both carry a dynamic table, so blocks must pass through
//! them in wire order.

use crate::error::FrameError;

/// A single HTTP/2 header field, kept as raw bytes exactly as decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct H2Header {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl H2Header {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Decodes client header blocks.
pub struct HpackDecoder {
    inner: fluke_hpack::Decoder<'static>,
}

impl std::fmt::Debug for HpackDecoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackDecoder").finish()
    }
}

impl Default for HpackDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackDecoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Decoder::new(),
        }
    }

    /// Decode an HPACK-encoded header block.
    ///
    /// A failure leaves the dynamic table unusable, so it is always a
    /// connection-level COMPRESSION_ERROR.
    pub fn decode(&mut self, data: &[u8]) -> Result<Vec<H2Header>, FrameError> {
        let pairs = self
            .inner
            .decode(data)
            .map_err(|e| FrameError::Compression(format!("{:?}", e)))?;
        Ok(pairs
            .into_iter()
            .map(|(name, value)| H2Header { name, value })
            .collect())
    }
}

/// Encodes response header blocks.
pub struct HpackEncoder {
    inner: fluke_hpack::Encoder<'static>,
}

impl std::fmt::Debug for HpackEncoder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HpackEncoder").finish()
    }
}

impl Default for HpackEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HpackEncoder {
    pub fn new() -> Self {
        Self {
            inner: fluke_hpack::Encoder::new(),
        }
    }

    pub fn encode(&mut self, headers: &[H2Header]) -> Vec<u8> {
        let pairs: Vec<(&[u8], &[u8])> = headers
            .iter()
            .map(|h| (h.name.as_slice(), h.value.as_slice()))
            .collect();
        self.inner.encode(pairs)
    }
}
