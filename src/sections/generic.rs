//! Fallback section for unrecognized ids: preserves bytes verbatim so a
//! PEL with sections from a newer schema still round-trips.

use super::{Section, SectionHeader};
use crate::error::Result;
use crate::stream::Stream;

#[derive(Debug, Clone)]
pub struct GenericSection {
    header: SectionHeader,
    body: Vec<u8>,
    valid: bool,
}

impl GenericSection {
    pub fn read(stream: &mut Stream) -> Result<Self> {
        let start = stream.offset();
        let header = SectionHeader::read(stream)?;
        if !header.valid() {
            // Don't trust `size`; just take whatever's left so the bytes
            // aren't lost, but mark the section invalid.
            let body = stream.read_bytes(stream.remaining())?;
            return Ok(Self { header, body, valid: false });
        }
        let body_len = header.size as usize - SectionHeader::SIZE;
        let body = stream.read_bytes(body_len.min(stream.remaining()))?;
        let valid = body.len() == body_len;
        let _ = start;
        Ok(Self { header, body, valid })
    }

    /// Used by the factory when there aren't even 2 bytes to peek an id
    /// from, or when a concrete codec's `read` failed outright.
    pub fn invalid_from_remaining(stream: &mut Stream) -> Self {
        let body = stream.read_bytes(stream.remaining()).unwrap_or_default();
        Self {
            header: SectionHeader::new(0, 0, 0, 0, 0),
            body,
            valid: false,
        }
    }
}

impl Section for GenericSection {
    fn header(&self) -> SectionHeader {
        self.header
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header.flatten(stream);
        stream.write_bytes(&self.body);
    }

    fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + self.body.len()
    }

    fn valid(&self) -> bool {
        self.valid
    }
}
