//! UserData section: opaque `(component_id, subtype, version)`-tagged
//! payload, shrinkable down to a 12-byte minimum.

use super::{Section, SectionHeader, Shrinkable, ID_USER_DATA};
use crate::error::Result;
use crate::stream::Stream;

pub const MINIMUM_SIZE: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserData {
    pub component_id: u16,
    pub subtype: u8,
    pub version: u8,
    pub data: Vec<u8>,
    valid: bool,
}

fn align4(n: usize) -> usize {
    (n + 3) / 4 * 4
}

/// Largest 4-byte-aligned value <= `n`, for `shrink`'s down-rounding budget.
fn align4_down(n: usize) -> usize {
    (n / 4) * 4
}

impl UserData {
    pub fn new(component_id: u16, subtype: u8, version: u8, data: Vec<u8>) -> Self {
        Self { component_id, subtype, version, data, valid: true }
    }

    fn body_len(&self) -> usize {
        align4(self.data.len())
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        if !header.valid() {
            let body = stream.read_bytes(stream.remaining())?;
            return Ok(Self {
                component_id: header.component_id,
                subtype: header.subtype,
                version: header.version,
                data: body,
                valid: false,
            });
        }
        let body_len = header.size as usize - SectionHeader::SIZE;
        let data = stream.read_bytes(body_len)?;
        let valid = header.id == ID_USER_DATA;
        Ok(Self {
            component_id: header.component_id,
            subtype: header.subtype,
            version: header.version,
            data,
            valid,
        })
    }
}

impl Section for UserData {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(
            ID_USER_DATA,
            (SectionHeader::SIZE + self.body_len()) as u16,
            self.version,
            self.subtype,
            self.component_id,
        )
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        let mut padded = self.data.clone();
        padded.resize(self.body_len(), 0);
        stream.write_bytes(&padded);
    }

    fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + self.body_len()
    }

    fn valid(&self) -> bool {
        self.valid
    }
}

impl Shrinkable for UserData {
    fn minimum_size(&self) -> usize {
        SectionHeader::SIZE + MINIMUM_SIZE
    }

    fn shrink(&mut self, new_size: usize) -> bool {
        if new_size < self.minimum_size() {
            return false;
        }
        let target_body = align4_down(new_size - SectionHeader::SIZE).min(self.body_len());
        if target_body < MINIMUM_SIZE {
            return false;
        }
        self.data.truncate(target_body);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_4_byte_alignment() {
        let ud = UserData::new(1, 2, 3, vec![1, 2, 3]);
        let mut s = Stream::new();
        ud.flatten(&mut s);
        assert_eq!(ud.header().size as usize, s.as_bytes().len());
        assert_eq!(s.as_bytes().len() % 4, 0);

        s.set_offset(0).unwrap();
        let back = UserData::read(&mut s).unwrap();
        assert!(back.valid());
    }

    #[test]
    fn shrink_refuses_below_minimum() {
        let mut ud = UserData::new(1, 2, 3, vec![0u8; 4]);
        assert!(!ud.shrink(4));
    }

    #[test]
    fn shrink_succeeds_when_room_available() {
        let mut ud = UserData::new(1, 2, 3, vec![0u8; 100]);
        let before = ud.flattened_size();
        assert!(ud.shrink(SectionHeader::SIZE + 16));
        assert!(ud.flattened_size() < before);
        assert!(ud.flattened_size() % 4 == 0);
    }

    #[test]
    fn shrink_is_idempotent_at_minimum() {
        let mut ud = UserData::new(1, 2, 3, vec![0u8; MINIMUM_SIZE]);
        let size = ud.flattened_size();
        assert!(ud.shrink(size));
        assert_eq!(ud.flattened_size(), size);
    }
}
