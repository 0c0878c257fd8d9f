//! ExtendedUserData section: like UserData but carries the originating
//! creator-id in place of the plain component tag, with a 16-byte
//! minimum.

use super::{Section, SectionHeader, Shrinkable, ID_EXTENDED_USER_DATA};
use crate::error::Result;
use crate::stream::Stream;

pub const MINIMUM_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedUserData {
    pub component_id: u16,
    pub subtype: u8,
    pub version: u8,
    pub originator_id: u8,
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

impl ExtendedUserData {
    pub fn new(
        component_id: u16,
        subtype: u8,
        version: u8,
        originator_id: u8,
        data: Vec<u8>,
    ) -> Self {
        Self { component_id, subtype, version, originator_id, data, valid: true }
    }

    fn body_len(&self) -> usize {
        // 3 padding bytes after originator_id keep the body 4-byte
        // aligned before the variable payload starts.
        4 + align4(self.data.len())
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        if !header.valid() {
            let body = stream.read_bytes(stream.remaining())?;
            return Ok(Self {
                component_id: header.component_id,
                subtype: header.subtype,
                version: header.version,
                originator_id: 0,
                data: body,
                valid: false,
            });
        }
        let originator_id = stream.read_u8()?;
        let _reserved = stream.read_bytes(3)?;
        let data_len = header.size as usize - SectionHeader::SIZE - 4;
        let data = stream.read_bytes(data_len)?;
        let valid = header.id == ID_EXTENDED_USER_DATA;
        Ok(Self {
            component_id: header.component_id,
            subtype: header.subtype,
            version: header.version,
            originator_id,
            data,
            valid,
        })
    }
}

impl Section for ExtendedUserData {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(
            ID_EXTENDED_USER_DATA,
            (SectionHeader::SIZE + self.body_len()) as u16,
            self.version,
            self.subtype,
            self.component_id,
        )
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        stream.write_u8(self.originator_id);
        stream.write_bytes(&[0u8; 3]);
        let mut padded = self.data.clone();
        padded.resize(self.body_len() - 4, 0);
        stream.write_bytes(&padded);
    }

    fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + self.body_len()
    }

    fn valid(&self) -> bool {
        self.valid
    }
}

impl Shrinkable for ExtendedUserData {
    fn minimum_size(&self) -> usize {
        SectionHeader::SIZE + MINIMUM_SIZE
    }

    fn shrink(&mut self, new_size: usize) -> bool {
        if new_size < self.minimum_size() {
            return false;
        }
        let target_data_len =
            align4_down(new_size - SectionHeader::SIZE - 4).min(self.body_len() - 4);
        if 4 + target_data_len < MINIMUM_SIZE {
            return false;
        }
        self.data.truncate(target_data_len);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_with_originator_id() {
        let eud = ExtendedUserData::new(5, 1, 1, 0x42, vec![9, 9, 9, 9, 9]);
        let mut s = Stream::new();
        eud.flatten(&mut s);
        assert_eq!(eud.header().size as usize, s.as_bytes().len());
        assert_eq!(s.as_bytes().len() % 4, 0);

        s.set_offset(0).unwrap();
        let back = ExtendedUserData::read(&mut s).unwrap();
        assert!(back.valid());
        assert_eq!(back.originator_id, 0x42);
        assert_eq!(back.data, vec![9, 9, 9, 9, 9]);
    }

    #[test]
    fn shrink_refuses_below_minimum() {
        let mut eud = ExtendedUserData::new(5, 1, 1, 0x42, vec![0u8; 8]);
        assert!(!eud.shrink(SectionHeader::SIZE + 8));
    }

    #[test]
    fn shrink_succeeds_when_room_available() {
        let mut eud = ExtendedUserData::new(5, 1, 1, 0x42, vec![0u8; 200]);
        let before = eud.flattened_size();
        assert!(eud.shrink(SectionHeader::SIZE + 32));
        assert!(eud.flattened_size() < before);
        assert!(eud.flattened_size() % 4 == 0);
    }
}
