//! PrivateHeader section: always the first section in a PEL.

use super::{Section, SectionHeader, ID_PRIVATE_HEADER};
use crate::bcd::BcdTime;
use crate::error::Result;
use crate::stream::Stream;

pub const PRIVATE_HEADER_VERSION: u8 = 0x01;
pub const BODY_SIZE: usize = 44;
pub const TOTAL_SIZE: usize = SectionHeader::SIZE + BODY_SIZE;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrivateHeader {
    pub create_timestamp: BcdTime,
    pub commit_timestamp: BcdTime,
    pub creator_id: u8,
    pub log_type: u8,
    pub section_count: u8,
    pub obmc_id: u32,
    pub creator_version: [u8; 8],
    pub plid: u32,
    pub id: u32,
    valid: bool,
}

impl PrivateHeader {
    pub fn new(
        create_timestamp: BcdTime,
        commit_timestamp: BcdTime,
        creator_id: u8,
        obmc_id: u32,
        plid: u32,
        id: u32,
        section_count: u8,
    ) -> Self {
        Self {
            create_timestamp,
            commit_timestamp,
            creator_id,
            log_type: 0,
            section_count,
            obmc_id,
            creator_version: *b"00000000",
            plid,
            id,
            valid: true,
        }
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        let create_timestamp = BcdTime::read(stream)?;
        let commit_timestamp = BcdTime::read(stream)?;
        let creator_id = stream.read_u8()?;
        let log_type = stream.read_u8()?;
        let _reserved1 = stream.read_u8()?;
        let section_count = stream.read_u8()?;
        let _reserved2 = stream.read_u32()?;
        let obmc_id = stream.read_u32()?;
        let mut creator_version = [0u8; 8];
        creator_version.copy_from_slice(&stream.read_bytes(8)?);
        let plid = stream.read_u32()?;
        let id = stream.read_u32()?;

        let valid = header.valid() && header.id == ID_PRIVATE_HEADER && section_count >= 2;

        Ok(Self {
            create_timestamp,
            commit_timestamp,
            creator_id,
            log_type,
            section_count,
            obmc_id,
            creator_version,
            plid,
            id,
            valid,
        })
    }
}

impl Section for PrivateHeader {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(ID_PRIVATE_HEADER, TOTAL_SIZE as u16, PRIVATE_HEADER_VERSION, 0, 0)
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        self.create_timestamp.flatten(stream);
        self.commit_timestamp.flatten(stream);
        stream.write_u8(self.creator_id);
        stream.write_u8(self.log_type);
        stream.write_u8(0); // reserved1
        stream.write_u8(self.section_count);
        stream.write_u32(0); // reserved2
        stream.write_u32(self.obmc_id);
        stream.write_bytes(&self.creator_version);
        stream.write_u32(self.plid);
        stream.write_u32(self.id);
    }

    fn flattened_size(&self) -> usize {
        TOTAL_SIZE
    }

    fn valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pel_values::CREATOR_BMC;
    use chrono::Utc;

    #[test]
    fn round_trips_byte_for_byte() {
        let ts = BcdTime::from_datetime(Utc::now());
        let ph = PrivateHeader::new(ts, ts, CREATOR_BMC, 5, 42, 42, 2);

        let mut s = Stream::new();
        ph.flatten(&mut s);
        assert_eq!(ph.flattened_size(), s.as_bytes().len());
        assert_eq!(ph.header().size as usize, s.as_bytes().len());

        s.set_offset(0).unwrap();
        let back = PrivateHeader::read(&mut s).unwrap();
        assert!(back.valid());
        assert_eq!(ph, back);
    }

    #[test]
    fn section_count_below_two_is_invalid() {
        let ts = BcdTime::from_datetime(Utc::now());
        let mut ph = PrivateHeader::new(ts, ts, CREATOR_BMC, 5, 42, 42, 1);
        ph.section_count = 1;
        let mut s = Stream::new();
        ph.flatten(&mut s);
        s.set_offset(0).unwrap();
        let back = PrivateHeader::read(&mut s).unwrap();
        assert!(!back.valid());
    }
}
