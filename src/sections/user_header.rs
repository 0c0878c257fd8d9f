//! UserHeader section: always the second section in a PEL.

use super::{Section, SectionHeader, ID_USER_HEADER};
use crate::error::Result;
use crate::pel_values::{EventType, Severity};
use crate::stream::Stream;

pub const USER_HEADER_VERSION: u8 = 0x01;
pub const BODY_SIZE: usize = 8;
pub const TOTAL_SIZE: usize = SectionHeader::SIZE + BODY_SIZE;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TransmissionState {
    NewPel = 0,
    Sent = 1,
    Acked = 2,
}

impl TransmissionState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => TransmissionState::Sent,
            2 => TransmissionState::Acked,
            _ => TransmissionState::NewPel,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserHeader {
    pub subsystem: u8,
    pub event_scope: u8,
    pub severity: u8,
    pub event_type: u8,
    pub action_flags: u16,
    pub host_trans_state: TransmissionState,
    pub hmc_trans_state: TransmissionState,
    valid: bool,
}

impl UserHeader {
    pub fn new(subsystem: u8, severity: u8, event_type: u8, action_flags: u16) -> Self {
        let mut uh = Self {
            subsystem,
            event_scope: 0,
            severity,
            event_type,
            action_flags,
            host_trans_state: TransmissionState::NewPel,
            hmc_trans_state: TransmissionState::NewPel,
            valid: true,
        };
        uh.valid = uh.check_invariant();
        uh
    }

    fn check_invariant(&self) -> bool {
        match Severity::from_u8(self.severity) {
            Some(sev) if sev.is_informational() => {
                matches!(EventType::from_u8_raw(self.event_type), Some(EventType::Informational))
            }
            _ => true,
        }
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        let subsystem = stream.read_u8()?;
        let event_scope = stream.read_u8()?;
        let severity = stream.read_u8()?;
        let event_type = stream.read_u8()?;
        let action_flags = stream.read_u16()?;
        let host_trans_state = TransmissionState::from_u8(stream.read_u8()?);
        let hmc_trans_state = TransmissionState::from_u8(stream.read_u8()?);

        let mut uh = Self {
            subsystem,
            event_scope,
            severity,
            event_type,
            action_flags,
            host_trans_state,
            hmc_trans_state,
            valid: header.valid() && header.id == ID_USER_HEADER,
        };
        uh.valid = uh.valid && uh.check_invariant();
        Ok(uh)
    }
}

impl Section for UserHeader {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(ID_USER_HEADER, TOTAL_SIZE as u16, USER_HEADER_VERSION, 0, 0)
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        stream.write_u8(self.subsystem);
        stream.write_u8(self.event_scope);
        stream.write_u8(self.severity);
        stream.write_u8(self.event_type);
        stream.write_u16(self.action_flags);
        stream.write_u8(self.host_trans_state as u8);
        stream.write_u8(self.hmc_trans_state as u8);
    }

    fn flattened_size(&self) -> usize {
        TOTAL_SIZE
    }

    fn valid(&self) -> bool {
        self.valid
    }
}

impl EventType {
    fn from_u8_raw(v: u8) -> Option<EventType> {
        Some(match v {
            0x00 => EventType::NotApplicable,
            0x01 => EventType::Informational,
            0x02 => EventType::Tracing,
            0x03 => EventType::InternalFailure,
            0x04 => EventType::Dump,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_byte_for_byte() {
        let uh = UserHeader::new(0x70, Severity::Predictive.as_u8(), 0x00, 0x9000);
        let mut s = Stream::new();
        uh.flatten(&mut s);
        assert_eq!(uh.header().size as usize, s.as_bytes().len());

        s.set_offset(0).unwrap();
        let back = UserHeader::read(&mut s).unwrap();
        assert!(back.valid());
        assert_eq!(uh, back);
    }

    #[test]
    fn informational_severity_requires_informational_event_type() {
        let uh = UserHeader::new(0x70, Severity::Informational.as_u8(), 0x03, 0x1000);
        assert!(!uh.valid());
    }
}
