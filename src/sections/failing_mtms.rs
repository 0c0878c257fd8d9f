//! FailingMTMS section: machine type/model/serial snapshot at creation
//! time.

use super::{Section, SectionHeader, ID_FAILING_MTMS};
use crate::error::Result;
use crate::stream::Stream;

pub const FAILING_MTMS_VERSION: u8 = 0x01;
const MTM_LEN: usize = 8;
const SERIAL_LEN: usize = 12;
const BODY_SIZE: usize = MTM_LEN + SERIAL_LEN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailingMtms {
    pub machine_type_model: String,
    pub machine_serial: String,
    valid: bool,
}

impl FailingMtms {
    pub fn new(machine_type_model: String, machine_serial: String) -> Self {
        Self { machine_type_model, machine_serial, valid: true }
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        let machine_type_model = stream.read_ascii(MTM_LEN)?;
        let machine_serial = stream.read_ascii(SERIAL_LEN)?;
        let valid = header.valid() && header.id == ID_FAILING_MTMS;
        Ok(Self { machine_type_model, machine_serial, valid })
    }
}

impl Section for FailingMtms {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(
            ID_FAILING_MTMS,
            (SectionHeader::SIZE + BODY_SIZE) as u16,
            FAILING_MTMS_VERSION,
            0,
            0,
        )
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        stream.write_ascii_padded(&self.machine_type_model, MTM_LEN, b' ');
        stream.write_ascii_padded(&self.machine_serial, SERIAL_LEN, b' ');
    }

    fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + BODY_SIZE
    }

    fn valid(&self) -> bool {
        self.valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_byte_for_byte() {
        let mtms = FailingMtms::new("8335".to_string(), "SN0001".to_string());
        let mut s = Stream::new();
        mtms.flatten(&mut s);
        assert_eq!(mtms.header().size as usize, s.as_bytes().len());

        s.set_offset(0).unwrap();
        let back = FailingMtms::read(&mut s).unwrap();
        assert!(back.valid());
        assert_eq!(back.machine_type_model.trim(), "8335");
    }
}
