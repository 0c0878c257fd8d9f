//! ExtendedUserHeader section.

use super::{Section, SectionHeader, ID_EXTENDED_USER_HEADER};
use crate::bcd::BcdTime;
use crate::error::Result;
use crate::stream::Stream;

pub const EXTENDED_USER_HEADER_VERSION: u8 = 0x01;
const MTM_LEN: usize = 8;
const SERIAL_LEN: usize = 12;
const FW_VERSION_LEN: usize = 16;
pub const MAX_SYMPTOM_ID_LEN: usize = 80;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtendedUserHeader {
    pub machine_type_model: String,
    pub machine_serial: String,
    pub server_fw_version: String,
    pub subsystem_fw_version: String,
    pub reference_time: BcdTime,
    pub symptom_id: String,
    valid: bool,
}

fn padded_symptom_len(s: &str) -> usize {
    // NUL-terminated, then 4-byte padded.
    let with_nul = s.len() + 1;
    (with_nul + 3) / 4 * 4
}

impl ExtendedUserHeader {
    pub fn new(
        machine_type_model: String,
        machine_serial: String,
        server_fw_version: String,
        subsystem_fw_version: String,
        reference_time: BcdTime,
        symptom_id: String,
    ) -> Self {
        let valid = symptom_id.len() < MAX_SYMPTOM_ID_LEN;
        Self {
            machine_type_model,
            machine_serial,
            server_fw_version,
            subsystem_fw_version,
            reference_time,
            symptom_id,
            valid,
        }
    }

    fn body_size(&self) -> usize {
        MTM_LEN + SERIAL_LEN + FW_VERSION_LEN * 2 + BcdTime::SIZE + padded_symptom_len(&self.symptom_id)
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        let machine_type_model = stream.read_ascii(MTM_LEN)?;
        let machine_serial = stream.read_ascii(SERIAL_LEN)?;
        let server_fw_version = stream.read_ascii(FW_VERSION_LEN)?;
        let subsystem_fw_version = stream.read_ascii(FW_VERSION_LEN)?;
        let reference_time = BcdTime::read(stream)?;

        let symptom_bytes_len = header.size as usize
            - SectionHeader::SIZE
            - MTM_LEN
            - SERIAL_LEN
            - FW_VERSION_LEN * 2
            - BcdTime::SIZE;
        let symptom_raw = stream.read_bytes(symptom_bytes_len)?;
        let end = symptom_raw.iter().position(|&b| b == 0).unwrap_or(symptom_raw.len());
        let symptom_id = String::from_utf8_lossy(&symptom_raw[..end]).into_owned();

        let valid = header.valid() && header.id == ID_EXTENDED_USER_HEADER;
        Ok(Self {
            machine_type_model,
            machine_serial,
            server_fw_version,
            subsystem_fw_version,
            reference_time,
            symptom_id,
            valid,
        })
    }
}

impl Section for ExtendedUserHeader {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(
            ID_EXTENDED_USER_HEADER,
            (SectionHeader::SIZE + self.body_size()) as u16,
            EXTENDED_USER_HEADER_VERSION,
            0,
            0,
        )
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        stream.write_ascii_padded(&self.machine_type_model, MTM_LEN, b' ');
        stream.write_ascii_padded(&self.machine_serial, SERIAL_LEN, b' ');
        stream.write_ascii_padded(&self.server_fw_version, FW_VERSION_LEN, b' ');
        stream.write_ascii_padded(&self.subsystem_fw_version, FW_VERSION_LEN, b' ');
        self.reference_time.flatten(stream);
        stream.write_ascii_padded(&self.symptom_id, padded_symptom_len(&self.symptom_id), 0);
    }

    fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + self.body_size()
    }

    fn valid(&self) -> bool {
        self.valid
    }
}

/// Builds the symptom-id: first 8 ASCII chars of the SRC string,
/// underscore-joined with hex-formatted hex-words listed in the
/// registry (default word 3).
pub fn build_symptom_id(src_ascii: &str, src: &crate::sections::Src, words: &[usize]) -> String {
    let prefix: String = src_ascii.chars().take(8).collect();
    let mut parts = vec![prefix];
    for &w in words {
        if (2..=9).contains(&w) {
            parts.push(format!("{:08X}", src.hex_word(w)));
        }
    }
    parts.join("_")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn round_trips_byte_for_byte() {
        let euh = ExtendedUserHeader::new(
            "8335".to_string(),
            "SN12345".to_string(),
            "FW0100".to_string(),
            "SFW0010".to_string(),
            BcdTime::from_datetime(Utc::now()),
            "BD37ABCD_AABBCCDD".to_string(),
        );
        let mut s = Stream::new();
        euh.flatten(&mut s);
        assert_eq!(euh.header().size as usize, s.as_bytes().len());

        s.set_offset(0).unwrap();
        let back = ExtendedUserHeader::read(&mut s).unwrap();
        assert!(back.valid());
        assert_eq!(back.symptom_id, "BD37ABCD_AABBCCDD");
    }

    #[test]
    fn symptom_id_builder_defaults_to_word_three() {
        let mut src = crate::sections::Src::new("BD37ABCD                        ".to_string());
        src.set_hex_word(3, 0x11223344);
        let id = build_symptom_id(&src.ascii_string, &src, &[3]);
        assert_eq!(id, "BD37ABCD_11223344");
    }
}
