//! System Reference Code (SRC) section: the primary diagnostic section
//! inside a PEL.

use super::{Section, SectionHeader, ID_CALLOUTS, ID_PRIMARY_SRC};
use crate::ascii_string::{self, ASCII_STRING_SIZE};
use crate::error::Result;
use crate::stream::Stream;

pub const SRC_VERSION: u8 = 0x02;
pub const HEXWORD_COUNT: u8 = 9;
pub const FLAG_ADDITIONAL_SUBSECTIONS: u8 = 0x80;

/// hex-word 5 error-status bitfield bits.
pub const HW5_DECONFIGURED: u32 = 0x0002_0000;
pub const HW5_GUARDED: u32 = 0x0001_0000;
pub const HW5_TERMINATE_FW: u32 = 0x0000_0001;
pub const HW5_CHECKSTOP: u32 = 0x0000_0002;

const PREFIX_FIXED_FIELDS: usize = 64; // version..reserved3: 72-byte prefix minus the 8-byte section header
const RESERVED3_LEN: usize = 24;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Src {
    pub flags: u8,
    /// hex-words 2 through 9 (index 0 == hex-word 2).
    pub hex_words: [u32; 8],
    pub ascii_string: String,
    pub callouts: Option<Callouts>,
    valid: bool,
}

impl Src {
    pub fn new(ascii_string: String) -> Self {
        Self {
            flags: 0,
            hex_words: [0; 8],
            ascii_string,
            callouts: None,
            valid: true,
        }
    }

    pub fn hex_word(&self, n: usize) -> u32 {
        assert!((2..=9).contains(&n));
        self.hex_words[n - 2]
    }

    pub fn set_hex_word(&mut self, n: usize, value: u32) {
        assert!((2..=9).contains(&n));
        self.hex_words[n - 2] = value;
    }

    pub fn set_callouts(&mut self, callouts: Callouts) {
        self.flags |= FLAG_ADDITIONAL_SUBSECTIONS;
        self.callouts = Some(callouts);
    }

    fn body_size(&self) -> usize {
        let mut size = PREFIX_FIXED_FIELDS + ASCII_STRING_SIZE;
        if let Some(c) = &self.callouts {
            size += c.flattened_size();
        }
        size
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        let _version = stream.read_u8()?;
        let flags = stream.read_u8()?;
        let _hexword_count = stream.read_u8()?;
        let _reserved_pad = stream.read_u8()?;
        let _size_field = stream.read_u16()?;
        let _reserved2 = stream.read_u16()?;
        let mut hex_words = [0u32; 8];
        for w in hex_words.iter_mut() {
            *w = stream.read_u32()?;
        }
        let _reserved3 = stream.read_bytes(RESERVED3_LEN)?;
        let ascii_raw = stream.read_bytes(ASCII_STRING_SIZE)?;
        let ascii_string = ascii_string::sanitize(&ascii_raw);

        let callouts = if flags & FLAG_ADDITIONAL_SUBSECTIONS != 0 && stream.remaining() > 0 {
            Some(Callouts::read(stream)?)
        } else {
            None
        };

        let valid = header.valid()
            && (header.id == ID_PRIMARY_SRC || header.id == super::ID_SECONDARY_SRC)
            && ascii_raw.len() == ASCII_STRING_SIZE;

        Ok(Self { flags, hex_words, ascii_string, callouts, valid })
    }
}

impl Section for Src {
    fn header(&self) -> SectionHeader {
        SectionHeader::new(
            ID_PRIMARY_SRC,
            (SectionHeader::SIZE + self.body_size()) as u16,
            SRC_VERSION,
            0,
            0,
        )
    }

    fn flatten(&self, stream: &mut Stream) {
        self.header().flatten(stream);
        stream.write_u8(SRC_VERSION);
        stream.write_u8(self.flags);
        stream.write_u8(HEXWORD_COUNT);
        stream.write_u8(0); // reserved_pad
        stream.write_u16(self.header().size);
        stream.write_u16(0); // reserved2
        for w in self.hex_words {
            stream.write_u32(w);
        }
        stream.write_bytes(&[0u8; RESERVED3_LEN]);
        stream.write_ascii_padded(&self.ascii_string, ASCII_STRING_SIZE, b' ');
        if let Some(c) = &self.callouts {
            c.flatten(stream);
        }
    }

    fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + self.body_size()
    }

    fn valid(&self) -> bool {
        self.valid && self.callouts.as_ref().map(|c| c.valid()).unwrap_or(true)
    }
}

/// Ordered list of callouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callouts {
    pub entries: Vec<Callout>,
}

impl Callouts {
    pub fn new(entries: Vec<Callout>) -> Self {
        Self { entries }
    }

    fn body_size(&self) -> usize {
        self.entries.iter().map(|c| c.flattened_size()).sum()
    }

    pub fn flatten(&self, stream: &mut Stream) {
        let header = SectionHeader::new(
            ID_CALLOUTS,
            (SectionHeader::SIZE + self.body_size()) as u16,
            1,
            0,
            self.entries.len() as u16,
        );
        header.flatten(stream);
        for c in &self.entries {
            c.flatten(stream);
        }
    }

    pub fn flattened_size(&self) -> usize {
        SectionHeader::SIZE + self.body_size()
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        let header = SectionHeader::read(stream)?;
        if !header.valid() {
            return Ok(Self { entries: Vec::new() });
        }
        let count = header.component_id as usize; // entry count, stashed in component_id
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            if stream.remaining() < Callout::MIN_SIZE {
                break;
            }
            entries.push(Callout::read(stream)?);
        }
        Ok(Self { entries })
    }

    pub fn valid(&self) -> bool {
        self.entries.iter().all(|c| c.valid())
    }
}

const LOCATION_CODE_FIELD_LEN: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Callout {
    pub priority: char,
    pub flags: u8,
    pub location_code: Option<String>,
    pub fru_identity: Option<FruIdentity>,
    pub pce_identity: Option<PceIdentity>,
    pub mrus: Vec<Mru>,
}

const CO_HAS_LOCATION: u8 = 0x80;
const CO_HAS_FRU_IDENTITY: u8 = 0x40;
const CO_HAS_PCE_IDENTITY: u8 = 0x20;
const CO_HAS_MRUS: u8 = 0x10;

impl Callout {
    const MIN_SIZE: usize = 2 + 1 + 1 + 1; // length + priority + flags + location-present-marker

    pub fn new(priority: char) -> Self {
        Self {
            priority,
            flags: 0,
            location_code: None,
            fru_identity: None,
            pce_identity: None,
            mrus: Vec::new(),
        }
    }

    fn flattened_size(&self) -> usize {
        let mut size = 2 + 1 + 1; // length prefix + priority + flags
        if self.location_code.is_some() {
            size += LOCATION_CODE_FIELD_LEN;
        }
        if let Some(fru) = &self.fru_identity {
            size += fru.flattened_size();
        }
        if let Some(pce) = &self.pce_identity {
            size += pce.flattened_size();
        }
        if !self.mrus.is_empty() {
            size += 1 + self.mrus.len() * Mru::SIZE;
        }
        size
    }

    fn compute_flags(&self) -> u8 {
        let mut flags = 0u8;
        if self.location_code.is_some() {
            flags |= CO_HAS_LOCATION;
        }
        if self.fru_identity.is_some() {
            flags |= CO_HAS_FRU_IDENTITY;
        }
        if self.pce_identity.is_some() {
            flags |= CO_HAS_PCE_IDENTITY;
        }
        if !self.mrus.is_empty() {
            flags |= CO_HAS_MRUS;
        }
        flags
    }

    fn flatten(&self, stream: &mut Stream) {
        let len = self.flattened_size() as u16;
        stream.write_u16(len);
        stream.write_u8(self.priority as u8);
        stream.write_u8(self.compute_flags());
        if let Some(loc) = &self.location_code {
            stream.write_ascii_padded(loc, LOCATION_CODE_FIELD_LEN, b' ');
        }
        if let Some(fru) = &self.fru_identity {
            fru.flatten(stream);
        }
        if let Some(pce) = &self.pce_identity {
            pce.flatten(stream);
        }
        if !self.mrus.is_empty() {
            stream.write_u8(self.mrus.len() as u8);
            for m in &self.mrus {
                m.flatten(stream);
            }
        }
    }

    fn read(stream: &mut Stream) -> Result<Self> {
        let len = stream.read_u16()? as usize;
        let priority = stream.read_u8()? as char;
        let flags = stream.read_u8()?;
        let mut remaining_in_entry = len.saturating_sub(4);

        let location_code = if flags & CO_HAS_LOCATION != 0 {
            remaining_in_entry = remaining_in_entry.saturating_sub(LOCATION_CODE_FIELD_LEN);
            Some(stream.read_ascii(LOCATION_CODE_FIELD_LEN)?)
        } else {
            None
        };

        let fru_identity = if flags & CO_HAS_FRU_IDENTITY != 0 {
            let (fru, consumed) = FruIdentity::read(stream)?;
            remaining_in_entry = remaining_in_entry.saturating_sub(consumed);
            Some(fru)
        } else {
            None
        };

        let pce_identity = if flags & CO_HAS_PCE_IDENTITY != 0 {
            let pce = PceIdentity::read(stream)?;
            remaining_in_entry = remaining_in_entry.saturating_sub(pce.flattened_size());
            Some(pce)
        } else {
            None
        };

        let mut mrus = Vec::new();
        if flags & CO_HAS_MRUS != 0 {
            let count = stream.read_u8()? as usize;
            for _ in 0..count {
                mrus.push(Mru::read(stream)?);
            }
        }
        let _ = remaining_in_entry;

        Ok(Self { priority, flags, location_code, fru_identity, pce_identity, mrus })
    }

    fn valid(&self) -> bool {
        crate::pel_values::priority_char_valid(self.priority)
    }
}

/// A tagged union of FRU identity variants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FruIdentity {
    Hardware { part_number: String, ccin: String, serial_number: String },
    MaintenanceProcedure { procedure: String },
    SymbolicFru { fru_id: String },
    SymbolicFruTrusted { fru_id: String, trusted_location_code: bool },
}

impl FruIdentity {
    const PART_NUMBER_LEN: usize = 8;
    const CCIN_LEN: usize = 4;
    const SERIAL_LEN: usize = 12;
    const PROCEDURE_LEN: usize = 8;
    const FRU_ID_LEN: usize = 8;

    fn flattened_size(&self) -> usize {
        1 + match self {
            FruIdentity::Hardware { .. } => {
                Self::PART_NUMBER_LEN + Self::CCIN_LEN + Self::SERIAL_LEN
            }
            FruIdentity::MaintenanceProcedure { .. } => Self::PROCEDURE_LEN,
            FruIdentity::SymbolicFru { .. } => Self::FRU_ID_LEN,
            FruIdentity::SymbolicFruTrusted { .. } => Self::FRU_ID_LEN + 1,
        }
    }

    fn flatten(&self, stream: &mut Stream) {
        match self {
            FruIdentity::Hardware { part_number, ccin, serial_number } => {
                stream.write_u8(0);
                stream.write_ascii_padded(part_number, Self::PART_NUMBER_LEN, b' ');
                stream.write_ascii_padded(ccin, Self::CCIN_LEN, b' ');
                stream.write_ascii_padded(serial_number, Self::SERIAL_LEN, b' ');
            }
            FruIdentity::MaintenanceProcedure { procedure } => {
                stream.write_u8(1);
                stream.write_ascii_padded(procedure, Self::PROCEDURE_LEN, b' ');
            }
            FruIdentity::SymbolicFru { fru_id } => {
                stream.write_u8(2);
                stream.write_ascii_padded(fru_id, Self::FRU_ID_LEN, b' ');
            }
            FruIdentity::SymbolicFruTrusted { fru_id, trusted_location_code } => {
                stream.write_u8(3);
                stream.write_ascii_padded(fru_id, Self::FRU_ID_LEN, b' ');
                stream.write_u8(if *trusted_location_code { 1 } else { 0 });
            }
        }
    }

    fn read(stream: &mut Stream) -> Result<(Self, usize)> {
        let tag = stream.read_u8()?;
        let fru = match tag {
            0 => FruIdentity::Hardware {
                part_number: stream.read_ascii(Self::PART_NUMBER_LEN)?,
                ccin: stream.read_ascii(Self::CCIN_LEN)?,
                serial_number: stream.read_ascii(Self::SERIAL_LEN)?,
            },
            1 => FruIdentity::MaintenanceProcedure {
                procedure: stream.read_ascii(Self::PROCEDURE_LEN)?,
            },
            2 => FruIdentity::SymbolicFru { fru_id: stream.read_ascii(Self::FRU_ID_LEN)? },
            _ => FruIdentity::SymbolicFruTrusted {
                fru_id: stream.read_ascii(Self::FRU_ID_LEN)?,
                trusted_location_code: stream.read_u8()? != 0,
            },
        };
        let consumed = match &fru {
            FruIdentity::Hardware { .. } => {
                1 + Self::PART_NUMBER_LEN + Self::CCIN_LEN + Self::SERIAL_LEN
            }
            FruIdentity::MaintenanceProcedure { .. } => 1 + Self::PROCEDURE_LEN,
            FruIdentity::SymbolicFru { .. } => 1 + Self::FRU_ID_LEN,
            FruIdentity::SymbolicFruTrusted { .. } => 1 + Self::FRU_ID_LEN + 1,
        };
        Ok((fru, consumed))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PceIdentity {
    pub machine_type_model: String,
    pub enclosure_name: String,
}

impl PceIdentity {
    const MTM_LEN: usize = 8;
    const ENCLOSURE_LEN: usize = 8;

    fn flattened_size(&self) -> usize {
        Self::MTM_LEN + Self::ENCLOSURE_LEN
    }

    fn flatten(&self, stream: &mut Stream) {
        stream.write_ascii_padded(&self.machine_type_model, Self::MTM_LEN, b' ');
        stream.write_ascii_padded(&self.enclosure_name, Self::ENCLOSURE_LEN, b' ');
    }

    fn read(stream: &mut Stream) -> Result<Self> {
        Ok(Self {
            machine_type_model: stream.read_ascii(Self::MTM_LEN)?,
            enclosure_name: stream.read_ascii(Self::ENCLOSURE_LEN)?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mru {
    pub id: u16,
    pub priority: char,
}

impl Mru {
    const SIZE: usize = 2 + 1 + 1; // id + priority + pad

    fn flatten(&self, stream: &mut Stream) {
        stream.write_u16(self.id);
        stream.write_u8(self.priority as u8);
        stream.write_u8(0);
    }

    fn read(stream: &mut Stream) -> Result<Self> {
        let id = stream.read_u16()?;
        let priority = stream.read_u8()? as char;
        let _pad = stream.read_u8()?;
        Ok(Self { id, priority })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_without_callouts() {
        let mut src = Src::new("BD37ABCD                        ".to_string());
        src.set_hex_word(4, 0xAABBCCDD);

        let mut s = Stream::new();
        src.flatten(&mut s);
        assert_eq!(src.header().size as usize, s.as_bytes().len());

        s.set_offset(0).unwrap();
        let back = Src::read(&mut s).unwrap();
        assert!(back.valid());
        assert_eq!(back.hex_word(4), 0xAABBCCDD);
        assert_eq!(back.ascii_string.trim_end(), "BD37ABCD");
    }

    #[test]
    fn round_trips_with_callouts() {
        let mut src = Src::new("BD37ABCD                        ".to_string());
        let mut callout = Callout::new('H');
        callout.location_code = Some("Ufcs-A3".to_string());
        callout.fru_identity = Some(FruIdentity::Hardware {
            part_number: "PN1234".to_string(),
            ccin: "ABCD".to_string(),
            serial_number: "SN12345678".to_string(),
        });
        src.set_callouts(Callouts::new(vec![callout]));

        let mut s = Stream::new();
        src.flatten(&mut s);
        assert_eq!(src.header().size as usize, s.as_bytes().len());

        s.set_offset(0).unwrap();
        let back = Src::read(&mut s).unwrap();
        assert!(back.valid());
        let callouts = back.callouts.unwrap();
        assert_eq!(callouts.entries.len(), 1);
        assert_eq!(callouts.entries[0].location_code.as_deref().unwrap().trim(), "Ufcs-A3");
    }
}
