//! PEL section codecs: a tagged union of concrete section records behind
//! a `Section` trait, dispatched by a leading 2-byte id.

mod extended_user_data;
mod extended_user_header;
mod failing_mtms;
mod generic;
mod private_header;
mod src;
mod user_data;
pub mod user_header;

pub use extended_user_data::ExtendedUserData;
pub use extended_user_header::{build_symptom_id as extended_user_header_build_symptom_id, ExtendedUserHeader};
pub use failing_mtms::FailingMtms;
pub use generic::GenericSection;
pub use private_header::PrivateHeader;
pub use src::{
    Callout, Callouts, FruIdentity, Mru, PceIdentity, Src, HW5_CHECKSTOP, HW5_DECONFIGURED,
    HW5_GUARDED, HW5_TERMINATE_FW,
};
pub use user_data::UserData;
pub use user_header::UserHeader;

use crate::stream::Stream;

pub const ID_PRIVATE_HEADER: u16 = u16::from_be_bytes(*b"PH");
pub const ID_USER_HEADER: u16 = u16::from_be_bytes(*b"UH");
pub const ID_PRIMARY_SRC: u16 = u16::from_be_bytes(*b"PS");
pub const ID_SECONDARY_SRC: u16 = u16::from_be_bytes(*b"SS");
pub const ID_EXTENDED_USER_HEADER: u16 = u16::from_be_bytes(*b"EH");
pub const ID_FAILING_MTMS: u16 = u16::from_be_bytes(*b"MT");
pub const ID_USER_DATA: u16 = u16::from_be_bytes(*b"UD");
pub const ID_EXTENDED_USER_DATA: u16 = u16::from_be_bytes(*b"ED");
pub const ID_CALLOUTS: u16 = u16::from_be_bytes(*b"CL");

pub const MINIMUM_SECTION_SIZE: u16 = 8;

/// Every section opens with this 8-byte header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionHeader {
    pub id: u16,
    pub size: u16,
    pub version: u8,
    pub subtype: u8,
    pub component_id: u16,
}

impl SectionHeader {
    pub const SIZE: usize = 8;

    pub fn new(id: u16, size: u16, version: u8, subtype: u8, component_id: u16) -> Self {
        Self { id, size, version, subtype, component_id }
    }

    pub fn flatten(&self, stream: &mut Stream) {
        stream.write_u16(self.id);
        stream.write_u16(self.size);
        stream.write_u8(self.version);
        stream.write_u8(self.subtype);
        stream.write_u16(self.component_id);
    }

    pub fn read(stream: &mut Stream) -> crate::error::Result<Self> {
        let id = stream.read_u16()?;
        let size = stream.read_u16()?;
        let version = stream.read_u8()?;
        let subtype = stream.read_u8()?;
        let component_id = stream.read_u16()?;
        Ok(Self { id, size, version, subtype, component_id })
    }

    pub fn valid(&self) -> bool {
        self.size >= MINIMUM_SECTION_SIZE
    }
}

/// Common behavior of every concrete section type.
pub trait Section {
    fn header(&self) -> SectionHeader;
    fn flatten(&self, stream: &mut Stream);
    fn flattened_size(&self) -> usize;
    fn valid(&self) -> bool;
}

/// Sections whose body may be reduced to free space in the owning PEL
///.
pub trait Shrinkable: Section {
    /// Reduces body length to the largest 4-byte-aligned value
    /// `<= new_size - header - fixed_fields` that is still `>=` the
    /// section-specific minimum. Returns `false` (section unchanged) if
    /// no such size exists.
    fn shrink(&mut self, new_size: usize) -> bool;

    fn minimum_size(&self) -> usize;
}

/// The tagged union itself.
#[derive(Debug, Clone)]
pub enum PelSection {
    PrivateHeader(PrivateHeader),
    UserHeader(UserHeader),
    Src(Src),
    ExtendedUserHeader(ExtendedUserHeader),
    FailingMtms(FailingMtms),
    UserData(UserData),
    ExtendedUserData(ExtendedUserData),
    Generic(GenericSection),
}

impl PelSection {
    pub fn header(&self) -> SectionHeader {
        match self {
            PelSection::PrivateHeader(s) => s.header(),
            PelSection::UserHeader(s) => s.header(),
            PelSection::Src(s) => s.header(),
            PelSection::ExtendedUserHeader(s) => s.header(),
            PelSection::FailingMtms(s) => s.header(),
            PelSection::UserData(s) => s.header(),
            PelSection::ExtendedUserData(s) => s.header(),
            PelSection::Generic(s) => s.header(),
        }
    }

    pub fn flatten(&self, stream: &mut Stream) {
        match self {
            PelSection::PrivateHeader(s) => s.flatten(stream),
            PelSection::UserHeader(s) => s.flatten(stream),
            PelSection::Src(s) => s.flatten(stream),
            PelSection::ExtendedUserHeader(s) => s.flatten(stream),
            PelSection::FailingMtms(s) => s.flatten(stream),
            PelSection::UserData(s) => s.flatten(stream),
            PelSection::ExtendedUserData(s) => s.flatten(stream),
            PelSection::Generic(s) => s.flatten(stream),
        }
    }

    pub fn flattened_size(&self) -> usize {
        match self {
            PelSection::PrivateHeader(s) => s.flattened_size(),
            PelSection::UserHeader(s) => s.flattened_size(),
            PelSection::Src(s) => s.flattened_size(),
            PelSection::ExtendedUserHeader(s) => s.flattened_size(),
            PelSection::FailingMtms(s) => s.flattened_size(),
            PelSection::UserData(s) => s.flattened_size(),
            PelSection::ExtendedUserData(s) => s.flattened_size(),
            PelSection::Generic(s) => s.flattened_size(),
        }
    }

    pub fn valid(&self) -> bool {
        match self {
            PelSection::PrivateHeader(s) => s.valid(),
            PelSection::UserHeader(s) => s.valid(),
            PelSection::Src(s) => s.valid(),
            PelSection::ExtendedUserHeader(s) => s.valid(),
            PelSection::FailingMtms(s) => s.valid(),
            PelSection::UserData(s) => s.valid(),
            PelSection::ExtendedUserData(s) => s.valid(),
            PelSection::Generic(s) => s.valid(),
        }
    }

    /// Attempts to shrink the section to fit within `new_size` total
    /// bytes (header included). Non-shrinkable sections always fail.
    pub fn shrink(&mut self, new_size: usize) -> bool {
        match self {
            PelSection::UserData(s) => s.shrink(new_size),
            PelSection::ExtendedUserData(s) => s.shrink(new_size),
            _ => false,
        }
    }
}

/// Peeks the section id (without advancing) and dispatches to the
/// concrete codec. An unknown id, or fewer than 2 bytes remaining,
/// yields a `Generic` section marked invalid.
pub fn read_section(stream: &mut Stream) -> PelSection {
    if stream.remaining() < 2 {
        return PelSection::Generic(GenericSection::invalid_from_remaining(stream));
    }
    let peek = stream.peek_bytes(2).expect("checked remaining >= 2 above");
    let id = u16::from_be_bytes([peek[0], peek[1]]);

    match id {
        ID_PRIVATE_HEADER => PrivateHeader::read(stream)
            .map(PelSection::PrivateHeader)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        ID_USER_HEADER => UserHeader::read(stream)
            .map(PelSection::UserHeader)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        ID_PRIMARY_SRC | ID_SECONDARY_SRC => Src::read(stream)
            .map(PelSection::Src)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        ID_EXTENDED_USER_HEADER => ExtendedUserHeader::read(stream)
            .map(PelSection::ExtendedUserHeader)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        ID_FAILING_MTMS => FailingMtms::read(stream)
            .map(PelSection::FailingMtms)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        ID_USER_DATA => UserData::read(stream)
            .map(PelSection::UserData)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        ID_EXTENDED_USER_DATA => ExtendedUserData::read(stream)
            .map(PelSection::ExtendedUserData)
            .unwrap_or_else(|_| PelSection::Generic(GenericSection::invalid_from_remaining(stream))),
        _ => GenericSection::read(stream).map(PelSection::Generic).unwrap_or_else(|_| {
            PelSection::Generic(GenericSection::invalid_from_remaining(stream))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_section_header_is_invalid() {
        let mut s = Stream::new();
        s.write_u16(ID_USER_DATA);
        s.write_u16(4); // size < 8 -> invalid
        s.write_u8(1);
        s.write_u8(0);
        s.write_u16(0);
        s.set_offset(0).unwrap();
        let section = read_section(&mut s);
        assert!(!section.valid());
    }

    #[test]
    fn too_few_bytes_yields_invalid_generic() {
        let mut s = Stream::from_bytes(vec![0x55]);
        let section = read_section(&mut s);
        assert!(matches!(section, PelSection::Generic(_)));
        assert!(!section.valid());
    }
}
