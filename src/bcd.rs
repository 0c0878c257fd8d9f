//! Binary-coded-decimal date/time tuple used by PrivateHeader timestamps
//! and filenames.

use chrono::{DateTime, Datelike, TimeZone, Timelike, Utc};

use crate::error::Result;
use crate::stream::Stream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BcdTime {
    pub year_msb: u8,
    pub year_lsb: u8,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub hundredth: u8,
}

fn to_bcd(v: u32) -> u8 {
    (((v / 10) % 10) * 16 + (v % 10)) as u8
}

fn from_bcd(v: u8) -> u32 {
    ((v >> 4) as u32) * 10 + (v & 0x0F) as u32
}

impl BcdTime {
    pub const SIZE: usize = 8;

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        let year = dt.year() as u32;
        Self {
            year_msb: to_bcd(year / 100),
            year_lsb: to_bcd(year % 100),
            month: to_bcd(dt.month()),
            day: to_bcd(dt.day()),
            hour: to_bcd(dt.hour()),
            minute: to_bcd(dt.minute()),
            second: to_bcd(dt.second()),
            hundredth: to_bcd(dt.timestamp_subsec_millis() / 10),
        }
    }

    pub fn year(&self) -> u32 {
        from_bcd(self.year_msb) * 100 + from_bcd(self.year_lsb)
    }

    /// Converts back to a UTC timestamp, for the `Timestamp` bus property
    /// and human-readable rendering. Falls back to the Unix
    /// epoch if the BCD fields do not form a valid calendar date.
    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(
            self.year() as i32,
            from_bcd(self.month),
            from_bcd(self.day),
            from_bcd(self.hour),
            from_bcd(self.minute),
            from_bcd(self.second),
        )
        .single()
        .unwrap_or_else(|| Utc.timestamp_opt(0, 0).single().unwrap())
    }

    pub fn flatten(&self, stream: &mut Stream) {
        stream.write_u8(self.year_msb);
        stream.write_u8(self.year_lsb);
        stream.write_u8(self.month);
        stream.write_u8(self.day);
        stream.write_u8(self.hour);
        stream.write_u8(self.minute);
        stream.write_u8(self.second);
        stream.write_u8(self.hundredth);
    }

    pub fn read(stream: &mut Stream) -> Result<Self> {
        Ok(Self {
            year_msb: stream.read_u8()?,
            year_lsb: stream.read_u8()?,
            month: stream.read_u8()?,
            day: stream.read_u8()?,
            hour: stream.read_u8()?,
            minute: stream.read_u8()?,
            second: stream.read_u8()?,
            hundredth: stream.read_u8()?,
        })
    }

    /// `%02X%02X%02X%02X%02X%02X%02X%02X` of the eight BCD fields, the
    /// on-disk filename prefix.
    pub fn as_filename_prefix(&self) -> String {
        format!(
            "{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}{:02X}",
            self.year_msb,
            self.year_lsb,
            self.month,
            self.day,
            self.hour,
            self.minute,
            self.second,
            self.hundredth
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn round_trips_through_stream() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 7, 13, 5, 9).unwrap();
        let bcd = BcdTime::from_datetime(dt);
        assert_eq!(bcd.year(), 2024);

        let mut s = Stream::new();
        bcd.flatten(&mut s);
        s.set_offset(0).unwrap();
        let back = BcdTime::read(&mut s).unwrap();
        assert_eq!(bcd, back);
    }

    #[test]
    fn to_datetime_round_trips_through_from_datetime() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 7, 13, 5, 9).unwrap();
        let bcd = BcdTime::from_datetime(dt);
        assert_eq!(bcd.to_datetime(), dt);
    }

    #[test]
    fn filename_prefix_is_16_hex_digits() {
        let dt = Utc.with_ymd_and_hms(2024, 3, 7, 13, 5, 9).unwrap();
        let bcd = BcdTime::from_datetime(dt);
        assert_eq!(bcd.as_filename_prefix().len(), 16);
    }
}
