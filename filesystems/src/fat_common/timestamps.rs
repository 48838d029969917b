// MS-DOS date/time packing used by directory records
//
// date: bits 15-9 year since 1980, bits 8-5 month, bits 4-0 day
// time: bits 15-11 hours, bits 10-5 minutes, bits 4-0 seconds/2

use chrono::{Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

pub const DOS_EPOCH_YEAR: i32 = 1980;
const MAX_DOS_YEAR: i32 = DOS_EPOCH_YEAR + 127;

const DAY_MASK: u16 = 0x001F;
const MONTH_MASK: u16 = 0x01E0;
const YEAR_MASK: u16 = 0xFE00;
const MONTH_SHIFT: u16 = 5;
const YEAR_SHIFT: u16 = 9;

const SECOND_MASK: u16 = 0x001F;
const MINUTE_MASK: u16 = 0x07E0;
const HOUR_MASK: u16 = 0xF800;
const MINUTE_SHIFT: u16 = 5;
const HOUR_SHIFT: u16 = 11;

/// Pack a calendar date. Years outside 1980..=2107 are clamped.
pub fn encode_date(date: NaiveDate) -> u16 {
    let year = (date.year().clamp(DOS_EPOCH_YEAR, MAX_DOS_YEAR) - DOS_EPOCH_YEAR) as u16;
    ((year << YEAR_SHIFT) & YEAR_MASK)
        | (((date.month() as u16) << MONTH_SHIFT) & MONTH_MASK)
        | (date.day() as u16 & DAY_MASK)
}

/// Pack a time of day with two-second resolution.
pub fn encode_time(time: NaiveTime) -> u16 {
    (((time.hour() as u16) << HOUR_SHIFT) & HOUR_MASK)
        | (((time.minute() as u16) << MINUTE_SHIFT) & MINUTE_MASK)
        | ((time.second() as u16 / 2) & SECOND_MASK)
}

/// Unpack a date. Zero means "no date recorded" and, like any
/// out-of-range combination, yields `None`.
pub fn decode_date(raw: u16) -> Option<NaiveDate> {
    if raw == 0 {
        return None;
    }
    let day = (raw & DAY_MASK) as u32;
    let month = ((raw & MONTH_MASK) >> MONTH_SHIFT) as u32;
    let year = ((raw & YEAR_MASK) >> YEAR_SHIFT) as i32 + DOS_EPOCH_YEAR;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Unpack a time of day; zero is midnight.
pub fn decode_time(raw: u16) -> Option<NaiveTime> {
    let seconds = ((raw & SECOND_MASK) * 2) as u32;
    let minutes = ((raw & MINUTE_MASK) >> MINUTE_SHIFT) as u32;
    let hours = ((raw & HOUR_MASK) >> HOUR_SHIFT) as u32;
    NaiveTime::from_hms_opt(hours, minutes, seconds)
}

pub fn encode_datetime(dt: NaiveDateTime) -> (u16, u16) {
    (encode_date(dt.date()), encode_time(dt.time()))
}

pub fn decode_datetime(date: u16, time: u16) -> Option<NaiveDateTime> {
    Some(decode_date(date)?.and_time(decode_time(time)?))
}

/// Render a packed pair the way directory listings show it.
pub fn format_datetime(date: u16, time: u16) -> String {
    match decode_datetime(date, time) {
        Some(dt) => dt.format("%m/%d/%Y %H:%M:%S").to_string(),
        None => "--/--/---- --:--:--".to_string(),
    }
}

pub fn format_date(date: u16) -> String {
    match decode_date(date) {
        Some(d) => d.format("%m/%d/%Y").to_string(),
        None => "--/--/----".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_date() {
        let epoch = NaiveDate::from_ymd_opt(1980, 1, 1).unwrap();
        assert_eq!(encode_date(epoch), 0x0021);
        assert_eq!(decode_date(0x0021), Some(epoch));
    }

    #[test]
    fn test_zero_date_is_absent() {
        assert_eq!(decode_date(0), None);
        assert_eq!(format_date(0), "--/--/----");
    }

    #[test]
    fn test_datetime_round_trip() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(14, 30, 58)
            .unwrap();
        let (date, time) = encode_datetime(dt);
        assert_eq!(decode_datetime(date, time), Some(dt));
    }

    #[test]
    fn test_odd_seconds_truncate() {
        let t = NaiveTime::from_hms_opt(23, 59, 59).unwrap();
        let decoded = decode_time(encode_time(t)).unwrap();
        assert_eq!(decoded, NaiveTime::from_hms_opt(23, 59, 58).unwrap());
    }

    #[test]
    fn test_year_clamped() {
        let early = NaiveDate::from_ymd_opt(1970, 6, 1).unwrap();
        assert_eq!(decode_date(encode_date(early)).unwrap().year(), 1980);
    }
}
