use chrono::{Datelike, Local, NaiveDateTime, Timelike};

pub const DATE_TIME_LEN: usize = 9;
pub const DAY_OF_WEEK_LEN: usize = 1;

/// Source of the wall-clock time written to the watch.
pub trait WallClock {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LocalClock;

impl WallClock for LocalClock {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// A snapshot of the local time in the layout the watch expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimePayload {
    pub month_index: u8, // January = 0
    pub day: u8,
    pub year: i32,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
    pub day_of_week: u8, // Sunday = 0
}

impl TimePayload {
    pub fn capture<T: Datelike + Timelike>(now: &T) -> Self {
        TimePayload {
            month_index: now.month0() as u8,
            day: now.day() as u8,
            year: now.year(),
            hour: now.hour() as u8,
            minute: now.minute() as u8,
            // a leap second is reported as second 59 by chrono already
            second: now.second() as u8,
            day_of_week: now.weekday().num_days_from_sunday() as u8,
        }
    }

    pub fn date_time_bytes(&self) -> [u8; DATE_TIME_LEN] {
        let year = self.year.to_be_bytes();
        [
            self.month_index,
            self.day,
            year[0],
            year[1],
            year[2],
            year[3],
            self.hour,
            self.minute,
            self.second,
        ]
    }

    pub fn day_of_week_bytes(&self) -> [u8; DAY_OF_WEEK_LEN] {
        [self.day_of_week]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, min, s).unwrap()
    }

    #[test]
    fn date_time_layout() {
        // 2024-03-15 was a Friday
        let payload = TimePayload::capture(&at(2024, 3, 15, 21, 7, 42));

        assert_eq!(
            payload.date_time_bytes(),
            [2, 15, 0x00, 0x00, 0x07, 0xE8, 21, 7, 42],
        );
        assert_eq!(payload.day_of_week_bytes(), [5]);
    }

    #[test]
    fn january_is_month_zero_and_sunday_is_day_zero() {
        // 2023-01-01 was a Sunday
        let payload = TimePayload::capture(&at(2023, 1, 1, 0, 0, 0));

        assert_eq!(payload.month_index, 0);
        assert_eq!(payload.day_of_week_bytes(), [0]);
    }

    #[test]
    fn saturday_is_six() {
        // 2023-12-30 was a Saturday
        let payload = TimePayload::capture(&at(2023, 12, 30, 23, 59, 59));

        assert_eq!(payload.month_index, 11);
        assert_eq!(payload.day_of_week, 6);
        assert_eq!(&payload.date_time_bytes()[6..], &[23, 59, 59]);
    }
}
