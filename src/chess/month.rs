//! Month index: months elapsed since the archive's epoch (May 2007), the
//! sortable key for remote and local partitions.

use chrono::{DateTime, Datelike, NaiveDate, Utc};

pub const EPOCH_YEAR: i32 = 2007;
pub const EPOCH_MONTH: u32 = 5;

pub fn month_index(year: i32, month: u32) -> i32 {
    (month as i32 - EPOCH_MONTH as i32) + (year - EPOCH_YEAR) * 12
}

pub fn month_index_of(date: &DateTime<Utc>) -> i32 {
    month_index(date.year(), date.month())
}

/// `(year, month)` of a month index.
pub fn year_month(index: i32) -> (i32, u32) {
    let total = EPOCH_YEAR * 12 + (EPOCH_MONTH as i32 - 1) + index;
    (total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
}

/// First day of the month a month index denotes.
pub fn month_start(index: i32) -> Option<NaiveDate> {
    let (year, month) = year_month(index);
    NaiveDate::from_ymd_opt(year, month, 1)
}

/// Short display label, e.g. `may24`.
pub fn month_label(index: i32) -> String {
    match month_start(index) {
        Some(date) => {
            let year = date.year().rem_euclid(100);
            format!("{}{:02}", date.format("%b").to_string().to_lowercase(), year)
        }
        None => format!("month{index}"),
    }
}

/// Local partition directory name, `year_month` with a zero-padded month.
pub fn partition_name(index: i32) -> String {
    let (year, month) = year_month(index);
    format!("{year}_{month:02}")
}

pub fn parse_partition_name(name: &str) -> Option<i32> {
    let (year, month) = name.split_once('_')?;
    if year.len() != 4 || month.len() != 2 {
        return None;
    }
    let year: i32 = year.parse().ok()?;
    let month: u32 = month.parse().ok()?;
    (1..=12).contains(&month).then(|| month_index(year, month))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_epoch_is_zero() {
        assert_eq!(month_index(2007, 5), 0);
        assert_eq!(month_index(2007, 4), -1);
        assert_eq!(month_index(2024, 5), 204);
    }

    #[test]
    fn test_index_inverts_to_first_of_month() {
        for index in [-5, 0, 7, 8, 204, 211] {
            let date = month_start(index).unwrap();
            assert_eq!(date.day(), 1);
            assert_eq!(month_index(date.year(), date.month()), index);
        }
    }

    #[test]
    fn test_monotonic_across_year_boundary() {
        let dec = Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).unwrap();
        let jan = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(month_index_of(&jan), month_index_of(&dec) + 1);
    }

    #[test]
    fn test_labels() {
        assert_eq!(month_label(month_index(2024, 5)), "may24");
        assert_eq!(month_label(month_index(2009, 12)), "dec09");
    }

    #[test]
    fn test_partition_names_round_trip() {
        let index = month_index(2024, 3);
        assert_eq!(partition_name(index), "2024_03");
        assert_eq!(parse_partition_name("2024_03"), Some(index));
    }

    #[test]
    fn test_partition_name_rejects_noise() {
        assert_eq!(parse_partition_name(".git"), None);
        assert_eq!(parse_partition_name("2024_13"), None);
        assert_eq!(parse_partition_name("2024_3"), None);
        assert_eq!(parse_partition_name("24_03"), None);
    }
}
