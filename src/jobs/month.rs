//! 対象月 (MonthToken) と期間展開

use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Local};
use serde::{Serialize, Serializer};

/// 正規化された年月。画面操作とファイル名の両方で使う
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MonthToken {
    year: i32,
    month: u32,
}

impl MonthToken {
    pub fn new(year: i32, month: u32) -> Option<Self> {
        if (1..=12).contains(&month) && (1000..=9999).contains(&year) {
            Some(Self { year, month })
        } else {
            None
        }
    }

    /// ローカル時刻での今月
    pub fn current() -> Self {
        let today = Local::now().date_naive();
        Self {
            year: today.year(),
            month: today.month(),
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    pub fn month(&self) -> u32 {
        self.month
    }

    /// 翌月 (12月の次は翌年1月)
    pub fn succ(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    fn ordinal(&self) -> i64 {
        i64::from(self.year) * 12 + i64::from(self.month) - 1
    }

    /// `other` から見て何ヶ月前か。ポータルの期間セレクタはこの値で月を指定する。
    /// 未来の月は `None`
    pub fn months_before(&self, other: MonthToken) -> Option<u32> {
        u32::try_from(other.ordinal() - self.ordinal()).ok()
    }

    /// ファイル名用の `MM-YYYY`
    pub fn file_suffix(&self) -> String {
        format!("{:02}-{:04}", self.month, self.year)
    }
}

impl fmt::Display for MonthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}/{:04}", self.month, self.year)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseMonthError(String);

impl fmt::Display for ParseMonthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for ParseMonthError {}

/// `MM/YYYY` (月は1桁も可)
impl FromStr for MonthToken {
    type Err = ParseMonthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (month, year) = s
            .trim()
            .split_once('/')
            .ok_or_else(|| ParseMonthError("MM/YYYY 形式ではありません".into()))?;

        if month.is_empty()
            || month.len() > 2
            || year.len() != 4
            || !month.chars().chain(year.chars()).all(|c| c.is_ascii_digit())
        {
            return Err(ParseMonthError("MM/YYYY 形式ではありません".into()));
        }

        let month: u32 = month
            .parse()
            .map_err(|_| ParseMonthError("月が数値ではありません".into()))?;
        let year: i32 = year
            .parse()
            .map_err(|_| ParseMonthError("年が数値ではありません".into()))?;

        if !(1..=12).contains(&month) {
            return Err(ParseMonthError(format!("月は1〜12の範囲です: {}", month)));
        }
        MonthToken::new(year, month)
            .ok_or_else(|| ParseMonthError(format!("年は1000〜9999の範囲です: {}", year)))
    }
}

impl Serialize for MonthToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// `start` から `stop` の直前までの月を順に返す (`stop` は含まない)
pub fn expand(start: MonthToken, stop: MonthToken) -> Vec<MonthToken> {
    MonthRange {
        next: start,
        stop,
    }
    .collect()
}

struct MonthRange {
    next: MonthToken,
    stop: MonthToken,
}

impl Iterator for MonthRange {
    type Item = MonthToken;

    fn next(&mut self) -> Option<MonthToken> {
        if self.next >= self.stop {
            return None;
        }
        let current = self.next;
        self.next = current.succ();
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn m(year: i32, month: u32) -> MonthToken {
        MonthToken::new(year, month).unwrap()
    }

    #[test]
    fn test_parse_and_display() {
        let token: MonthToken = "01/2020".parse().unwrap();
        assert_eq!(token, m(2020, 1));
        assert_eq!(token.to_string(), "01/2020");
        assert_eq!(token.file_suffix(), "01-2020");

        assert_eq!("3/2021".parse::<MonthToken>().unwrap(), m(2021, 3));
    }

    #[test]
    fn test_parse_rejects_malformed() {
        for input in ["13/2020", "00/2020", "2020/01", "01-2020", "01/20", "ab/2020", ""] {
            assert!(input.parse::<MonthToken>().is_err(), "{input} should fail");
        }
    }

    #[test]
    fn test_parse_error_names_the_bad_part() {
        let err = "13/2020".parse::<MonthToken>().unwrap_err();
        assert!(err.to_string().contains("月"), "{err}");

        let err = "01/0999".parse::<MonthToken>().unwrap_err();
        assert_eq!(err.to_string(), "年は1000〜9999の範囲です: 999");
    }

    #[test]
    fn test_expand_excludes_stop() {
        let months = expand(m(2020, 1), m(2020, 3));
        assert_eq!(months, vec![m(2020, 1), m(2020, 2)]);
    }

    #[test]
    fn test_expand_rolls_year() {
        let months = expand(m(2019, 11), m(2020, 2));
        assert_eq!(months, vec![m(2019, 11), m(2019, 12), m(2020, 1)]);
    }

    #[test]
    fn test_expand_empty_when_equal() {
        assert!(expand(m(2020, 5), m(2020, 5)).is_empty());
        assert!(expand(m(2020, 6), m(2020, 5)).is_empty());
    }

    #[test]
    fn test_expand_count_and_order() {
        let pairs = [
            (m(2018, 7), m(2021, 2)),
            (m(2020, 1), m(2020, 12)),
            (m(1999, 12), m(2000, 1)),
            (m(2020, 4), m(2023, 4)),
        ];
        for (start, stop) in pairs {
            let months = expand(start, stop);
            let expected = 12 * (stop.year() - start.year()) + stop.month() as i32
                - start.month() as i32;
            assert_eq!(months.len() as i32, expected);
            assert_eq!(months.first(), Some(&start));
            assert!(months.windows(2).all(|w| w[0] < w[1]));
            assert!(months.iter().all(|t| *t < stop));
        }
    }

    #[test]
    fn test_months_before() {
        let now = m(2023, 2);
        assert_eq!(m(2023, 2).months_before(now), Some(0));
        assert_eq!(m(2022, 12).months_before(now), Some(2));
        assert_eq!(m(2020, 1).months_before(now), Some(37));
        assert_eq!(m(2023, 3).months_before(now), None);
    }
}
