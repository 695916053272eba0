//! ジョブ設定モジュール
//!
//! 設定ファイル (口座 × 期間) の検証と、期間の月単位への展開

mod month;
mod types;

pub use month::{expand, MonthToken, ParseMonthError};
pub use types::{AccountId, AccountSpec, Config, ConfigFormat, Job, RawAccount, RawConfig, RawJob};
