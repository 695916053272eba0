//! ジョブ設定の型定義と検証

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::month::MonthToken;
use crate::download::DownloadResolver;
use crate::error::ConfigError;

fn account_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{4}\.\d{2}\.\d{5}$").expect("valid account id regex"))
}

fn identity_number_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d{11}$").expect("valid identity number regex"))
}

/// 口座番号 (`1234.56.78901`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct AccountId(String);

impl AccountId {
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        account_id_pattern()
            .is_match(trimmed)
            .then(|| Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 区切りを除いた数字列。口座セレクタの value に使う
    pub fn digits(&self) -> String {
        self.0.chars().filter(char::is_ascii_digit).collect()
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 対象口座
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountSpec {
    pub account_id: AccountId,
    /// ファイル名に使う別名
    pub display_name: Option<String>,
}

impl AccountSpec {
    /// ファイル名のベース (別名があれば別名、なければ口座番号)
    pub fn file_stem(&self) -> &str {
        self.display_name
            .as_deref()
            .unwrap_or_else(|| self.account_id.as_str())
    }
}

/// 期間と口座の組み合わせ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub start_month: MonthToken,
    /// この月は含まない
    pub stop_month: MonthToken,
    pub accounts: Vec<AccountSpec>,
}

impl Job {
    pub fn months(&self) -> Vec<MonthToken> {
        super::month::expand(self.start_month, self.stop_month)
    }
}

/// 検証済みのジョブ設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub identity_number: Option<String>,
    pub jobs: Vec<Job>,
}

/// 設定ファイルそのままの形
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfig {
    #[serde(default, alias = "ssn")]
    pub identity_number: Option<String>,
    #[serde(default, alias = "extractions", alias = "extraction")]
    pub jobs: Vec<RawJob>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawJob {
    #[serde(alias = "from")]
    pub start: String,
    #[serde(alias = "to")]
    pub stop: String,
    #[serde(default)]
    pub accounts: Vec<RawAccount>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawAccount {
    pub id: String,
    #[serde(default, alias = "alias")]
    pub name: Option<String>,
}

/// 設定ファイルの形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    /// 旧ツールの `config.yaml`
    Yaml,
}

impl ConfigFormat {
    /// 拡張子で判定する。`.yaml` / `.yml` 以外は TOML
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("yaml" | "yml") => Self::Yaml,
            _ => Self::Toml,
        }
    }
}

impl RawConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_yaml_str(input: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(input)?)
    }

    pub fn parse(input: &str, format: ConfigFormat) -> Result<Self, ConfigError> {
        match format {
            ConfigFormat::Toml => Self::from_toml_str(input),
            ConfigFormat::Yaml => Self::from_yaml_str(input),
        }
    }
}

impl Config {
    /// TOMLを読み込んで検証する
    pub fn from_toml_str(input: &str, require_identity: bool) -> Result<Self, ConfigError> {
        Self::validate(RawConfig::from_toml_str(input)?, require_identity)
    }

    /// YAMLを読み込んで検証する
    pub fn from_yaml_str(input: &str, require_identity: bool) -> Result<Self, ConfigError> {
        Self::validate(RawConfig::from_yaml_str(input)?, require_identity)
    }

    /// 拡張子に応じて TOML または YAML として読み込む
    pub fn load(path: &Path, require_identity: bool) -> Result<Self, crate::StatementError> {
        let text = std::fs::read_to_string(path)?;
        let raw = RawConfig::parse(&text, ConfigFormat::from_path(path))?;
        Ok(Self::validate(raw, require_identity)?)
    }

    /// `require_identity` は対話入力ができない場合に true
    pub fn validate(raw: RawConfig, require_identity: bool) -> Result<Self, ConfigError> {
        let identity_number = match raw.identity_number.map(|s| s.trim().to_string()) {
            Some(ssn) if ssn.is_empty() => None,
            Some(ssn) if !identity_number_pattern().is_match(&ssn) => {
                return Err(ConfigError::invalid(
                    "identity_number",
                    ssn,
                    "11桁の数字である必要があります",
                ));
            }
            other => other,
        };

        if identity_number.is_none() && require_identity {
            return Err(ConfigError::missing(
                "identity_number",
                "対話入力が無効なため設定ファイルで指定してください",
            ));
        }

        if raw.jobs.is_empty() {
            return Err(ConfigError::missing("jobs", "ジョブが1件もありません"));
        }

        let jobs = raw
            .jobs
            .into_iter()
            .enumerate()
            .map(|(index, job)| validate_job(index, job))
            .collect::<Result<Vec<_>, _>>()?;
        check_target_clashes(&jobs)?;

        Ok(Self {
            identity_number,
            jobs,
        })
    }

    /// 全ジョブの (口座, 月) 数
    pub fn unit_count(&self) -> usize {
        self.jobs
            .iter()
            .map(|job| job.accounts.len() * job.months().len())
            .sum()
    }
}

/// 同じ月に同じ保存ファイル名を使う口座がないこと。
/// 重複すると後の口座が先の口座の明細を「保存済み」と見なしてしまう
fn check_target_clashes(jobs: &[Job]) -> Result<(), ConfigError> {
    let mut seen: HashMap<String, (usize, usize)> = HashMap::new();

    for (index, job) in jobs.iter().enumerate() {
        let months = job.months();
        for (i, account) in job.accounts.iter().enumerate() {
            for month in &months {
                let file_name = DownloadResolver::file_name(account, *month);
                if let Some((first_job, first_account)) = seen.get(&file_name) {
                    let key = if account.display_name.is_some() { "name" } else { "id" };
                    return Err(ConfigError::invalid(
                        format!("jobs[{index}].accounts[{i}].{key}"),
                        account.file_stem(),
                        format!(
                            "jobs[{first_job}].accounts[{first_account}] と保存先 {file_name} が重複します"
                        ),
                    ));
                }
                seen.insert(file_name, (index, i));
            }
        }
    }
    Ok(())
}

fn parse_month(field: String, value: &str) -> Result<MonthToken, ConfigError> {
    value
        .parse()
        .map_err(|e: super::month::ParseMonthError| ConfigError::invalid(field, value, e.to_string()))
}

fn validate_job(index: usize, raw: RawJob) -> Result<Job, ConfigError> {
    let start_month = parse_month(format!("jobs[{index}].start"), &raw.start)?;
    let stop_month = parse_month(format!("jobs[{index}].stop"), &raw.stop)?;

    if stop_month <= start_month {
        return Err(ConfigError::EmptyWindow {
            field: format!("jobs[{index}].stop"),
            start: start_month.to_string(),
            stop: stop_month.to_string(),
        });
    }

    if raw.accounts.is_empty() {
        return Err(ConfigError::missing(
            format!("jobs[{index}].accounts"),
            "口座が1件もありません",
        ));
    }

    let accounts = raw
        .accounts
        .into_iter()
        .enumerate()
        .map(|(i, account)| {
            let account_id = AccountId::parse(&account.id).ok_or_else(|| {
                ConfigError::invalid(
                    format!("jobs[{index}].accounts[{i}].id"),
                    &account.id,
                    "1234.56.78901 形式 (4.2.5桁) である必要があります",
                )
            })?;
            let display_name = account
                .name
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty());
            Ok(AccountSpec {
                account_id,
                display_name,
            })
        })
        .collect::<Result<Vec<_>, ConfigError>>()?;

    Ok(Job {
        start_month,
        stop_month,
        accounts,
    })
}
