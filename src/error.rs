use std::time::Duration;

use thiserror::Error;

/// ジョブ設定の検証エラー。`field` は問題のある項目のパス (例: `jobs[0].accounts[1].id`)
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("設定ファイル (TOML) の解析に失敗しました: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("設定ファイル (YAML) の解析に失敗しました: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{field}: 必須項目です ({reason})")]
    Missing { field: String, reason: String },

    #[error("{field}: 不正な値 {value:?} ({reason})")]
    Invalid {
        field: String,
        value: String,
        reason: String,
    },

    #[error("{field}: 終了月 {stop} は開始月 {start} より後である必要があります")]
    EmptyWindow {
        field: String,
        start: String,
        stop: String,
    },
}

impl ConfigError {
    pub(crate) fn missing(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Missing {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Invalid {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    /// 問題のある項目のパス
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Toml(_) | Self::Yaml(_) => None,
            Self::Missing { field, .. }
            | Self::Invalid { field, .. }
            | Self::EmptyWindow { field, .. } => Some(field),
        }
    }
}

#[derive(Error, Debug)]
pub enum StatementError {
    #[error("設定エラー: {0}")]
    Config(#[from] ConfigError),

    #[error("ブラウザ初期化エラー: {0}")]
    BrowserInit(String),

    #[error("ナビゲーションエラー: {0}")]
    Navigation(String),

    #[error("要素が見つかりません: {0}")]
    ElementNotFound(String),

    #[error("タイムアウト: {0}")]
    Timeout(String),

    #[error("ログインが{waited:?}以内に完了しませんでした: {reason}")]
    AuthenticationTimeout { waited: Duration, reason: String },

    #[error("セッションが切れました")]
    SessionExpired,

    #[error("セッションを再確立できません: {0}")]
    SessionLost(String),

    #[error("ダウンロードエラー: {0}")]
    Download(String),

    #[error("入力エラー: {0}")]
    Prompt(String),

    #[error("中断されました")]
    Cancelled,

    #[error("ファイル操作エラー: {0}")]
    FileIO(#[from] std::io::Error),
}

impl StatementError {
    /// ページ遷移直後の一時的なUI失敗か (描画前の要素、遷移で消えた参照など)
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Navigation(_) | Self::ElementNotFound(_) | Self::Timeout(_)
        )
    }

    /// 実行全体を止めるべきエラーか
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::BrowserInit(_)
                | Self::SessionLost(_)
                | Self::Prompt(_)
                | Self::Cancelled
        )
    }
}
