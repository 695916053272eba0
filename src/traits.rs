use std::time::{Duration, Instant};

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::time::sleep;

use crate::error::StatementError;

/// 条件待ちのポーリング間隔
pub const WAIT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// `BrowserDriver::wait_until` の待機条件
#[derive(Debug, Clone, Copy)]
pub enum WaitCondition<'a> {
    Present(&'a str),
    Absent(&'a str),
    /// いずれかが現れたらそのインデックスを返す
    AnyPresent(&'a [&'a str]),
}

/// ブラウザ操作の抽象。
/// 実ブラウザ (chromiumoxide) とテスト用のフェイクを差し替えられるようにする
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    type Element: Send + Sync;

    /// URLを開く
    async fn open(&self, url: &str) -> Result<(), StatementError>;

    /// 要素を探す。見つからなければ `None`
    async fn find(&self, selector: &str) -> Result<Option<Self::Element>, StatementError>;

    async fn click(&self, element: &Self::Element) -> Result<(), StatementError>;

    async fn type_text(&self, element: &Self::Element, text: &str) -> Result<(), StatementError>;

    /// `<select>` の値を選ぶ。該当する option がなければ `false`
    async fn select_option(&self, selector: &str, value: &str) -> Result<bool, StatementError>;

    /// 要素が指すドキュメントを取得する
    async fn download(&self, element: &Self::Element) -> Result<Vec<u8>, StatementError>;

    /// ブラウザを閉じる
    async fn close(&self) -> Result<(), StatementError>;

    /// 条件が満たされるまでポーリングする
    async fn wait_until(
        &self,
        condition: WaitCondition<'_>,
        timeout: Duration,
    ) -> Result<usize, StatementError> {
        let start = Instant::now();

        loop {
            let matched = match condition {
                WaitCondition::Present(selector) => {
                    self.find(selector).await?.is_some().then_some(0)
                }
                WaitCondition::Absent(selector) => {
                    self.find(selector).await?.is_none().then_some(0)
                }
                WaitCondition::AnyPresent(selectors) => {
                    let mut hit = None;
                    for (index, selector) in selectors.iter().enumerate() {
                        if self.find(selector).await?.is_some() {
                            hit = Some(index);
                            break;
                        }
                    }
                    hit
                }
            };

            if let Some(index) = matched {
                return Ok(index);
            }

            if start.elapsed() >= timeout {
                return Err(StatementError::Timeout(format!(
                    "{:?} が{:?}以内に満たされませんでした",
                    condition, timeout
                )));
            }

            sleep(WAIT_POLL_INTERVAL.min(timeout)).await;
        }
    }

    /// 要素を待ってから取得する
    async fn wait_for(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Self::Element, StatementError> {
        self.wait_until(WaitCondition::Present(selector), timeout)
            .await?;
        self.find(selector)
            .await?
            .ok_or_else(|| StatementError::ElementNotFound(selector.to_string()))
    }
}

/// 要求する認証情報の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKind {
    /// 個人番号 (11桁)
    IdentityNumber,
    /// PIN (4桁)
    Pin,
    /// ワンタイムパスワード (6桁)
    OneTimeCode,
}

impl CredentialKind {
    pub fn expected_len(&self) -> usize {
        match self {
            Self::IdentityNumber => 11,
            Self::Pin => 4,
            Self::OneTimeCode => 6,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::IdentityNumber => "SSN",
            Self::Pin => "PIN",
            Self::OneTimeCode => "One time password",
        }
    }

    /// 桁数と数字のみかを検証する
    pub fn check(&self, input: &str) -> Result<(), String> {
        if input.len() != self.expected_len() {
            return Err(format!(
                "{} needs to be exactly {} digits long",
                self.label(),
                self.expected_len()
            ));
        }
        if !input.chars().all(|c| c.is_ascii_digit()) {
            return Err(format!("{} can only contain numerical digits", self.label()));
        }
        Ok(())
    }
}

/// 認証情報の供給元 (対話入力やテスト用スクリプト)
pub trait CredentialProvider: Send + Sync {
    /// `seed` があればそれを使い、なければ取得する
    fn obtain(
        &self,
        kind: CredentialKind,
        seed: Option<&str>,
    ) -> Result<SecretString, StatementError>;
}
