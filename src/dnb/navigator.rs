//! 口座 × 月 の明細リンクまで画面を操作する

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::selectors;
use crate::config::{RetryPolicy, RunSettings};
use crate::error::StatementError;
use crate::jobs::{AccountId, MonthToken};
use crate::traits::{BrowserDriver, WaitCondition};

/// 明細が存在しない理由 (エラーではない)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotFoundReason {
    /// 口座セレクタに口座がない
    AccountNotListed,
    /// 期間セレクタにその月がない (未来の月、保存期間外)
    MonthNotListed,
    /// 検索結果が0件 (口座開設前など)
    NoStatement,
}

impl fmt::Display for NotFoundReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::AccountNotListed => "account not listed",
            Self::MonthNotListed => "month not available",
            Self::NoStatement => "no statement for month",
        };
        f.write_str(text)
    }
}

/// 開いた明細へのハンドル
#[derive(Debug)]
pub struct DocumentHandle<E> {
    pub element: E,
}

#[derive(Debug)]
pub enum Lookup<E> {
    Found(DocumentHandle<E>),
    NotFound(NotFoundReason),
}

pub struct StatementNavigator {
    retry: RetryPolicy,
    timeout: Duration,
    current_month: MonthToken,
}

impl StatementNavigator {
    pub fn new(settings: &RunSettings) -> Self {
        Self {
            retry: settings.retry,
            timeout: settings.timeout,
            current_month: MonthToken::current(),
        }
    }

    /// 期間セレクタの基準月 (通常は今月)
    pub fn with_current_month(mut self, month: MonthToken) -> Self {
        self.current_month = month;
        self
    }

    /// 明細リンクを探す。一時的なUI失敗はバックオフ付きで再試行し、
    /// 使い切ったら `Navigation` エラーにする
    pub async fn locate_and_open<D: BrowserDriver>(
        &self,
        driver: &D,
        account: &AccountId,
        month: MonthToken,
    ) -> Result<Lookup<D::Element>, StatementError> {
        let mut attempt = 0;
        loop {
            match self.try_locate(driver, account, month).await {
                Ok(lookup) => return Ok(lookup),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let backoff = self.retry.backoff(attempt);
                    warn!(
                        account = %account,
                        month = %month,
                        "Navigation attempt {} failed, retrying in {:?}: {}",
                        attempt + 1,
                        backoff,
                        e
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    return Err(StatementError::Navigation(format!(
                        "{} {}: {}回試行して失敗しました: {}",
                        account,
                        month,
                        attempt + 1,
                        e
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn try_locate<D: BrowserDriver>(
        &self,
        driver: &D,
        account: &AccountId,
        month: MonthToken,
    ) -> Result<Lookup<D::Element>, StatementError> {
        if driver.find(selectors::LOGIN_UID_INPUT).await?.is_some() {
            return Err(StatementError::SessionExpired);
        }

        if driver.find(selectors::ACCOUNT_SELECT).await?.is_none() {
            self.open_archive(driver).await?;
        }

        debug!("Selecting account {}", account);
        driver
            .wait_until(
                WaitCondition::Present(selectors::ACCOUNT_SELECT),
                self.timeout,
            )
            .await?;
        if !driver
            .select_option(selectors::ACCOUNT_SELECT, &account.digits())
            .await?
        {
            return Ok(Lookup::NotFound(NotFoundReason::AccountNotListed));
        }

        let Some(index) = month.months_before(self.current_month) else {
            return Ok(Lookup::NotFound(NotFoundReason::MonthNotListed));
        };

        debug!("Selecting month {} (index {})", month, index);
        driver
            .wait_until(WaitCondition::Present(selectors::MONTH_SELECT), self.timeout)
            .await?;
        if !driver
            .select_option(selectors::MONTH_SELECT, &index.to_string())
            .await?
        {
            return Ok(Lookup::NotFound(NotFoundReason::MonthNotListed));
        }

        // 前回の検索結果がまだ表示されていれば、それが消えるまで新しい結果と見なさない
        let previous = self.visible_result(driver).await?;

        let submit = driver
            .wait_for(selectors::SEARCH_SUBMIT, self.timeout)
            .await?;
        driver.click(&submit).await?;

        if let Some(selector) = previous {
            debug!("Waiting for previous result {} to clear", selector);
            driver
                .wait_until(WaitCondition::Absent(selector), self.timeout)
                .await?;
        }

        let outcome = driver
            .wait_until(
                WaitCondition::AnyPresent(&[
                    selectors::STATEMENT_LINK,
                    selectors::NO_HITS,
                    selectors::LOGIN_UID_INPUT,
                ]),
                self.timeout,
            )
            .await?;

        match outcome {
            0 => {
                let element = driver
                    .find(selectors::STATEMENT_LINK)
                    .await?
                    .ok_or_else(|| {
                        StatementError::ElementNotFound(selectors::STATEMENT_LINK.to_string())
                    })?;
                info!(account = %account, month = %month, "Statement found");
                Ok(Lookup::Found(DocumentHandle { element }))
            }
            1 => Ok(Lookup::NotFound(NotFoundReason::NoStatement)),
            _ => Err(StatementError::SessionExpired),
        }
    }

    async fn visible_result<D: BrowserDriver>(
        &self,
        driver: &D,
    ) -> Result<Option<&'static str>, StatementError> {
        for selector in [selectors::STATEMENT_LINK, selectors::NO_HITS] {
            if driver.find(selector).await?.is_some() {
                return Ok(Some(selector));
            }
        }
        Ok(None)
    }

    /// メニューからアーカイブを開き、書類種別に口座明細を選ぶ
    async fn open_archive<D: BrowserDriver>(&self, driver: &D) -> Result<(), StatementError> {
        debug!("Navigating to the archive");

        if let Some(menu) = driver.find(selectors::SITE_MENU).await? {
            driver.click(&menu).await?;
        }

        let archive = driver
            .wait_for(selectors::ARCHIVE_LINK, self.timeout)
            .await?;
        driver.click(&archive).await?;

        driver
            .wait_until(
                WaitCondition::Present(selectors::DOCUMENT_TYPE_SELECT),
                self.timeout,
            )
            .await?;

        if !driver
            .select_option(
                selectors::DOCUMENT_TYPE_SELECT,
                selectors::STATEMENT_DOCUMENT_TYPE,
            )
            .await?
        {
            return Err(StatementError::Navigation(format!(
                "書類種別 {} がありません",
                selectors::STATEMENT_DOCUMENT_TYPE
            )));
        }
        Ok(())
    }
}
