//! テスト用のフェイクポータルと認証情報
#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use statement_scraper::dnb::selectors;
use statement_scraper::{
    BrowserDriver, CredentialKind, CredentialProvider, MonthToken, RetryPolicy, RunSettings,
    StatementError,
};
use tokio::sync::watch;

/// 期間セレクタの基準月
pub fn current_month() -> MonthToken {
    MonthToken::new(2023, 1).unwrap()
}

pub fn month(year: i32, month: u32) -> MonthToken {
    MonthToken::new(year, month).unwrap()
}

pub fn fast_settings(output_dir: &std::path::Path) -> RunSettings {
    RunSettings::new(output_dir)
        .with_timeout(Duration::from_millis(30))
        .with_login_timeout(Duration::from_millis(30))
        .with_retry(RetryPolicy::new(2, Duration::from_millis(1)))
}

pub const PDF: &[u8] = b"%PDF-1.4 statement";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Page {
    Blank,
    Landing,
    UidForm,
    MethodChoice,
    PinForm,
    Home,
    Archive,
    LoggedOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResultView {
    Link,
    NoHits,
}

impl ResultView {
    fn selector(self) -> &'static str {
        match self {
            Self::Link => selectors::STATEMENT_LINK,
            Self::NoHits => selectors::NO_HITS,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SearchOutcome {
    Show(Option<ResultView>),
    Expire,
}

/// 検索ボタン押下後、画面に反映されるまでの状態
#[derive(Debug, Clone, Copy)]
struct PendingSearch {
    outcome: SearchOutcome,
    /// 前回の結果があと何回見えるか
    stale_reads: u32,
}

struct Inner {
    page: Page,
    logged_in: bool,
    result: Option<ResultView>,
    pending: Option<PendingSearch>,
    selected_account: Option<String>,
    selected_index: Option<u32>,

    // シナリオ
    accounts: HashSet<String>,
    statements: HashSet<(String, u32)>,
    max_index: u32,
    fail_logins: HashSet<usize>,
    expire_on_search: HashSet<usize>,
    flaky_searches: HashSet<usize>,
    search_lag: u32,
    failing_finds: usize,
    body: Vec<u8>,
    stop_after_downloads: Option<(usize, watch::Sender<bool>)>,

    // 記録
    opens: usize,
    searches: Vec<(String, u32)>,
    downloads: usize,
    typed: Vec<(String, String)>,
    closes: usize,
}

/// 選択状態・ログイン状態を持つ DNB ポータルのフェイク
#[derive(Clone)]
pub struct FakePortal {
    inner: Arc<Mutex<Inner>>,
}

impl Default for FakePortal {
    fn default() -> Self {
        Self::new()
    }
}

impl FakePortal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                page: Page::Blank,
                logged_in: false,
                result: None,
                pending: None,
                selected_account: None,
                selected_index: None,
                accounts: HashSet::new(),
                statements: HashSet::new(),
                max_index: 60,
                fail_logins: HashSet::new(),
                expire_on_search: HashSet::new(),
                flaky_searches: HashSet::new(),
                search_lag: 1,
                failing_finds: 0,
                body: PDF.to_vec(),
                stop_after_downloads: None,
                opens: 0,
                searches: Vec::new(),
                downloads: 0,
                typed: Vec::new(),
                closes: 0,
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap()
    }

    /// 口座を一覧に載せる (明細はまだない)
    pub fn with_account(self, account: &str) -> Self {
        self.lock().accounts.insert(account.replace('.', ""));
        self
    }

    /// 口座と月の明細を用意する
    pub fn with_statement(self, account: &str, month: MonthToken) -> Self {
        let digits = account.replace('.', "");
        let index = month.months_before(current_month()).unwrap();
        {
            let mut inner = self.lock();
            inner.accounts.insert(digits.clone());
            inner.statements.insert((digits, index));
        }
        self
    }

    pub fn with_max_index(self, max_index: u32) -> Self {
        self.lock().max_index = max_index;
        self
    }

    /// n回目 (1始まり) のログインは完了しない
    pub fn failing_logins(self, attempts: &[usize]) -> Self {
        self.lock().fail_logins.extend(attempts);
        self
    }

    /// n回目 (1始まり) の検索でセッションが切れる
    pub fn expiring_on_search(self, searches: &[usize]) -> Self {
        self.lock().expire_on_search.extend(searches);
        self
    }

    /// n回目 (1始まり) の検索は結果が表示されない
    pub fn flaky_on_search(self, searches: &[usize]) -> Self {
        self.lock().flaky_searches.extend(searches);
        self
    }

    /// 検索後、前回の結果が n 回読まれるまで画面に残る (既定は1)
    pub fn with_search_lag(self, reads: u32) -> Self {
        self.lock().search_lag = reads;
        self
    }

    pub fn with_body(self, body: &[u8]) -> Self {
        self.lock().body = body.to_vec();
        self
    }

    /// n件ダウンロードした時点で停止フラグを立てる
    pub fn stopping_after_downloads(self, downloads: usize, stop: watch::Sender<bool>) -> Self {
        self.lock().stop_after_downloads = Some((downloads, stop));
        self
    }

    /// ログイン済みでホーム画面にいる状態にする
    pub fn logged_in(self) -> Self {
        {
            let mut inner = self.lock();
            inner.logged_in = true;
            inner.page = Page::Home;
        }
        self
    }

    /// サーバー側でセッションが切れた
    pub fn expire(&self) {
        let mut inner = self.lock();
        inner.logged_in = false;
        inner.page = Page::LoggedOut;
        inner.result = None;
        inner.pending = None;
    }

    /// 次の n 回の要素検索を失敗させる (ページ読み込み中など)
    pub fn fail_next_finds(&self, count: usize) {
        self.lock().failing_finds = count;
    }

    pub fn opens(&self) -> usize {
        self.lock().opens
    }

    pub fn searches(&self) -> Vec<(String, u32)> {
        self.lock().searches.clone()
    }

    pub fn downloads(&self) -> usize {
        self.lock().downloads
    }

    pub fn closes(&self) -> usize {
        self.lock().closes
    }

    pub fn typed_into(&self, selector: &str) -> Vec<String> {
        self.lock()
            .typed
            .iter()
            .filter(|(s, _)| s == selector)
            .map(|(_, text)| text.clone())
            .collect()
    }

    /// 要素検索1回ぶん、検索結果の描画を進める
    fn advance_search(inner: &mut Inner, selector: &str) {
        let Some(pending) = inner.pending.as_mut() else {
            return;
        };
        if pending.stale_reads > 0 {
            if inner.result.map(ResultView::selector) == Some(selector) {
                pending.stale_reads -= 1;
            }
            return;
        }
        if inner.result.is_some() {
            // 古い結果が消え、新しい結果はまだ描画されていない
            inner.result = None;
            return;
        }

        let outcome = pending.outcome;
        inner.pending = None;
        match outcome {
            SearchOutcome::Show(view) => inner.result = view,
            SearchOutcome::Expire => {
                inner.logged_in = false;
                inner.page = Page::LoggedOut;
            }
        }
    }

    fn visible(inner: &Inner, selector: &str) -> bool {
        let on_portal = inner.logged_in && matches!(inner.page, Page::Home | Page::Archive);
        match selector {
            s if s == selectors::LOGIN_TRIGGER => inner.page == Page::Landing,
            s if s == selectors::LOGIN_UID_INPUT => {
                matches!(inner.page, Page::UidForm | Page::LoggedOut)
            }
            s if s == selectors::LOGIN_UID_SUBMIT => inner.page == Page::UidForm,
            s if s == selectors::PIN_OTP_TOGGLE => inner.page == Page::MethodChoice,
            s if s == selectors::PIN_INPUT
                || s == selectors::OTP_INPUT
                || s == selectors::PIN_OTP_SUBMIT =>
            {
                inner.page == Page::PinForm
            }
            s if s == selectors::LOGGED_IN_MARKER
                || s == selectors::HOME_LOGO
                || s == selectors::SITE_MENU
                || s == selectors::ARCHIVE_LINK =>
            {
                on_portal
            }
            s if s == selectors::DOCUMENT_TYPE_SELECT
                || s == selectors::ACCOUNT_SELECT
                || s == selectors::MONTH_SELECT
                || s == selectors::SEARCH_SUBMIT =>
            {
                on_portal && inner.page == Page::Archive
            }
            s if s == selectors::STATEMENT_LINK => {
                on_portal && inner.result == Some(ResultView::Link)
            }
            s if s == selectors::NO_HITS => on_portal && inner.result == Some(ResultView::NoHits),
            _ => false,
        }
    }
}

#[async_trait]
impl BrowserDriver for FakePortal {
    type Element = String;

    async fn open(&self, url: &str) -> Result<(), StatementError> {
        let mut inner = self.lock();
        assert_eq!(url, selectors::PORTAL_URL);
        inner.opens += 1;
        inner.page = Page::Landing;
        inner.logged_in = false;
        inner.result = None;
        inner.pending = None;
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<Option<String>, StatementError> {
        let mut inner = self.lock();
        if inner.failing_finds > 0 {
            inner.failing_finds -= 1;
            return Err(StatementError::Navigation(format!("page not ready: {}", selector)));
        }
        Self::advance_search(&mut inner, selector);
        Ok(Self::visible(&inner, selector).then(|| selector.to_string()))
    }

    async fn click(&self, element: &String) -> Result<(), StatementError> {
        let mut inner = self.lock();
        if !Self::visible(&inner, element) {
            return Err(StatementError::Navigation(format!("stale element {}", element)));
        }

        match element.as_str() {
            s if s == selectors::LOGIN_TRIGGER => inner.page = Page::UidForm,
            s if s == selectors::LOGIN_UID_SUBMIT => inner.page = Page::MethodChoice,
            s if s == selectors::PIN_OTP_TOGGLE => inner.page = Page::PinForm,
            s if s == selectors::PIN_OTP_SUBMIT => {
                let attempt = inner.opens;
                if !inner.fail_logins.contains(&attempt) {
                    inner.logged_in = true;
                    inner.page = Page::Home;
                }
            }
            s if s == selectors::HOME_LOGO => {
                inner.page = Page::Home;
                inner.result = None;
                inner.pending = None;
            }
            s if s == selectors::ARCHIVE_LINK => {
                inner.page = Page::Archive;
                inner.result = None;
                inner.pending = None;
                inner.selected_account = None;
                inner.selected_index = None;
            }
            s if s == selectors::SEARCH_SUBMIT => {
                let account = inner.selected_account.clone().unwrap_or_default();
                let index = inner.selected_index.unwrap_or_default();
                inner.searches.push((account.clone(), index));
                let number = inner.searches.len();

                let outcome = if inner.expire_on_search.contains(&number) {
                    SearchOutcome::Expire
                } else if inner.flaky_searches.contains(&number) {
                    SearchOutcome::Show(None)
                } else if inner.statements.contains(&(account, index)) {
                    SearchOutcome::Show(Some(ResultView::Link))
                } else {
                    SearchOutcome::Show(Some(ResultView::NoHits))
                };
                // 結果は即座には切り替わらない
                let stale_reads = if inner.result.is_some() { inner.search_lag } else { 0 };
                inner.pending = Some(PendingSearch {
                    outcome,
                    stale_reads,
                });
            }
            _ => {}
        }
        Ok(())
    }

    async fn type_text(&self, element: &String, text: &str) -> Result<(), StatementError> {
        let mut inner = self.lock();
        if !Self::visible(&inner, element) {
            return Err(StatementError::Navigation(format!("stale element {}", element)));
        }
        inner.typed.push((element.clone(), text.to_string()));
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<bool, StatementError> {
        let mut inner = self.lock();
        if !Self::visible(&inner, selector) {
            return Err(StatementError::ElementNotFound(selector.to_string()));
        }

        match selector {
            s if s == selectors::DOCUMENT_TYPE_SELECT => {
                Ok(value == selectors::STATEMENT_DOCUMENT_TYPE)
            }
            s if s == selectors::ACCOUNT_SELECT => {
                if inner.accounts.contains(value) {
                    inner.selected_account = Some(value.to_string());
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            s if s == selectors::MONTH_SELECT => match value.parse::<u32>() {
                Ok(index) if index <= inner.max_index => {
                    inner.selected_index = Some(index);
                    Ok(true)
                }
                _ => Ok(false),
            },
            _ => Ok(false),
        }
    }

    async fn download(&self, element: &String) -> Result<Vec<u8>, StatementError> {
        let mut inner = self.lock();
        if !Self::visible(&inner, element) {
            return Err(StatementError::Download(format!("stale element {}", element)));
        }
        inner.downloads += 1;
        let downloads = inner.downloads;
        if let Some((after, stop)) = &inner.stop_after_downloads {
            if downloads >= *after {
                let _ = stop.send(true);
            }
        }
        Ok(inner.body.clone())
    }

    async fn close(&self) -> Result<(), StatementError> {
        let mut inner = self.lock();
        inner.closes += 1;
        inner.page = Page::Blank;
        inner.logged_in = false;
        Ok(())
    }
}

/// 固定値を返し、要求回数を数える認証情報
#[derive(Clone, Default)]
pub struct ScriptedCredentials {
    calls: Arc<Mutex<HashMap<CredentialKind, usize>>>,
}

impl ScriptedCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self, kind: CredentialKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

impl CredentialProvider for ScriptedCredentials {
    fn obtain(
        &self,
        kind: CredentialKind,
        seed: Option<&str>,
    ) -> Result<SecretString, StatementError> {
        *self.calls.lock().unwrap().entry(kind).or_insert(0) += 1;
        let value = match (kind, seed) {
            (_, Some(seed)) => seed.to_string(),
            (CredentialKind::IdentityNumber, None) => "01019912345".to_string(),
            (CredentialKind::Pin, None) => "1234".to_string(),
            (CredentialKind::OneTimeCode, None) => "123456".to_string(),
        };
        Ok(SecretString::from(value))
    }
}
