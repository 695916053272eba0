//! 認証済みブラウザセッションの管理

use std::time::{Duration, Instant};

use secrecy::{ExposeSecret, SecretString};
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use super::selectors;
use crate::config::{RetryPolicy, RunSettings};
use crate::error::StatementError;
use crate::traits::{BrowserDriver, CredentialKind, CredentialProvider, WaitCondition};

/// 同意モーダルを待つ上限
const CONSENT_WAIT: Duration = Duration::from_secs(3);

/// ログイン失敗 (タイムアウト) がこの回数続いたら諦める
const MAX_CONSECUTIVE_AUTH_FAILURES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticating,
    Active,
    Expired,
}

/// ブラウザを所有する認証セッション
pub struct Session<D: BrowserDriver> {
    driver: D,
    state: SessionState,
    identity_number: Option<SecretString>,
    /// 再ログイン後、まだ1件も処理が進んでいない
    relogin_pending: bool,
    auth_failures: u32,
    logins: u32,
}

impl<D: BrowserDriver> Session<D> {
    pub fn new(driver: D) -> Self {
        Self {
            driver,
            state: SessionState::Unauthenticated,
            identity_number: None,
            relogin_pending: false,
            auth_failures: 0,
            logins: 0,
        }
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// ログイン試行回数 (初回を含む)
    pub fn login_attempts(&self) -> u32 {
        self.logins
    }

    /// 1件の処理がセッション切れなしで終わった
    pub fn record_progress(&mut self) {
        self.relogin_pending = false;
    }

    /// ページ上でログイン画面に戻されたのを検出した
    pub fn mark_expired(&mut self) {
        if self.state == SessionState::Active {
            warn!("Session expired");
        }
        self.state = SessionState::Expired;
    }
}

/// ログイン、生存確認、再ログイン、終了を担当する
pub struct SessionManager<C: CredentialProvider> {
    credentials: C,
    identity_seed: Option<String>,
    timeout: Duration,
    login_timeout: Duration,
    retry: RetryPolicy,
}

impl<C: CredentialProvider> SessionManager<C> {
    pub fn new(credentials: C, identity_seed: Option<String>, settings: &RunSettings) -> Self {
        Self {
            credentials,
            identity_seed,
            timeout: settings.timeout,
            login_timeout: settings.login_timeout,
            retry: settings.retry,
        }
    }

    /// ログインしてセッションを Active にする。
    /// 時間内に認証済み画面へ到達できなければ `AuthenticationTimeout`
    pub async fn login<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), StatementError> {
        session.state = SessionState::Authenticating;
        session.logins += 1;
        info!("Logging in (attempt {})", session.logins);

        let start = Instant::now();
        match self.run_login_flow(session).await {
            Ok(()) => {
                session.state = SessionState::Active;
                session.auth_failures = 0;
                info!("Login successful after {:?}", start.elapsed());
                Ok(())
            }
            Err(e) if e.is_transient() => {
                session.state = SessionState::Unauthenticated;
                session.auth_failures += 1;
                warn!("Login did not complete: {}", e);
                Err(StatementError::AuthenticationTimeout {
                    waited: start.elapsed(),
                    reason: e.to_string(),
                })
            }
            Err(e) => {
                session.state = SessionState::Unauthenticated;
                error!("Login failed: {}", e);
                Err(e)
            }
        }
    }

    /// 初回ログイン。タイムアウトは1回だけやり直す
    pub async fn establish<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), StatementError> {
        match self.login(session).await {
            Err(StatementError::AuthenticationTimeout { .. }) => {
                warn!("Retrying login once");
                self.login(session).await.map_err(|e| match e {
                    StatementError::AuthenticationTimeout { reason, .. } => {
                        StatementError::SessionLost(format!("ログインが2回続けて失敗しました: {}", reason))
                    }
                    other => other,
                })
            }
            other => other,
        }
    }

    /// 画面が認証済みの状態か (ログインフォームがなく、ログイン後メニューがある)
    pub async fn is_alive<D: BrowserDriver>(
        &self,
        session: &Session<D>,
    ) -> Result<bool, StatementError> {
        if session.state != SessionState::Active {
            return Ok(false);
        }
        let driver = session.driver();
        if driver.find(selectors::LOGIN_UID_INPUT).await?.is_some() {
            return Ok(false);
        }
        Ok(driver.find(selectors::LOGGED_IN_MARKER).await?.is_some())
    }

    /// 生存確認。ページ遷移中などの一時的な失敗は再試行し、
    /// 使い切ったら切れたものとして扱う
    async fn check_alive<D: BrowserDriver>(
        &self,
        session: &Session<D>,
    ) -> Result<bool, StatementError> {
        let mut attempt = 0;
        loop {
            match self.is_alive(session).await {
                Ok(alive) => return Ok(alive),
                Err(e) if e.is_transient() && self.retry.should_retry(attempt) => {
                    let backoff = self.retry.backoff(attempt);
                    debug!("Session check failed, retrying in {:?}: {}", backoff, e);
                    sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) if e.is_transient() => {
                    warn!("Session check kept failing, treating as expired: {}", e);
                    return Ok(false);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// 各 (口座, 月) の前に呼ぶ。切れていれば再ログインする。
    /// 再ログイン直後に再び切れた場合、またはログインのタイムアウトが続いた場合は `SessionLost`
    pub async fn ensure_active<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), StatementError> {
        if self.check_alive(session).await? {
            return Ok(());
        }
        session.mark_expired();

        if session.relogin_pending {
            return Err(StatementError::SessionLost(
                "再ログイン直後に再びセッションが切れました".into(),
            ));
        }

        match self.login(session).await {
            Ok(()) => {
                session.relogin_pending = true;
                Ok(())
            }
            Err(StatementError::AuthenticationTimeout { reason, .. })
                if session.auth_failures >= MAX_CONSECUTIVE_AUTH_FAILURES =>
            {
                Err(StatementError::SessionLost(format!(
                    "ログインが{}回続けて失敗しました: {}",
                    session.auth_failures, reason
                )))
            }
            Err(e) => Err(e),
        }
    }

    /// ブラウザを閉じる (失敗してもログのみ)
    pub async fn close<D: BrowserDriver>(&self, mut session: Session<D>) {
        session.state = SessionState::Unauthenticated;
        if let Err(e) = session.driver.close().await {
            warn!("Failed to close browser: {}", e);
        }
    }

    fn identity_number<'a>(
        &self,
        cached: &'a mut Option<SecretString>,
    ) -> Result<&'a SecretString, StatementError> {
        if cached.is_none() {
            *cached = Some(
                self.credentials
                    .obtain(CredentialKind::IdentityNumber, self.identity_seed.as_deref())?,
            );
        }
        cached
            .as_ref()
            .ok_or_else(|| StatementError::Prompt("個人番号を取得できませんでした".into()))
    }

    async fn run_login_flow<D: BrowserDriver>(
        &self,
        session: &mut Session<D>,
    ) -> Result<(), StatementError> {
        let Session {
            driver,
            identity_number,
            ..
        } = session;

        driver.open(selectors::PORTAL_URL).await?;

        // 同意モーダルは出ないこともある
        match driver
            .wait_until(
                WaitCondition::Present(selectors::CONSENT_CLOSE),
                CONSENT_WAIT.min(self.timeout),
            )
            .await
        {
            Ok(_) => {
                if let Some(close) = driver.find(selectors::CONSENT_CLOSE).await? {
                    driver.click(&close).await?;
                    driver
                        .wait_until(WaitCondition::Absent(selectors::CONSENT_CLOSE), self.timeout)
                        .await?;
                    debug!("Consent modal closed");
                }
            }
            Err(StatementError::Timeout(_)) => debug!("No consent modal"),
            Err(e) => return Err(e),
        }

        // 第1段階: 個人番号
        let trigger = driver.wait_for(selectors::LOGIN_TRIGGER, self.timeout).await?;
        driver.click(&trigger).await?;

        let uid_input = driver
            .wait_for(selectors::LOGIN_UID_INPUT, self.timeout)
            .await?;
        let identity = self.identity_number(identity_number)?;
        driver
            .type_text(&uid_input, identity.expose_secret())
            .await?;

        let submit = driver
            .wait_for(selectors::LOGIN_UID_SUBMIT, self.timeout)
            .await?;
        driver.click(&submit).await?;
        debug!("First stage login form submitted");

        // 第2段階: BankIDからPIN + ワンタイムパスワードに切り替える
        let toggle = driver
            .wait_for(selectors::PIN_OTP_TOGGLE, self.login_timeout)
            .await?;
        driver.click(&toggle).await?;

        let pin_input = driver.wait_for(selectors::PIN_INPUT, self.timeout).await?;
        let otp_input = driver.wait_for(selectors::OTP_INPUT, self.timeout).await?;

        let pin = self.credentials.obtain(CredentialKind::Pin, None)?;
        let otp = self.credentials.obtain(CredentialKind::OneTimeCode, None)?;

        driver.type_text(&pin_input, pin.expose_secret()).await?;
        driver.type_text(&otp_input, otp.expose_secret()).await?;

        let submit = driver
            .wait_for(selectors::PIN_OTP_SUBMIT, self.timeout)
            .await?;
        driver.click(&submit).await?;
        debug!("Second stage login form submitted");

        driver
            .wait_until(
                WaitCondition::Present(selectors::LOGGED_IN_MARKER),
                self.login_timeout,
            )
            .await?;

        // ログイン直後の案内画面を避けるためホームに戻る
        if let Some(logo) = driver.find(selectors::HOME_LOGO).await? {
            driver.click(&logo).await?;
        }

        Ok(())
    }
}
