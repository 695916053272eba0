//! 認証情報の供給元

use std::collections::HashMap;

use dialoguer::{Input, Password};
use secrecy::SecretString;
use tracing::debug;

use crate::error::StatementError;
use crate::traits::{CredentialKind, CredentialProvider};

/// 端末で対話的に入力してもらう
#[derive(Debug, Clone, Default)]
pub struct ConsolePrompt;

impl ConsolePrompt {
    pub fn new() -> Self {
        Self
    }

    fn prompt_text(kind: CredentialKind) -> String {
        format!("{} ({} digits)", kind.label(), kind.expected_len())
    }

    /// 入力欄ごとの検証。不正なら dialoguer がメッセージを出して再入力させる
    fn validator(kind: CredentialKind) -> impl Fn(&String) -> Result<(), String> {
        move |input: &String| kind.check(input.trim())
    }
}

impl CredentialProvider for ConsolePrompt {
    fn obtain(
        &self,
        kind: CredentialKind,
        seed: Option<&str>,
    ) -> Result<SecretString, StatementError> {
        if let Some(seed) = seed {
            return Ok(SecretString::from(seed.to_string()));
        }

        debug!("Asking user for {:?}", kind);
        let value = match kind {
            CredentialKind::IdentityNumber => Input::<String>::new()
                .with_prompt(Self::prompt_text(kind))
                .validate_with(Self::validator(kind))
                .interact_text()
                .map_err(|e| StatementError::Prompt(e.to_string()))?,
            // PINとワンタイムパスワードは伏せ字
            CredentialKind::Pin | CredentialKind::OneTimeCode => Password::new()
                .with_prompt(Self::prompt_text(kind))
                .validate_with(Self::validator(kind))
                .interact()
                .map_err(|e| StatementError::Prompt(e.to_string()))?,
        };

        Ok(SecretString::from(value.trim().to_string()))
    }
}

/// 事前に与えた値だけを返す (非対話実行用)
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials {
    values: HashMap<CredentialKind, String>,
}

impl StaticCredentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: CredentialKind, value: impl Into<String>) -> Self {
        self.values.insert(kind, value.into());
        self
    }

    /// `DNB_PIN` と `DNB_OTP` から読み込む
    pub fn from_env() -> Self {
        let mut credentials = Self::new();
        for (kind, var) in [
            (CredentialKind::Pin, "DNB_PIN"),
            (CredentialKind::OneTimeCode, "DNB_OTP"),
        ] {
            if let Ok(value) = std::env::var(var) {
                credentials = credentials.with(kind, value);
            }
        }
        credentials
    }
}

impl CredentialProvider for StaticCredentials {
    fn obtain(
        &self,
        kind: CredentialKind,
        seed: Option<&str>,
    ) -> Result<SecretString, StatementError> {
        let value = seed
            .map(str::to_string)
            .or_else(|| self.values.get(&kind).cloned())
            .ok_or_else(|| {
                StatementError::Prompt(format!("{} が指定されていません", kind.label()))
            })?;
        kind.check(&value).map_err(StatementError::Prompt)?;
        Ok(SecretString::from(value))
    }
}

#[cfg(test)]
mod tests {
    use secrecy::ExposeSecret;

    use super::*;

    #[test]
    fn test_static_credentials_prefers_seed() {
        let credentials = StaticCredentials::new().with(CredentialKind::IdentityNumber, "11111111111");
        let value = credentials
            .obtain(CredentialKind::IdentityNumber, Some("22222222222"))
            .unwrap();
        assert_eq!(value.expose_secret(), "22222222222");
    }

    #[test]
    fn test_static_credentials_missing_and_invalid() {
        let credentials = StaticCredentials::new().with(CredentialKind::Pin, "12");
        assert!(matches!(
            credentials.obtain(CredentialKind::OneTimeCode, None),
            Err(StatementError::Prompt(_))
        ));
        assert!(matches!(
            credentials.obtain(CredentialKind::Pin, None),
            Err(StatementError::Prompt(_))
        ));
    }

    #[test]
    fn test_console_validator_trims_and_rejects() {
        let pin = ConsolePrompt::validator(CredentialKind::Pin);
        assert!(pin(&" 1234 ".to_string()).is_ok());
        assert!(pin(&"12a4".to_string()).unwrap_err().contains("numerical digits"));

        let otp = ConsolePrompt::validator(CredentialKind::OneTimeCode);
        assert!(otp(&"1234".to_string()).unwrap_err().contains("exactly 6 digits"));
        assert!(otp(&"123456".to_string()).is_ok());
    }

    #[test]
    fn test_console_prompt_uses_seed_without_asking() {
        let value = ConsolePrompt::new()
            .obtain(CredentialKind::IdentityNumber, Some("01019912345"))
            .unwrap();
        assert_eq!(value.expose_secret(), "01019912345");
    }
}
