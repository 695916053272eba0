use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::watch;
use tower::Service;
use tracing::info;

use crate::config::RunSettings;
use crate::dnb::{ChromiumDriver, Session};
use crate::error::StatementError;
use crate::jobs::Config;
use crate::orchestrator::{ExtractionOrchestrator, RunReport};
use crate::traits::CredentialProvider;

/// 抽出リクエスト
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub config: Config,
    pub settings: RunSettings,
    pub stop: Option<watch::Receiver<bool>>,
}

impl ExtractionRequest {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            settings: RunSettings::default(),
            stop: None,
        }
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.settings.output_dir = path.into();
        self
    }

    pub fn with_headless(mut self, headless: bool) -> Self {
        self.settings.headless = headless;
        self
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// tower::Serviceを実装した抽出サービス。
/// 1リクエストごとにブラウザを起動し、終了時に閉じる
#[derive(Debug, Clone, Default)]
pub struct ExtractionService<C> {
    credentials: C,
}

impl<C> ExtractionService<C>
where
    C: CredentialProvider + Clone + 'static,
{
    pub fn new(credentials: C) -> Self {
        Self { credentials }
    }
}

impl<C> Service<ExtractionRequest> for ExtractionService<C>
where
    C: CredentialProvider + Clone + 'static,
{
    type Response = RunReport;
    type Error = StatementError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: ExtractionRequest) -> Self::Future {
        info!(
            "Extraction request received: {} jobs, output={:?}",
            req.config.jobs.len(),
            req.settings.output_dir
        );
        let credentials = self.credentials.clone();

        Box::pin(async move {
            // ブラウザ起動前に止められた
            if req.stop.as_ref().is_some_and(|rx| *rx.borrow()) {
                return Err(StatementError::Cancelled);
            }

            std::fs::create_dir_all(&req.settings.output_dir)?;

            let mut orchestrator =
                ExtractionOrchestrator::new(&req.config, &req.settings, credentials);
            if let Some(stop) = req.stop {
                orchestrator = orchestrator.with_stop_signal(stop);
            }

            let driver = ChromiumDriver::launch(&req.settings).await?;
            let report = orchestrator.run(Session::new(driver)).await;

            info!("Extraction completed: {}", report.summary());
            Ok(report)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::RawConfig;

    fn config() -> Config {
        let raw = RawConfig::from_toml_str(
            r#"
[[jobs]]
start = "01/2020"
stop = "03/2020"
accounts = [{ id = "1234.56.78901", name = "checking" }]
"#,
        )
        .unwrap();
        Config::validate(raw, false).unwrap()
    }

    #[test]
    fn test_extraction_request_builder() {
        let req = ExtractionRequest::new(config())
            .with_output_dir("/tmp/dl")
            .with_headless(false);

        assert_eq!(req.settings.output_dir, PathBuf::from("/tmp/dl"));
        assert!(!req.settings.headless);
        assert!(req.stop.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_before_launch() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let req = ExtractionRequest::new(config())
            .with_output_dir(std::env::temp_dir().join("never-created"))
            .with_stop_signal(rx);

        let mut service = ExtractionService::new(crate::prompt::StaticCredentials::new());
        let err = service.call(req).await.unwrap_err();
        assert!(matches!(err, StatementError::Cancelled));
    }

    #[test]
    fn test_extraction_request_settings_override() {
        let settings = RunSettings::new("/tmp/other").with_headless(false);
        let req = ExtractionRequest::new(config()).with_settings(settings);
        assert_eq!(req.settings.output_dir, PathBuf::from("/tmp/other"));
        assert_eq!(req.config.unit_count(), 2);
    }
}
