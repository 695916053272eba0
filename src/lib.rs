//! DNB 口座明細 (PDF) 一括ダウンロード
//!
//! - 設定ファイル (口座 × 期間) を検証し、(口座, 月) の作業単位に展開
//! - ブラウザでログインし、アーカイブ画面から各月の口座明細を取得
//! - `<別名または口座番号>_<MM-YYYY>.pdf` として保存 (保存済みはスキップ)
//!
//! # 使用例
//!
//! ```rust,ignore
//! use statement_scraper::{Config, ConsolePrompt, ExtractionRequest, ExtractionService};
//! use tower::Service;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::load("statements.toml".as_ref(), false).unwrap();
//!     let mut service = ExtractionService::new(ConsolePrompt::new());
//!
//!     let request = ExtractionRequest::new(config)
//!         .with_output_dir("./statements")
//!         .with_headless(false);
//!
//!     let report = service.call(request).await.unwrap();
//!     println!("{}", report.summary());
//! }
//! ```

pub mod config;
pub mod dnb;
pub mod download;
pub mod error;
pub mod jobs;
pub mod orchestrator;
pub mod prompt;
pub mod service;
pub mod traits;

// 主要な型をリエクスポート
pub use config::{RetryPolicy, RunSettings};
pub use dnb::{ChromiumDriver, Session, SessionManager, StatementNavigator};
pub use download::{DownloadResolver, DownloadResult, DownloadStatus};
pub use error::{ConfigError, StatementError};
pub use jobs::{expand, AccountId, AccountSpec, Config, ConfigFormat, Job, MonthToken};
pub use orchestrator::{ExtractionOrchestrator, Halt, RunReport, UnitOutcome, UnitReport};
pub use prompt::{ConsolePrompt, StaticCredentials};
pub use service::{ExtractionRequest, ExtractionService};
pub use traits::{BrowserDriver, CredentialKind, CredentialProvider, WaitCondition};
