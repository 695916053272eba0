//! 取得した明細PDFの保存

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::dnb::DocumentHandle;
use crate::error::StatementError;
use crate::jobs::{AccountId, AccountSpec, MonthToken};
use crate::traits::BrowserDriver;

const PDF_MAGIC: &[u8] = b"%PDF";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DownloadStatus {
    Saved,
    SkippedExisting,
    Failed { cause: String },
}

/// (口座, 月) 1件分の保存結果
#[derive(Debug, Clone, Serialize)]
pub struct DownloadResult {
    pub account_id: AccountId,
    pub month: MonthToken,
    pub target_path: PathBuf,
    #[serde(flatten)]
    pub status: DownloadStatus,
}

impl DownloadResult {
    pub fn failed(
        account: &AccountSpec,
        month: MonthToken,
        target_path: PathBuf,
        cause: impl Into<String>,
    ) -> Self {
        Self {
            account_id: account.account_id.clone(),
            month,
            target_path,
            status: DownloadStatus::Failed {
                cause: cause.into(),
            },
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.status, DownloadStatus::Failed { .. })
    }
}

pub struct DownloadResolver {
    output_dir: PathBuf,
}

impl DownloadResolver {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    /// `<別名または口座番号>_<MM-YYYY>.pdf`
    pub fn file_name(account: &AccountSpec, month: MonthToken) -> String {
        format!(
            "{}_{}.pdf",
            sanitize(account.file_stem()),
            month.file_suffix()
        )
    }

    pub fn target_path(&self, account: &AccountSpec, month: MonthToken) -> PathBuf {
        self.output_dir.join(Self::file_name(account, month))
    }

    /// 保存済みなら `SkippedExisting` を返す (画面操作は不要)
    pub fn existing(&self, account: &AccountSpec, month: MonthToken) -> Option<DownloadResult> {
        let target_path = self.target_path(account, month);
        target_path.is_file().then(|| DownloadResult {
            account_id: account.account_id.clone(),
            month,
            target_path,
            status: DownloadStatus::SkippedExisting,
        })
    }

    /// 明細を取得して保存する。書き込み失敗は `Failed` として返し、実行は止めない
    pub async fn resolve<D: BrowserDriver>(
        &self,
        driver: &D,
        handle: &DocumentHandle<D::Element>,
        account: &AccountSpec,
        month: MonthToken,
    ) -> DownloadResult {
        if let Some(existing) = self.existing(account, month) {
            debug!("Already saved: {:?}", existing.target_path);
            return existing;
        }

        let target_path = self.target_path(account, month);

        let bytes = match driver.download(&handle.element).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(account = %account.account_id, month = %month, "Download failed: {}", e);
                return DownloadResult::failed(account, month, target_path, e.to_string());
            }
        };

        if !bytes.starts_with(PDF_MAGIC) {
            warn!(
                account = %account.account_id,
                month = %month,
                "Downloaded {} bytes that are not a PDF",
                bytes.len()
            );
            return DownloadResult::failed(
                account,
                month,
                target_path,
                "取得したデータがPDFではありません",
            );
        }

        match self.write_atomic(&target_path, &bytes) {
            Ok(()) => {
                info!(
                    "Saved {:?} ({} bytes)",
                    target_path,
                    bytes.len()
                );
                DownloadResult {
                    account_id: account.account_id.clone(),
                    month,
                    target_path,
                    status: DownloadStatus::Saved,
                }
            }
            Err(e) => {
                warn!("Failed to write {:?}: {}", target_path, e);
                DownloadResult::failed(account, month, target_path, e.to_string())
            }
        }
    }

    /// 同じディレクトリの一時ファイルに書いてからリネームする
    fn write_atomic(&self, target: &Path, bytes: &[u8]) -> Result<(), StatementError> {
        fs::create_dir_all(&self.output_dir)?;

        let mut temp = NamedTempFile::new_in(&self.output_dir)?;
        temp.write_all(bytes)?;
        temp.as_file().sync_all()?;
        temp.persist(target).map_err(|e| StatementError::FileIO(e.error))?;
        Ok(())
    }
}

/// パス区切りと制御文字を `_` に置き換える
fn sanitize(stem: &str) -> String {
    stem.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '\0' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect()
}
