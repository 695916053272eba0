//! 抽出処理全体の制御
//!
//! 設定 (ジョブ × 口座 × 月) を作業単位の列に展開し、状態機械として1件ずつ処理する。
//! `INIT → LOGIN → (ENSURE_SESSION → NAVIGATE → RESOLVE_DOWNLOAD)* → DONE`

use std::fmt;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::config::RunSettings;
use crate::dnb::{Lookup, NotFoundReason, Session, SessionManager, StatementNavigator};
use crate::download::{DownloadResolver, DownloadResult, DownloadStatus};
use crate::error::StatementError;
use crate::jobs::{AccountSpec, Config, MonthToken};
use crate::traits::{BrowserDriver, CredentialProvider};

/// 1件の作業単位
#[derive(Debug, Clone)]
pub struct WorkUnit {
    pub job: usize,
    pub account: AccountSpec,
    pub month: MonthToken,
}

/// 設定順 (ジョブ → 口座 → 月の昇順) に展開する
pub fn plan(config: &Config) -> Vec<WorkUnit> {
    let mut units = Vec::with_capacity(config.unit_count());
    for (job_index, job) in config.jobs.iter().enumerate() {
        let months = job.months();
        if months.is_empty() {
            warn!("Job {} has no months to process", job_index);
        }
        for account in &job.accounts {
            for month in &months {
                units.push(WorkUnit {
                    job: job_index,
                    account: account.clone(),
                    month: *month,
                });
            }
        }
    }
    units
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnitOutcome {
    Resolved(DownloadResult),
    NotFound { reason: NotFoundReason },
    /// 中断または致命的エラーのため未処理
    NotAttempted,
}

#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub job: usize,
    pub account_id: String,
    pub display_name: Option<String>,
    pub month: MonthToken,
    pub outcome: UnitOutcome,
}

impl UnitReport {
    fn new(unit: &WorkUnit, outcome: UnitOutcome) -> Self {
        Self {
            job: unit.job,
            account_id: unit.account.account_id.to_string(),
            display_name: unit.account.display_name.clone(),
            month: unit.month,
            outcome,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(&self.outcome, UnitOutcome::Resolved(r) if r.is_failed())
    }
}

/// 実行が途中で止まった理由
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum Halt {
    Fatal(String),
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub saved: usize,
    pub skipped_existing: usize,
    pub not_found: usize,
    pub failed: usize,
    pub not_attempted: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub halted: Option<Halt>,
}

impl RunReport {
    pub fn summary(&self) -> Summary {
        let mut summary = Summary::default();
        for unit in &self.units {
            match &unit.outcome {
                UnitOutcome::Resolved(result) => match result.status {
                    DownloadStatus::Saved => summary.saved += 1,
                    DownloadStatus::SkippedExisting => summary.skipped_existing += 1,
                    DownloadStatus::Failed { .. } => summary.failed += 1,
                },
                UnitOutcome::NotFound { .. } => summary.not_found += 1,
                UnitOutcome::NotAttempted => summary.not_attempted += 1,
            }
        }
        summary
    }

    /// 全件が保存済み・スキップ・明細なしのいずれかで、途中停止もない
    pub fn is_success(&self) -> bool {
        self.halted.is_none() && !self.units.iter().any(UnitReport::is_failure)
    }

    pub fn failures(&self) -> impl Iterator<Item = &UnitReport> {
        self.units.iter().filter(|u| u.is_failure())
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "saved={} skipped_existing={} not_found={} failed={} not_attempted={}",
            self.saved, self.skipped_existing, self.not_found, self.failed, self.not_attempted
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Init,
    Login,
    EnsureSession(usize),
    Navigate(usize),
    Done,
}

pub struct ExtractionOrchestrator<C: CredentialProvider> {
    sessions: SessionManager<C>,
    navigator: StatementNavigator,
    resolver: DownloadResolver,
    units: Vec<WorkUnit>,
    stop: Option<watch::Receiver<bool>>,
}

impl<C: CredentialProvider> ExtractionOrchestrator<C> {
    pub fn new(config: &Config, settings: &RunSettings, credentials: C) -> Self {
        Self {
            sessions: SessionManager::new(credentials, config.identity_number.clone(), settings),
            navigator: StatementNavigator::new(settings),
            resolver: DownloadResolver::new(&settings.output_dir),
            units: plan(config),
            stop: None,
        }
    }

    /// 作業単位の間で確認する停止フラグ
    pub fn with_stop_signal(mut self, stop: watch::Receiver<bool>) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn with_navigator(mut self, navigator: StatementNavigator) -> Self {
        self.navigator = navigator;
        self
    }

    pub fn units(&self) -> &[WorkUnit] {
        &self.units
    }

    fn stop_requested(&self) -> bool {
        self.stop.as_ref().is_some_and(|rx| *rx.borrow())
    }

    /// 全件を処理する。終了時 (中断・致命的エラーを含む) に必ずセッションを閉じる
    pub async fn run<D: BrowserDriver>(&self, mut session: Session<D>) -> RunReport {
        let report = self.drive(&mut session).await;
        self.sessions.close(session).await;

        let summary = report.summary();
        match &report.halted {
            None => info!("Extraction finished: {}", summary),
            Some(halt) => warn!("Extraction halted ({:?}): {}", halt, summary),
        }
        report
    }

    async fn drive<D: BrowserDriver>(&self, session: &mut Session<D>) -> RunReport {
        let mut outcomes: Vec<Option<UnitOutcome>> = vec![None; self.units.len()];
        let mut halted = None;
        let mut step = Step::Init;

        while step != Step::Done {
            step = match step {
                Step::Init => {
                    info!("{} statements to process", self.units.len());
                    if self.units.iter().all(|u| self.resolver.existing(&u.account, u.month).is_some()) {
                        // 全件保存済みならログインしない
                        for (index, unit) in self.units.iter().enumerate() {
                            outcomes[index] = self
                                .resolver
                                .existing(&unit.account, unit.month)
                                .map(UnitOutcome::Resolved);
                        }
                        Step::Done
                    } else {
                        Step::Login
                    }
                }
                Step::Login => {
                    if self.stop_requested() {
                        halted = Some(Halt::Cancelled);
                        Step::Done
                    } else {
                        match self.sessions.establish(session).await {
                            Ok(()) => Step::EnsureSession(0),
                            Err(e) => {
                                error!("Unable to log in: {}", e);
                                halted = Some(Halt::Fatal(e.to_string()));
                                Step::Done
                            }
                        }
                    }
                }
                Step::EnsureSession(index) if index >= self.units.len() => Step::Done,
                Step::EnsureSession(index) => {
                    let unit = &self.units[index];

                    if let Some(existing) = self.resolver.existing(&unit.account, unit.month) {
                        info!(
                            account = %unit.account.account_id,
                            month = %unit.month,
                            "Already downloaded, skipping"
                        );
                        outcomes[index] = Some(UnitOutcome::Resolved(existing));
                        Step::EnsureSession(index + 1)
                    } else if self.stop_requested() {
                        warn!("Stop requested, halting before {} {}", unit.account.account_id, unit.month);
                        halted = Some(Halt::Cancelled);
                        Step::Done
                    } else {
                        match self.sessions.ensure_active(session).await {
                            Ok(()) => Step::Navigate(index),
                            Err(e) if e.is_fatal() => {
                                error!("Session cannot be re-established: {}", e);
                                outcomes[index] = Some(self.failed(unit, &e));
                                halted = Some(Halt::Fatal(e.to_string()));
                                Step::Done
                            }
                            Err(e) => {
                                warn!(
                                    account = %unit.account.account_id,
                                    month = %unit.month,
                                    "Session not available: {}",
                                    e
                                );
                                outcomes[index] = Some(self.failed(unit, &e));
                                Step::EnsureSession(index + 1)
                            }
                        }
                    }
                }
                Step::Navigate(index) => {
                    let unit = &self.units[index];
                    match self
                        .navigator
                        .locate_and_open(session.driver(), &unit.account.account_id, unit.month)
                        .await
                    {
                        Ok(Lookup::Found(handle)) => {
                            let result = self
                                .resolver
                                .resolve(session.driver(), &handle, &unit.account, unit.month)
                                .await;
                            session.record_progress();
                            outcomes[index] = Some(UnitOutcome::Resolved(result));
                            Step::EnsureSession(index + 1)
                        }
                        Ok(Lookup::NotFound(reason)) => {
                            warn!(
                                account = %unit.account.account_id,
                                month = %unit.month,
                                "No statement: {}",
                                reason
                            );
                            session.record_progress();
                            outcomes[index] = Some(UnitOutcome::NotFound { reason });
                            Step::EnsureSession(index + 1)
                        }
                        Err(StatementError::SessionExpired) => {
                            // 同じ作業単位をセッション確認からやり直す
                            session.mark_expired();
                            Step::EnsureSession(index)
                        }
                        Err(e) if e.is_fatal() => {
                            error!("Fatal error: {}", e);
                            outcomes[index] = Some(self.failed(unit, &e));
                            halted = Some(Halt::Fatal(e.to_string()));
                            Step::Done
                        }
                        Err(e) => {
                            warn!(
                                account = %unit.account.account_id,
                                month = %unit.month,
                                "Navigation failed: {}",
                                e
                            );
                            session.record_progress();
                            outcomes[index] = Some(self.failed(unit, &e));
                            Step::EnsureSession(index + 1)
                        }
                    }
                }
                Step::Done => Step::Done,
            };
        }

        let units = self
            .units
            .iter()
            .zip(outcomes)
            .map(|(unit, outcome)| {
                UnitReport::new(unit, outcome.unwrap_or(UnitOutcome::NotAttempted))
            })
            .collect();

        RunReport { units, halted }
    }

    fn failed(&self, unit: &WorkUnit, error: &StatementError) -> UnitOutcome {
        UnitOutcome::Resolved(DownloadResult::failed(
            &unit.account,
            unit.month,
            self.resolver.target_path(&unit.account, unit.month),
            error.to_string(),
        ))
    }
}
