//! DNB ネットバンクのブラウザ操作
//!
//! ログイン・セッション維持と、アーカイブ画面から口座明細を探す処理

mod browser;
mod navigator;
pub mod selectors;
mod session;

pub use browser::ChromiumDriver;
pub use navigator::{DocumentHandle, Lookup, NotFoundReason, StatementNavigator};
pub use session::{Session, SessionManager, SessionState};
