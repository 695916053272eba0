//! DNBポータルのURLとCSSセレクタ

pub const PORTAL_URL: &str = "https://www.dnb.no";

/// 同意モーダルの閉じるボタン
pub const CONSENT_CLOSE: &str = "#consent-modal button.consent-close";

/// ヘッダーの「Logg inn」ボタン
pub const LOGIN_TRIGGER: &str = "header button[data-testid='login-button']";

/// 第1段階: 個人番号
pub const LOGIN_UID_INPUT: &str = "#dnb-modal-root form input[name='uid']";
pub const LOGIN_UID_SUBMIT: &str = "#dnb-modal-root form button[type='submit']";

/// 第2段階: PIN + ワンタイムパスワード
pub const PIN_OTP_TOGGLE: &str = "#r_state-2 div[role='button']";
pub const PIN_INPUT: &str = "#r_state-2 form #phoneCode";
pub const OTP_INPUT: &str = "#r_state-2 form #otpCode";
pub const PIN_OTP_SUBMIT: &str = "#r_state-2 form button[type='submit']";

/// ログイン後の画面にだけある要素
pub const LOGGED_IN_MARKER: &str = "#menuLoggedIn";
pub const HOME_LOGO: &str = "a[title='DNB']";

/// アーカイブ (書類一覧)
pub const SITE_MENU: &str = "#menuLoggedIn li:first-child > a[role='button']";
pub const ARCHIVE_LINK: &str = "a[title='Arkiv']";
pub const DOCUMENT_TYPE_SELECT: &str = "select#documentType";
pub const ACCOUNT_SELECT: &str = "select#accountNumber";
pub const MONTH_SELECT: &str = "select#searchIntervalIndex";
pub const SEARCH_SUBMIT: &str = "#archiveSearchSubmit";

/// 検索結果
pub const STATEMENT_LINK: &str = "table a[href='ajax/attachment/0/kontoutskrift']";
pub const NO_HITS: &str = "#userInformationView";

/// 書類種別「口座明細」
pub const STATEMENT_DOCUMENT_TYPE: &str = "kontoutskrift";
