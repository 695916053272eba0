//! chromiumoxide による `BrowserDriver` 実装

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::element::Element;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::RunSettings;
use crate::error::StatementError;
use crate::traits::BrowserDriver;

pub struct ChromiumDriver {
    browser: Mutex<Option<Browser>>,
    handler: Mutex<Option<JoinHandle<()>>>,
    page: Page,
}

impl ChromiumDriver {
    /// ブラウザを起動して空のページを開く
    pub async fn launch(settings: &RunSettings) -> Result<Self, StatementError> {
        info!("Launching browser (headless={})", settings.headless);

        let mut builder = BrowserConfig::builder()
            .window_size(1280, 800)
            .request_timeout(Duration::from_secs(60))
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-dev-shm-usage");

        if let Some(path) = settings.resolve_chrome_path() {
            builder = builder.chrome_executable(path);
        }

        if settings.headless {
            builder = builder.arg("--headless=new");
        } else {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| StatementError::BrowserInit(format!("ブラウザ設定エラー: {}", e)))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| StatementError::BrowserInit(e.to_string()))?;

        // ブラウザイベントハンドラをバックグラウンドで実行
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser event error: {:?}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| StatementError::BrowserInit(e.to_string()))?;

        info!("Browser ready");
        Ok(Self {
            browser: Mutex::new(Some(browser)),
            handler: Mutex::new(Some(handler_task)),
            page,
        })
    }

    async fn exists(&self, selector: &str) -> Result<bool, StatementError> {
        let script = format!(
            "document.querySelector({}) !== null",
            js_string(selector)
        );
        self.page
            .evaluate(script.as_str())
            .await
            .map_err(|e| StatementError::Navigation(e.to_string()))?
            .into_value::<bool>()
            .map_err(|e| StatementError::Navigation(e.to_string()))
    }
}

/// JSの文字列リテラルとして埋め込む
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_string()).to_string()
}

#[async_trait]
impl BrowserDriver for ChromiumDriver {
    type Element = Element;

    async fn open(&self, url: &str) -> Result<(), StatementError> {
        debug!("Opening {}", url);
        self.page
            .goto(url)
            .await
            .map_err(|e| StatementError::Navigation(e.to_string()))?;
        Ok(())
    }

    async fn find(&self, selector: &str) -> Result<Option<Element>, StatementError> {
        if !self.exists(selector).await? {
            return Ok(None);
        }
        // 確認後に要素が消えることがある (ページ遷移中)
        match self.page.find_element(selector).await {
            Ok(element) => Ok(Some(element)),
            Err(e) => {
                debug!("Element {} vanished: {}", selector, e);
                Ok(None)
            }
        }
    }

    async fn click(&self, element: &Element) -> Result<(), StatementError> {
        element
            .click()
            .await
            .map_err(|e| StatementError::Navigation(format!("クリック失敗: {}", e)))?;
        Ok(())
    }

    async fn type_text(&self, element: &Element, text: &str) -> Result<(), StatementError> {
        element
            .click()
            .await
            .map_err(|e| StatementError::Navigation(format!("入力欄フォーカス失敗: {}", e)))?
            .type_str(text)
            .await
            .map_err(|e| StatementError::Navigation(format!("入力失敗: {}", e)))?;
        Ok(())
    }

    async fn select_option(&self, selector: &str, value: &str) -> Result<bool, StatementError> {
        // jQuery UIで隠されたselectを表示してから値を設定する
        let script = format!(
            r#"
            (function(sel, value) {{
                var el = document.querySelector(sel);
                if (!el) {{
                    return "missing";
                }}
                el.style.display = "block";
                var found = Array.prototype.some.call(el.options, function(o) {{
                    return o.value === value;
                }});
                if (!found) {{
                    return "no_option";
                }}
                el.value = value;
                el.dispatchEvent(new Event("change", {{ bubbles: true }}));
                return "selected";
            }})({}, {})
            "#,
            js_string(selector),
            js_string(value)
        );

        let status: String = self
            .page
            .evaluate(script.as_str())
            .await
            .map_err(|e| StatementError::Navigation(e.to_string()))?
            .into_value()
            .map_err(|e| StatementError::Navigation(e.to_string()))?;

        match status.as_str() {
            "selected" => Ok(true),
            "no_option" => Ok(false),
            _ => Err(StatementError::ElementNotFound(selector.to_string())),
        }
    }

    async fn download(&self, element: &Element) -> Result<Vec<u8>, StatementError> {
        let href = element
            .attribute("href")
            .await
            .map_err(|e| StatementError::Navigation(e.to_string()))?
            .ok_or_else(|| StatementError::Download("リンクにhrefがありません".into()))?;
        debug!("Fetching document from {}", href);

        // セッションのクッキー付きでページ内から取得し、base64で受け取る
        let script = format!(
            r#"
            (async function(url) {{
                const response = await fetch(url, {{ credentials: "include" }});
                if (!response.ok) {{
                    throw new Error("HTTP " + response.status);
                }}
                const bytes = new Uint8Array(await response.arrayBuffer());
                let binary = "";
                for (let i = 0; i < bytes.length; i += 0x8000) {{
                    binary += String.fromCharCode.apply(null, bytes.subarray(i, i + 0x8000));
                }}
                return btoa(binary);
            }})({})
            "#,
            js_string(&href)
        );

        let params = EvaluateParams::builder()
            .expression(script)
            .await_promise(true)
            .return_by_value(true)
            .build()
            .map_err(StatementError::Download)?;

        let encoded: String = self
            .page
            .evaluate_expression(params)
            .await
            .map_err(|e| StatementError::Download(e.to_string()))?
            .into_value()
            .map_err(|e| StatementError::Download(e.to_string()))?;

        base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| StatementError::Download(format!("base64デコード失敗: {}", e)))
    }

    async fn close(&self) -> Result<(), StatementError> {
        info!("Closing browser...");

        if let Some(mut browser) = self.browser.lock().await.take() {
            if let Err(e) = browser.close().await {
                warn!("Failed to close browser cleanly: {}", e);
            }
            if let Err(e) = browser.wait().await {
                debug!("Failed to reap browser process: {}", e);
            }
        }

        if let Some(handler) = self.handler.lock().await.take() {
            handler.abort();
        }

        info!("Browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_js_string_escapes_quotes() {
        assert_eq!(js_string("a[title='DNB']"), r#""a[title='DNB']""#);
        assert_eq!(js_string(r#"say "hi""#), r#""say \"hi\"""#);
    }
}
