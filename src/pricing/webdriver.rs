use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::browser::{Browser, BrowserLauncher, Element, Locator, WaitCondition};
use crate::config::PricingConfig;
use crate::error::BrowserError;

/// W3C key under which element references are returned.
const ELEMENT_KEY: &str = "element-6066-11e4-a07c-4f96efb4b6c9";
const POLL_INTERVAL: Duration = Duration::from_millis(250);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

/// Starts Chrome sessions on a running WebDriver server (chromedriver).
pub struct WebDriverLauncher {
    client: Client,
    base_url: String,
    args: Vec<String>,
}

impl WebDriverLauncher {
    pub fn new(cfg: &PricingConfig) -> Result<Self, BrowserError> {
        let client = Client::builder().timeout(COMMAND_TIMEOUT).build()?;
        Ok(WebDriverLauncher {
            client,
            base_url: cfg.webdriver_url.trim_end_matches('/').to_string(),
            args: cfg.browser_args.clone(),
        })
    }
}

#[async_trait]
impl BrowserLauncher for WebDriverLauncher {
    type Browser = WebDriverSession;

    async fn launch(&self) -> Result<WebDriverSession, BrowserError> {
        let caps = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": self.args },
                }
            }
        });
        let url = format!("{}/session", self.base_url);
        let value = send(&self.client, Method::POST, &url, Some(caps)).await?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::Protocol("new session response has no sessionId".into()))?
            .to_string();
        info!(session = %session_id, driver = %self.base_url, "Browser session started");

        Ok(WebDriverSession {
            client: self.client.clone(),
            session_url: format!("{}/session/{}", self.base_url, session_id),
            closed: false,
        })
    }
}

pub struct WebDriverSession {
    client: Client,
    session_url: String,
    closed: bool,
}

impl WebDriverSession {
    async fn command(&self, method: Method, path: &str, body: Option<Value>) -> Result<Value, BrowserError> {
        if self.closed {
            return Err(BrowserError::SessionLost("session already closed".into()));
        }
        let url = format!("{}{}", self.session_url, path);
        send(&self.client, method, &url, body).await
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value, BrowserError> {
        self.command(Method::POST, path, Some(body)).await
    }

    async fn get(&self, path: &str) -> Result<Value, BrowserError> {
        self.command(Method::GET, path, None).await
    }

    async fn is_clickable(&self, element: &Element) -> Result<bool, BrowserError> {
        let displayed = self.get(&format!("/element/{}/displayed", element.0)).await?;
        let enabled = self.get(&format!("/element/{}/enabled", element.0)).await?;
        Ok(displayed.as_bool().unwrap_or(false) && enabled.as_bool().unwrap_or(false))
    }
}

#[async_trait]
impl Browser for WebDriverSession {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError> {
        debug!(url, "Navigating");
        self.post("/url", json!({ "url": url })).await.map(drop)
    }

    async fn find(&mut self, locator: &Locator) -> Result<Element, BrowserError> {
        let value = self.post("/element", locator_body(locator)).await?;
        element_ref(&value)
    }

    async fn find_all_in(
        &mut self,
        parent: &Element,
        locator: &Locator,
    ) -> Result<Vec<Element>, BrowserError> {
        let value = self
            .post(&format!("/element/{}/elements", parent.0), locator_body(locator))
            .await?;
        value
            .as_array()
            .map(|items| items.iter().map(element_ref).collect())
            .unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn wait_for(
        &mut self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<Element, BrowserError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            match self.find(locator).await {
                Ok(el) => {
                    let ready = match condition {
                        WaitCondition::Presence => true,
                        WaitCondition::Clickable => self.is_clickable(&el).await?,
                    };
                    if ready {
                        return Ok(el);
                    }
                }
                Err(BrowserError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(BrowserError::Timeout(timeout, locator.to_string()));
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn clear(&mut self, element: &Element) -> Result<(), BrowserError> {
        self.post(&format!("/element/{}/clear", element.0), json!({}))
            .await
            .map(drop)
    }

    async fn send_keys(&mut self, element: &Element, text: &str) -> Result<(), BrowserError> {
        self.post(&format!("/element/{}/value", element.0), json!({ "text": text }))
            .await
            .map(drop)
    }

    async fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
        self.post(&format!("/element/{}/click", element.0), json!({}))
            .await
            .map(drop)
    }

    async fn text(&mut self, element: &Element) -> Result<String, BrowserError> {
        let value = self.get(&format!("/element/{}/text", element.0)).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn page_source(&mut self) -> Result<String, BrowserError> {
        let value = self.get("/source").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn quit(&mut self) -> Result<(), BrowserError> {
        if self.closed {
            return Ok(());
        }
        let result = self.command(Method::DELETE, "", None).await.map(drop);
        self.closed = true;
        info!("Browser session closed");
        result
    }
}

async fn send(client: &Client, method: Method, url: &str, body: Option<Value>) -> Result<Value, BrowserError> {
    let mut req = client.request(method, url);
    if let Some(body) = body {
        req = req.json(&body);
    }
    let resp = req.send().await.map_err(transport_error)?;
    let status = resp.status();
    let payload: Value = resp.json().await.map_err(transport_error)?;
    let value = payload.get("value").cloned().unwrap_or(Value::Null);

    if status.is_success() {
        Ok(value)
    } else {
        Err(command_error(&value))
    }
}

fn transport_error(e: reqwest::Error) -> BrowserError {
    if e.is_connect() {
        BrowserError::SessionLost(e.to_string())
    } else {
        BrowserError::Transport(e)
    }
}

/// Map a W3C error payload (`{"error": ..., "message": ...}`) onto `BrowserError`.
fn command_error(value: &Value) -> BrowserError {
    let code = value.get("error").and_then(Value::as_str).unwrap_or("unknown error");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    match code {
        "no such element" | "stale element reference" => BrowserError::NotFound(message),
        "invalid session id" | "no such window" | "session not created" => {
            BrowserError::SessionLost(format!("{code}: {message}"))
        }
        _ => BrowserError::Protocol(format!("{code}: {message}")),
    }
}

fn locator_body(locator: &Locator) -> Value {
    let (using, value) = match locator {
        Locator::Name(n) => ("css selector", format!("[name=\"{n}\"]")),
        Locator::LinkText(t) => ("link text", t.clone()),
        Locator::Tag(t) => ("tag name", t.clone()),
        Locator::XPath(x) => ("xpath", x.clone()),
    };
    json!({ "using": using, "value": value })
}

fn element_ref(value: &Value) -> Result<Element, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(|id| Element(id.to_string()))
        .ok_or_else(|| BrowserError::Protocol(format!("not an element reference: {value}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn locators_map_to_w3c_strategies() {
        assert_eq!(
            locator_body(&Locator::name("part_number")),
            json!({ "using": "css selector", "value": "[name=\"part_number\"]" })
        );
        assert_eq!(
            locator_body(&Locator::link_text("Orders")),
            json!({ "using": "link text", "value": "Orders" })
        );
        assert_eq!(locator_body(&Locator::tag("table"))["using"], "tag name");
        assert_eq!(locator_body(&Locator::xpath("./th|./td"))["using"], "xpath");
    }

    #[test]
    fn element_references() {
        let mut v = json!({});
        v[ELEMENT_KEY] = json!("f.1.e.42");
        assert_eq!(element_ref(&v).unwrap(), Element("f.1.e.42".into()));
        assert!(matches!(element_ref(&json!({})), Err(BrowserError::Protocol(_))));
    }

    #[test]
    fn error_payloads() {
        let missing = command_error(&json!({ "error": "no such element", "message": "#x" }));
        assert!(matches!(missing, BrowserError::NotFound(_)));

        let gone = command_error(&json!({ "error": "invalid session id", "message": "" }));
        assert!(gone.is_session_fatal());

        let other = command_error(&json!({ "error": "element click intercepted", "message": "overlay" }));
        assert!(matches!(other, BrowserError::Protocol(ref m) if m.contains("overlay")));

        assert!(matches!(command_error(&Value::Null), BrowserError::Protocol(_)));
    }

    #[tokio::test]
    async fn unreachable_driver_is_a_lost_session() {
        let cfg = PricingConfig {
            webdriver_url: "http://127.0.0.1:9".into(),
            ..PricingConfig::default()
        };
        let launcher = WebDriverLauncher::new(&cfg).unwrap();
        let err = launcher.launch().await.err().unwrap();
        assert!(err.is_session_fatal());
    }
}
