use std::fmt;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::BrowserError;

/// How to find an element on the current page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    Name(String),
    LinkText(String),
    Tag(String),
    XPath(String),
}

impl Locator {
    pub fn name(s: &str) -> Self {
        Locator::Name(s.to_string())
    }

    pub fn link_text(s: &str) -> Self {
        Locator::LinkText(s.to_string())
    }

    pub fn tag(s: &str) -> Self {
        Locator::Tag(s.to_string())
    }

    pub fn xpath(s: &str) -> Self {
        Locator::XPath(s.to_string())
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::Name(v) => write!(f, "name={v}"),
            Locator::LinkText(v) => write!(f, "link text '{v}'"),
            Locator::Tag(v) => write!(f, "<{v}>"),
            Locator::XPath(v) => write!(f, "xpath {v}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCondition {
    Presence,
    /// Present, displayed and enabled.
    Clickable,
}

/// Opaque handle to an element of the current page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Element(pub String);

/// The browser-automation driver. One session, one page at a time.
#[async_trait]
pub trait Browser: Send {
    async fn goto(&mut self, url: &str) -> Result<(), BrowserError>;
    async fn find(&mut self, locator: &Locator) -> Result<Element, BrowserError>;
    async fn find_all_in(
        &mut self,
        parent: &Element,
        locator: &Locator,
    ) -> Result<Vec<Element>, BrowserError>;
    /// Poll until the element satisfies `condition` or `timeout` elapses.
    async fn wait_for(
        &mut self,
        locator: &Locator,
        condition: WaitCondition,
        timeout: Duration,
    ) -> Result<Element, BrowserError>;
    async fn clear(&mut self, element: &Element) -> Result<(), BrowserError>;
    async fn send_keys(&mut self, element: &Element, text: &str) -> Result<(), BrowserError>;
    async fn click(&mut self, element: &Element) -> Result<(), BrowserError>;
    async fn text(&mut self, element: &Element) -> Result<String, BrowserError>;
    async fn page_source(&mut self) -> Result<String, BrowserError>;
    /// Release the driver session. Safe to call on a session that is already gone.
    async fn quit(&mut self) -> Result<(), BrowserError>;
}

#[async_trait]
pub trait BrowserLauncher: Sync {
    type Browser: Browser;

    async fn launch(&self) -> Result<Self::Browser, BrowserError>;
}

/// Scriptable portal double for the price-fetch tests.
#[cfg(test)]
pub mod scripted {
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    use super::*;

    /// What the portal does when a part number is submitted.
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// Results table with this net price cell.
        Price(&'static str),
        /// Results table with a header row only.
        NoRows,
        /// No results table ever shows up.
        Hang,
        /// No results table and a throttling notice on the page.
        Throttle,
        /// The driver dies.
        Crash,
        Panic,
    }

    #[derive(Debug, Clone)]
    pub struct Portal {
        pub accept_login: bool,
        pub login_form: bool,
        pub dead_link: Option<&'static str>,
        pub replies: HashMap<String, VecDeque<Reply>>,
    }

    impl Default for Portal {
        fn default() -> Self {
            Portal {
                accept_login: true,
                login_form: true,
                dead_link: None,
                replies: HashMap::new(),
            }
        }
    }

    impl Portal {
        /// Replies are consumed in order; the last one repeats.
        pub fn reply(mut self, part_number: &str, replies: &[Reply]) -> Self {
            self.replies
                .insert(part_number.to_string(), replies.iter().cloned().collect());
            self
        }
    }

    #[derive(Default, Clone)]
    pub struct Probe {
        pub quits: Arc<AtomicUsize>,
        pub submitted: Arc<Mutex<Vec<String>>>,
    }

    impl Probe {
        pub fn quits(&self) -> usize {
            self.quits.load(Ordering::SeqCst)
        }

        pub fn submitted(&self) -> Vec<String> {
            self.submitted.lock().unwrap().clone()
        }
    }

    pub struct ScriptedLauncher {
        pub portal: Portal,
        pub probe: Probe,
        pub refuse: bool,
    }

    impl ScriptedLauncher {
        pub fn new(portal: Portal) -> Self {
            ScriptedLauncher {
                portal,
                probe: Probe::default(),
                refuse: false,
            }
        }
    }

    #[async_trait]
    impl BrowserLauncher for ScriptedLauncher {
        type Browser = ScriptedBrowser;

        async fn launch(&self) -> Result<ScriptedBrowser, BrowserError> {
            if self.refuse {
                return Err(BrowserError::SessionLost("connection refused".into()));
            }
            Ok(ScriptedBrowser {
                portal: self.portal.clone(),
                probe: self.probe.clone(),
                source: String::new(),
                typed: String::new(),
                rows: Vec::new(),
                crashed: false,
            })
        }
    }

    pub struct ScriptedBrowser {
        portal: Portal,
        probe: Probe,
        source: String,
        typed: String,
        rows: Vec<Vec<String>>,
        crashed: bool,
    }

    impl ScriptedBrowser {
        fn alive(&self) -> Result<(), BrowserError> {
            if self.crashed {
                Err(BrowserError::SessionLost("invalid session id".into()))
            } else {
                Ok(())
            }
        }

        fn next_reply(&mut self) -> Reply {
            match self.portal.replies.get_mut(&self.typed) {
                Some(queue) if queue.len() > 1 => queue.pop_front().unwrap_or(Reply::NoRows),
                Some(queue) => queue.front().cloned().unwrap_or(Reply::NoRows),
                None => Reply::NoRows,
            }
        }

        fn submit(&mut self) -> Result<(), BrowserError> {
            self.probe.submitted.lock().unwrap().push(self.typed.clone());
            let header = vec!["Part".to_string(), "Net Unit Price".to_string()];
            self.source = "<html>price lookup</html>".into();
            match self.next_reply() {
                Reply::Price(cell) => self.rows = vec![header, vec![self.typed.clone(), cell.into()]],
                Reply::NoRows => self.rows = vec![header],
                Reply::Hang => self.rows.clear(),
                Reply::Throttle => {
                    self.rows.clear();
                    self.source = "<html>429 Too Many Requests</html>".into();
                }
                Reply::Crash => {
                    self.crashed = true;
                    return Err(BrowserError::SessionLost("chrome not reachable".into()));
                }
                Reply::Panic => panic!("driver exploded"),
            }
            Ok(())
        }

        fn index(id: &str, prefix: &str) -> Vec<usize> {
            id.strip_prefix(prefix)
                .map(|rest| rest.split(':').filter_map(|n| n.parse().ok()).collect())
                .unwrap_or_default()
        }
    }

    #[async_trait]
    impl Browser for ScriptedBrowser {
        async fn goto(&mut self, _url: &str) -> Result<(), BrowserError> {
            self.alive()?;
            self.source = "<form>Sign in</form>".into();
            Ok(())
        }

        async fn find(&mut self, locator: &Locator) -> Result<Element, BrowserError> {
            self.alive()?;
            let id = match locator {
                Locator::Name(n) if n == "password" => "password",
                Locator::Name(n) if n == "part_number" => "part_number",
                Locator::XPath(x) if x.contains("Login") => "login",
                Locator::XPath(x) if x.contains("Refresh") => "refresh",
                other => return Err(BrowserError::NotFound(other.to_string())),
            };
            Ok(Element(id.into()))
        }

        async fn find_all_in(
            &mut self,
            parent: &Element,
            locator: &Locator,
        ) -> Result<Vec<Element>, BrowserError> {
            self.alive()?;
            match locator {
                Locator::Tag(t) if t == "tr" && parent.0 == "table" => Ok((0..self.rows.len())
                    .map(|r| Element(format!("row:{r}")))
                    .collect()),
                Locator::XPath(_) => {
                    let idx = Self::index(&parent.0, "row:");
                    let r = idx.first().copied().unwrap_or(usize::MAX);
                    let width = self.rows.get(r).map_or(0, Vec::len);
                    Ok((0..width).map(|c| Element(format!("cell:{r}:{c}"))).collect())
                }
                other => Err(BrowserError::NotFound(other.to_string())),
            }
        }

        async fn wait_for(
            &mut self,
            locator: &Locator,
            _condition: WaitCondition,
            timeout: Duration,
        ) -> Result<Element, BrowserError> {
            self.alive()?;
            let timed_out = || BrowserError::Timeout(timeout, locator.to_string());
            match locator {
                Locator::Name(n) if n == "username" => {
                    if self.portal.login_form {
                        Ok(Element("username".into()))
                    } else {
                        Err(timed_out())
                    }
                }
                Locator::Name(n) if n == "part_number" => Ok(Element("part_number".into())),
                Locator::LinkText(text) => {
                    if self.portal.dead_link == Some(text.as_str()) {
                        Err(timed_out())
                    } else {
                        Ok(Element(format!("link:{text}")))
                    }
                }
                Locator::Tag(t) if t == "table" => {
                    if self.rows.is_empty() {
                        Err(timed_out())
                    } else {
                        Ok(Element("table".into()))
                    }
                }
                _ => Err(timed_out()),
            }
        }

        async fn clear(&mut self, element: &Element) -> Result<(), BrowserError> {
            self.alive()?;
            if element.0 == "part_number" {
                self.typed.clear();
            }
            Ok(())
        }

        async fn send_keys(&mut self, element: &Element, text: &str) -> Result<(), BrowserError> {
            self.alive()?;
            if element.0 == "part_number" {
                self.typed.push_str(text);
            }
            Ok(())
        }

        async fn click(&mut self, element: &Element) -> Result<(), BrowserError> {
            self.alive()?;
            match element.0.as_str() {
                "login" => {
                    self.source = if self.portal.accept_login {
                        "<a href=\"/logout\">Logout</a> Welcome back".into()
                    } else {
                        "<p>Invalid username or password</p>".into()
                    };
                    Ok(())
                }
                "refresh" => self.submit(),
                _ => Ok(()),
            }
        }

        async fn text(&mut self, element: &Element) -> Result<String, BrowserError> {
            self.alive()?;
            let idx = Self::index(&element.0, "cell:");
            match idx.as_slice() {
                [r, c] => self
                    .rows
                    .get(*r)
                    .and_then(|row| row.get(*c))
                    .cloned()
                    .ok_or_else(|| BrowserError::NotFound(element.0.clone())),
                _ => Ok(String::new()),
            }
        }

        async fn page_source(&mut self) -> Result<String, BrowserError> {
            self.alive()?;
            Ok(self.source.clone())
        }

        async fn quit(&mut self) -> Result<(), BrowserError> {
            self.probe.quits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
