use std::fmt;
use std::panic::AssertUnwindSafe;

use chrono::Utc;
use futures::FutureExt;
use indicatif::{ProgressBar, ProgressStyle};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};

use super::browser::{Browser, BrowserLauncher, Element, Locator, WaitCondition};
use super::credentials::{CredentialStore, SiteCredentials};
use super::price_table;
use crate::config::PricingConfig;
use crate::error::{panic_message, BrowserError, LookupError, SessionError};
use crate::models::{ErrorKind, Part, PartStatus, ProcessingError};

const LOGIN_BUTTON: &str = "//input[@type='submit' or @value='Login']";
const REFRESH_BUTTON: &str = "//input[@type='submit' and @value='Refresh']";
const MENU_PATH: [&str; 3] = ["Orders", "Lookups", "Prices"];
const LOGIN_MARKERS: [&str; 2] = ["logout", "welcome"];
const THROTTLE_MARKERS: [&str; 2] = ["too many requests", "rate limit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Authenticating,
    Navigating,
    Ready,
    /// 1-based chunk number.
    Fetching { chunk: usize },
    Closed,
}

impl SessionState {
    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (_, Closed) => true,
            (Idle, Authenticating) => true,
            (Authenticating, Navigating) => true,
            (Navigating, Ready) => true,
            (Ready, Fetching { chunk }) => chunk == 1,
            (Fetching { chunk: a }, Fetching { chunk: b }) => b == a + 1,
            _ => false,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Authenticating => f.write_str("authenticating"),
            SessionState::Navigating => f.write_str("navigating"),
            SessionState::Ready => f.write_str("ready"),
            SessionState::Fetching { chunk } => write!(f, "fetching(chunk {chunk})"),
            SessionState::Closed => f.write_str("closed"),
        }
    }
}

/// Result of the pricing phase.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Every part handed in, in the same order. Parts the session never
    /// reached are still `price_pending`.
    pub parts: Vec<Part>,
    pub errors: Vec<ProcessingError>,
    pub priced: usize,
    /// Set when the whole phase failed.
    pub fatal: Option<SessionError>,
}

impl FetchReport {
    fn failed(parts: Vec<Part>, err: SessionError) -> Self {
        let mut report = FetchReport {
            parts,
            ..Default::default()
        };
        report.fail(err);
        report
    }

    fn fail(&mut self, err: SessionError) {
        error!(error = %err, "Price fetch failed");
        self.errors
            .push(ProcessingError::run_wide(err.kind(), err.to_string()));
        self.fatal = Some(err);
    }
}

/// A failed lookup after retries.
struct Attempted {
    error: LookupError,
    retries: u32,
}

/// Price every part in `parts` (expected to be `price_pending`) through one
/// browser session. The session is always released before returning.
pub async fn fetch_prices<L: BrowserLauncher>(
    launcher: &L,
    cfg: &PricingConfig,
    credentials: &CredentialStore,
    mut parts: Vec<Part>,
) -> FetchReport {
    if parts.is_empty() {
        info!("No parts need pricing");
        return FetchReport::default();
    }

    let Some(site) = credentials.get(&cfg.site_name) else {
        return FetchReport::failed(parts, SessionError::MissingCredentials(cfg.site_name.clone()));
    };

    let browser = match launcher.launch().await {
        Ok(b) => b,
        Err(e) => return FetchReport::failed(parts, SessionError::Driver(e)),
    };

    let mut session = PriceFetchSession::new(browser, cfg);
    let mut errors = Vec::new();
    let outcome = AssertUnwindSafe(session.run(site, &mut parts, &mut errors))
        .catch_unwind()
        .await;
    session.close().await;

    let mut report = FetchReport {
        parts,
        errors,
        ..Default::default()
    };
    match outcome {
        Ok(Ok(priced)) => {
            report.priced = priced;
            info!(priced, total = report.parts.len(), "Price fetch complete");
        }
        Ok(Err(e)) => report.fail(e),
        Err(payload) => report.fail(SessionError::Panicked(panic_message(payload.as_ref()))),
    }
    report
}

/// Owns the browser for the length of one portal session.
pub struct PriceFetchSession<'c, B: Browser> {
    browser: B,
    cfg: &'c PricingConfig,
    state: SessionState,
}

impl<'c, B: Browser> PriceFetchSession<'c, B> {
    pub fn new(browser: B, cfg: &'c PricingConfig) -> Self {
        PriceFetchSession {
            browser,
            cfg,
            state: SessionState::Idle,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) -> Result<(), SessionError> {
        if !self.state.can_transition_to(next) {
            return Err(SessionError::IllegalTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(from = %self.state, to = %next, "Session transition");
        self.state = next;
        Ok(())
    }

    /// Login, menu navigation, then every part chunk by chunk. Returns the
    /// number of parts priced. Per-part failures land in `errors`; a returned
    /// error means the session itself is unusable.
    async fn run(
        &mut self,
        site: &SiteCredentials,
        parts: &mut [Part],
        errors: &mut Vec<ProcessingError>,
    ) -> Result<usize, SessionError> {
        self.transition(SessionState::Authenticating)?;
        self.authenticate(site).await?;

        self.transition(SessionState::Navigating)?;
        self.navigate_to_lookup().await?;

        self.transition(SessionState::Ready)?;

        let pb = ProgressBar::new(parts.len() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} prices ({per_sec}, eta {eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );

        let chunk_size = self.cfg.chunk_size.max(1);
        let chunks = parts.len().div_ceil(chunk_size);
        let mut priced = 0;

        for (i, chunk) in parts.chunks_mut(chunk_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(self.cfg.chunk_delay()).await;
            }
            self.transition(SessionState::Fetching { chunk: i + 1 })?;
            info!(chunk = i + 1, chunks, size = chunk.len(), "Fetching price chunk");

            for part in chunk.iter_mut() {
                let outcome = match self.price_with_retry(&part.part_number).await {
                    Err(Attempted {
                        error: LookupError::Browser(e),
                        ..
                    }) if e.is_session_fatal() => {
                        pb.finish_and_clear();
                        return Err(SessionError::Driver(e));
                    }
                    other => other,
                };
                if settle(part, outcome, self.cfg, errors) {
                    priced += 1;
                }
                pb.inc(1);
                tokio::time::sleep(self.cfg.request_delay()).await;
            }
        }

        pb.finish_and_clear();
        Ok(priced)
    }

    async fn authenticate(&mut self, site: &SiteCredentials) -> Result<(), SessionError> {
        info!(site = %site.name, "Logging in");
        let login_err = |e: BrowserError| {
            if e.is_session_fatal() {
                SessionError::Driver(e)
            } else {
                SessionError::LoginTimeout(e)
            }
        };

        self.browser.goto(&site.url).await.map_err(login_err)?;
        let username = self
            .browser
            .wait_for(&Locator::name("username"), WaitCondition::Presence, self.cfg.login_wait())
            .await
            .map_err(login_err)?;
        self.fill(&username, &site.username).await.map_err(login_err)?;

        let password = self.browser.find(&Locator::name("password")).await.map_err(login_err)?;
        self.fill(&password, &site.password).await.map_err(login_err)?;

        let submit = self.browser.find(&Locator::xpath(LOGIN_BUTTON)).await.map_err(login_err)?;
        self.browser.click(&submit).await.map_err(login_err)?;
        tokio::time::sleep(self.cfg.login_settle()).await;

        let source = self.browser.page_source().await.map_err(login_err)?.to_lowercase();
        if LOGIN_MARKERS.iter().any(|m| source.contains(m)) {
            info!(site = %site.name, "Logged in");
            Ok(())
        } else {
            Err(SessionError::LoginRejected(site.name.clone()))
        }
    }

    async fn navigate_to_lookup(&mut self) -> Result<(), SessionError> {
        let nav_err = |e: BrowserError| {
            if e.is_session_fatal() {
                SessionError::Driver(e)
            } else {
                SessionError::LookupUnreachable(e)
            }
        };

        for link in MENU_PATH {
            let el = self
                .browser
                .wait_for(&Locator::link_text(link), WaitCondition::Clickable, self.cfg.navigation_wait())
                .await
                .map_err(nav_err)?;
            self.browser.click(&el).await.map_err(nav_err)?;
        }
        self.browser
            .wait_for(&Locator::name("part_number"), WaitCondition::Presence, self.cfg.navigation_wait())
            .await
            .map_err(nav_err)?;
        info!("Price lookup page ready");
        Ok(())
    }

    async fn price_with_retry(&mut self, part_number: &str) -> Result<Option<Decimal>, Attempted> {
        let mut attempt = 0;
        loop {
            match self.fetch_price(part_number).await {
                Ok(price) => return Ok(price),
                Err(e) if e.is_retryable() && attempt < self.cfg.max_retries => {
                    let backoff = self.cfg.backoff(attempt);
                    warn!(
                        "{} on {} (attempt {}/{}), backing off {:.1}s",
                        e,
                        part_number,
                        attempt + 1,
                        self.cfg.max_retries,
                        backoff.as_secs_f64()
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(error) => {
                    return Err(Attempted {
                        error,
                        retries: attempt,
                    })
                }
            }
        }
    }

    /// One lookup. `Ok(None)` means the portal answered without a usable price.
    pub async fn fetch_price(&mut self, part_number: &str) -> Result<Option<Decimal>, LookupError> {
        let field = self.browser.find(&Locator::name("part_number")).await?;
        self.fill(&field, part_number).await?;
        let refresh = self.browser.find(&Locator::xpath(REFRESH_BUTTON)).await?;
        self.browser.click(&refresh).await?;

        let table = match self
            .browser
            .wait_for(&Locator::tag("table"), WaitCondition::Presence, self.cfg.result_wait())
            .await
        {
            Ok(t) => t,
            Err(BrowserError::Timeout(..)) => return Err(self.classify_timeout().await),
            Err(e) => return Err(e.into()),
        };

        let rows = self.read_rows(&table).await?;
        match price_table::price_from_rows(&rows) {
            Some(p) if p < self.cfg.min_price || p > self.cfg.max_price => Err(LookupError::OutOfRange(p)),
            price => Ok(price),
        }
    }

    async fn classify_timeout(&mut self) -> LookupError {
        match self.browser.page_source().await {
            Ok(source) => {
                let source = source.to_lowercase();
                if THROTTLE_MARKERS.iter().any(|m| source.contains(m)) {
                    LookupError::RateLimited
                } else {
                    LookupError::Timeout
                }
            }
            Err(e) => e.into(),
        }
    }

    async fn read_rows(&mut self, table: &Element) -> Result<Vec<Vec<String>>, BrowserError> {
        let mut rows = Vec::new();
        for row in self.browser.find_all_in(table, &Locator::tag("tr")).await? {
            let mut cells = Vec::new();
            for cell in self.browser.find_all_in(&row, &Locator::xpath("./th|./td")).await? {
                cells.push(self.browser.text(&cell).await?.trim().to_string());
            }
            rows.push(cells);
        }
        Ok(rows)
    }

    async fn fill(&mut self, element: &Element, text: &str) -> Result<(), BrowserError> {
        self.browser.clear(element).await?;
        self.browser.send_keys(element, text).await
    }

    /// Release the browser. Runs on every exit path; idempotent.
    pub async fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        let from = self.state;
        self.state = SessionState::Closed;
        if let Err(e) = self.browser.quit().await {
            warn!(error = %e, "Browser did not shut down cleanly");
        }
        debug!(from = %from, "Session closed");
    }
}

/// Apply one lookup outcome to its part. Returns whether the part was priced.
fn settle(
    part: &mut Part,
    outcome: Result<Option<Decimal>, Attempted>,
    cfg: &PricingConfig,
    errors: &mut Vec<ProcessingError>,
) -> bool {
    let (kind, message, retries) = match outcome {
        Ok(Some(price)) => match part.mark_priced(price, Utc::now()) {
            Ok(()) => {
                debug!(part_number = %part.part_number, %price, "Priced");
                return true;
            }
            Err(e) => (ErrorKind::Unexpected, e.to_string(), 0),
        },
        Ok(None) => (
            ErrorKind::NotFound,
            format!("No price found on {}", cfg.site_name),
            0,
        ),
        Err(Attempted { error, retries }) => (error.kind(), error.to_string(), retries),
    };

    warn!(part_number = %part.part_number, kind = %kind, "{}", message);
    if let Err(e) = part.advance(PartStatus::PriceFailed) {
        warn!(error = %e, "Part left in its current status");
    }
    errors.push(
        ProcessingError::new(part.part_number.clone(), kind, message)
            .with_retries(retries)
            .on_page(part.page_reference),
    );
    false
}

#[cfg(test)]
mod tests {
    use super::super::browser::scripted::{Portal, Reply, ScriptedLauncher};
    use super::*;

    fn cfg() -> PricingConfig {
        PricingConfig {
            request_delay_ms: 0,
            chunk_delay_ms: 0,
            login_settle_ms: 0,
            backoff_base_ms: 0,
            login_wait_secs: 0,
            navigation_wait_secs: 0,
            result_wait_secs: 0,
            chunk_size: 2,
            ..PricingConfig::default()
        }
    }

    fn creds() -> CredentialStore {
        CredentialStore::from_json(
            r#"{"websites":[{"name":"Jacuzzi Dealer","url":"https://dealer.example.com","username":"lou","password":"pw"}]}"#,
        )
        .unwrap()
    }

    fn pending(ids: &[&str]) -> Vec<Part> {
        ids.iter()
            .enumerate()
            .map(|(i, id)| {
                let mut p = Part::new(*id, "", "", i as u32 + 1);
                p.advance(PartStatus::PricePending).unwrap();
                p
            })
            .collect()
    }

    fn statuses(report: &FetchReport) -> Vec<PartStatus> {
        report.parts.iter().map(|p| p.status).collect()
    }

    #[test]
    fn state_machine_transitions() {
        use SessionState::*;
        assert!(Idle.can_transition_to(Authenticating));
        assert!(Authenticating.can_transition_to(Navigating));
        assert!(Navigating.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Fetching { chunk: 1 }));
        assert!(Fetching { chunk: 1 }.can_transition_to(Fetching { chunk: 2 }));
        for s in [Idle, Authenticating, Navigating, Ready, Fetching { chunk: 3 }, Closed] {
            assert!(s.can_transition_to(Closed));
        }
        assert!(!Idle.can_transition_to(Ready));
        assert!(!Ready.can_transition_to(Fetching { chunk: 2 }));
        assert!(!Fetching { chunk: 2 }.can_transition_to(Fetching { chunk: 2 }));
        assert!(!Closed.can_transition_to(Authenticating));
    }

    #[tokio::test]
    async fn prices_every_part_in_chunks() {
        let portal = Portal::default()
            .reply("6000-487", &[Reply::Price("$123.45")])
            .reply("A6000-123", &[Reply::Price("$1,050.00")])
            .reply("2015-05", &[Reply::Price("8.5")]);
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "A6000-123", "2015-05"])).await;

        assert!(report.fatal.is_none());
        assert!(report.errors.is_empty());
        assert_eq!(report.priced, 3);
        assert_eq!(statuses(&report), vec![PartStatus::Priced; 3]);
        assert_eq!(report.parts[0].price, Some(Decimal::new(12345, 2)));
        assert_eq!(report.parts[1].price, Some(Decimal::new(105000, 2)));
        assert!(report.parts.iter().all(|p| p.last_price_update.is_some()));
        assert_eq!(launcher.probe.submitted(), vec!["6000-487", "A6000-123", "2015-05"]);
        assert_eq!(launcher.probe.quits(), 1);
    }

    #[tokio::test]
    async fn per_part_failures_do_not_stop_the_loop() {
        let portal = Portal::default()
            .reply("6000-487", &[Reply::NoRows])
            .reply("6000-111", &[Reply::Price("99999.00")])
            .reply("A6000-123", &[Reply::Price("$10.00")]);
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "6000-111", "A6000-123"])).await;

        assert!(report.fatal.is_none());
        assert_eq!(report.priced, 1);
        assert_eq!(
            statuses(&report),
            vec![PartStatus::PriceFailed, PartStatus::PriceFailed, PartStatus::Priced]
        );
        let kinds: Vec<_> = report.errors.iter().map(|e| e.error_type).collect();
        assert_eq!(kinds, vec![ErrorKind::NotFound, ErrorKind::Validation]);
        assert_eq!(report.errors[0].part_number, "6000-487");
        assert_eq!(report.errors[0].page_reference, 1);
        assert!(report.parts[1].price.is_none());
    }

    #[tokio::test]
    async fn timeouts_are_retried_then_recorded() {
        let portal = Portal::default()
            .reply("6000-487", &[Reply::Hang, Reply::Hang, Reply::Price("$5.00")])
            .reply("6000-111", &[Reply::Hang]);
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "6000-111"])).await;

        assert_eq!(statuses(&report), vec![PartStatus::Priced, PartStatus::PriceFailed]);
        assert_eq!(report.errors.len(), 1);
        let e = &report.errors[0];
        assert_eq!(e.error_type, ErrorKind::Network);
        assert_eq!(e.retry_count, 3);
        // 3 tries for the first part, 1 + 3 retries for the second.
        assert_eq!(launcher.probe.submitted().len(), 7);
    }

    #[tokio::test]
    async fn throttling_is_classified_as_rate_limit() {
        let portal = Portal::default().reply("6000-487", &[Reply::Throttle]);
        let launcher = ScriptedLauncher::new(portal);
        let config = PricingConfig {
            max_retries: 1,
            ..cfg()
        };

        let report = fetch_prices(&launcher, &config, &creds(), pending(&["6000-487"])).await;

        assert_eq!(report.errors[0].error_type, ErrorKind::RateLimit);
        assert_eq!(report.errors[0].retry_count, 1);
    }

    #[tokio::test]
    async fn rejected_login_fails_the_phase() {
        let portal = Portal {
            accept_login: false,
            ..Portal::default()
        };
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "6000-111"])).await;

        assert!(matches!(report.fatal, Some(SessionError::LoginRejected(_))));
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].is_run_wide());
        assert_eq!(report.errors[0].error_type, ErrorKind::LoginFailure);
        assert_eq!(statuses(&report), vec![PartStatus::PricePending; 2]);
        assert!(launcher.probe.submitted().is_empty());
        assert_eq!(launcher.probe.quits(), 1);
    }

    #[tokio::test]
    async fn missing_login_form_is_a_login_failure() {
        let portal = Portal {
            login_form: false,
            ..Portal::default()
        };
        let launcher = ScriptedLauncher::new(portal);
        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487"])).await;
        assert!(matches!(report.fatal, Some(SessionError::LoginTimeout(_))));
        assert_eq!(report.errors[0].error_type, ErrorKind::LoginFailure);
        assert_eq!(launcher.probe.quits(), 1);
    }

    #[tokio::test]
    async fn missing_credentials_never_launch_a_browser() {
        let launcher = ScriptedLauncher::new(Portal::default());
        let report = fetch_prices(&launcher, &cfg(), &CredentialStore::default(), pending(&["6000-487"])).await;

        assert!(matches!(report.fatal, Some(SessionError::MissingCredentials(_))));
        assert_eq!(report.errors[0].part_number, "ALL");
        assert_eq!(report.errors[0].error_type, ErrorKind::LoginFailure);
        assert_eq!(report.parts.len(), 1);
        assert_eq!(launcher.probe.quits(), 0);
    }

    #[tokio::test]
    async fn unreachable_menu_leaves_parts_pending() {
        let portal = Portal {
            dead_link: Some("Lookups"),
            ..Portal::default()
        };
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "6000-111", "2015-05"])).await;

        assert!(matches!(report.fatal, Some(SessionError::LookupUnreachable(_))));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.errors[0].part_number, "ALL");
        assert_eq!(report.errors[0].error_type, ErrorKind::Network);
        assert_eq!(statuses(&report), vec![PartStatus::PricePending; 3]);
        assert_eq!(launcher.probe.quits(), 1);
    }

    #[tokio::test]
    async fn lost_session_aborts_the_rest() {
        let portal = Portal::default()
            .reply("6000-487", &[Reply::Price("$1.00")])
            .reply("6000-111", &[Reply::Crash])
            .reply("2015-05", &[Reply::Price("$2.00")]);
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "6000-111", "2015-05"])).await;

        assert!(matches!(report.fatal, Some(SessionError::Driver(_))));
        assert_eq!(
            statuses(&report),
            vec![PartStatus::Priced, PartStatus::PricePending, PartStatus::PricePending]
        );
        assert_eq!(report.errors.len(), 1);
        assert!(report.errors[0].is_run_wide());
        assert_eq!(report.errors[0].error_type, ErrorKind::Unexpected);
        assert_eq!(launcher.probe.submitted(), vec!["6000-487", "6000-111"]);
        assert_eq!(launcher.probe.quits(), 1);
    }

    #[tokio::test]
    async fn panics_are_contained_and_the_browser_released() {
        let portal = Portal::default().reply("6000-487", &[Reply::Panic]);
        let launcher = ScriptedLauncher::new(portal);

        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487"])).await;

        match &report.fatal {
            Some(SessionError::Panicked(msg)) => assert!(msg.contains("driver exploded")),
            other => panic!("expected a panic report, got {other:?}"),
        }
        assert_eq!(report.errors[0].error_type, ErrorKind::Unexpected);
        assert_eq!(report.parts[0].status, PartStatus::PricePending);
        assert_eq!(launcher.probe.quits(), 1);
    }

    #[tokio::test]
    async fn launch_failure_is_recorded_once() {
        let mut launcher = ScriptedLauncher::new(Portal::default());
        launcher.refuse = true;
        let report = fetch_prices(&launcher, &cfg(), &creds(), pending(&["6000-487", "6000-111"])).await;
        assert!(matches!(report.fatal, Some(SessionError::Driver(_))));
        assert_eq!(report.errors.len(), 1);
        assert_eq!(report.parts.len(), 2);
    }

    #[tokio::test]
    async fn nothing_to_price() {
        let launcher = ScriptedLauncher::new(Portal::default());
        let report = fetch_prices(&launcher, &cfg(), &creds(), Vec::new()).await;
        assert!(report.fatal.is_none());
        assert!(report.parts.is_empty());
        assert_eq!(launcher.probe.quits(), 0);
    }

    #[tokio::test]
    async fn session_refuses_out_of_order_steps() {
        let launcher = ScriptedLauncher::new(Portal::default());
        let browser = launcher.launch().await.unwrap();
        let config = cfg();
        let mut session = PriceFetchSession::new(browser, &config);
        assert!(matches!(
            session.transition(SessionState::Ready),
            Err(SessionError::IllegalTransition { .. })
        ));
        assert_eq!(session.state(), SessionState::Idle);
        session.close().await;
        session.close().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert_eq!(launcher.probe.quits(), 1);
    }
}
