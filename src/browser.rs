//! Headless Chrome sessions.
//!
//! Each worker gets its own Chrome process with an isolated profile directory
//! and debugging port. All calls are blocking and are made from the worker's
//! `spawn_blocking` thread.

use headless_chrome::browser::tab::NoElementFound;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::BrowserConfig;
use crate::session::{AutomationSession, ElementHandle, SessionError, SessionFactory};

const FIRST_DEBUG_PORT: u16 = 9222;
const LAST_DEBUG_PORT: u16 = 9322;

/// Chrome gives up on a silent DevTools connection after this long; cooldowns
/// and settle waits must stay well below it.
const IDLE_BROWSER_TIMEOUT: Duration = Duration::from_secs(600);

/// Hides `navigator.webdriver` and related automation hints
const DISABLE_AUTOMATION_FLAG: &str = "--disable-blink-features=AutomationControlled";

static PORT_COUNTER: AtomicU16 = AtomicU16::new(FIRST_DEBUG_PORT);

fn next_debug_port() -> u16 {
    let port = PORT_COUNTER.fetch_add(1, Ordering::Relaxed);
    if port >= LAST_DEBUG_PORT {
        PORT_COUNTER.store(FIRST_DEBUG_PORT, Ordering::Relaxed);
    }
    port
}

/// Sandbox must be off inside containers
fn is_container() -> bool {
    std::env::var("ALLEGRO_ENRICHER_CONTAINER").is_ok() || Path::new("/.dockerenv").exists()
}

/// Chrome binary: configured path, then `CHROME_PATH`, then headless_chrome's own lookup
fn chrome_binary(configured: Option<&Path>) -> Option<PathBuf> {
    configured
        .map(Path::to_path_buf)
        .or_else(|| std::env::var("CHROME_PATH").ok().map(PathBuf::from))
}

pub struct ChromeSessionFactory {
    config: BrowserConfig,
    navigation_timeout: Duration,
}

impl ChromeSessionFactory {
    pub fn new(config: BrowserConfig, navigation_timeout: Duration) -> Self {
        Self {
            config,
            navigation_timeout,
        }
    }

    /// Profile directory of one worker; stable across restarts of that worker
    pub fn profile_dir(&self, worker_id: usize) -> PathBuf {
        self.config.profile_root.join(format!("profile_{}", worker_id))
    }

    fn launch_options(&self, worker_id: usize) -> Result<LaunchOptions<'static>, SessionError> {
        let profile_dir = self.profile_dir(worker_id);
        std::fs::create_dir_all(&profile_dir).map_err(|e| {
            SessionError::Launch(format!(
                "cannot create profile directory {}: {}",
                profile_dir.display(),
                e
            ))
        })?;

        let port = next_debug_port();
        debug!(
            worker = worker_id,
            "Launching Chrome on port {} with profile {}",
            port,
            profile_dir.display()
        );

        LaunchOptions::default_builder()
            .headless(self.config.headless)
            .sandbox(!is_container())
            .window_size(Some((self.config.window_width, self.config.window_height)))
            .port(Some(port))
            .path(chrome_binary(self.config.chrome_path.as_deref()))
            .user_data_dir(Some(profile_dir))
            .idle_browser_timeout(IDLE_BROWSER_TIMEOUT)
            .args(vec![OsStr::new(DISABLE_AUTOMATION_FLAG)])
            .build()
            .map_err(|e| SessionError::Launch(format!("invalid launch options: {}", e)))
    }
}

impl SessionFactory for ChromeSessionFactory {
    fn create(&self, worker_id: usize) -> Result<Box<dyn AutomationSession>, SessionError> {
        let options = self.launch_options(worker_id)?;
        let browser = Browser::new(options)
            .map_err(|e| SessionError::Launch(format!("failed to launch Chrome: {}", e)))?;
        let tab = browser
            .new_tab()
            .map_err(|e| SessionError::Launch(format!("failed to open tab: {}", e)))?;
        tab.set_default_timeout(self.navigation_timeout);

        if self.config.stealth {
            if let Err(e) = tab.enable_stealth_mode() {
                warn!(worker = worker_id, "Stealth mode unavailable: {}", e);
            }
        }

        info!(worker = worker_id, "Browser session started");
        Ok(Box::new(ChromeSession {
            worker_id,
            browser: Some(browser),
            tab: Some(tab),
            elements: Vec::new(),
        }))
    }
}

/// One Chrome process and its single tab
pub struct ChromeSession {
    worker_id: usize,
    browser: Option<Browser>,
    tab: Option<Arc<Tab>>,
    /// Attributes of the elements returned by the last query, indexed by handle
    elements: Vec<Vec<(String, String)>>,
}

impl ChromeSession {
    fn tab(&self) -> Result<&Arc<Tab>, SessionError> {
        self.tab.as_ref().ok_or(SessionError::Closed)
    }
}

impl AutomationSession for ChromeSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        self.elements.clear();
        let nav_err = |e: anyhow::Error| SessionError::Navigation {
            url: url.to_string(),
            message: e.to_string(),
        };
        let tab = self.tab()?;
        tab.navigate_to(url).map_err(nav_err)?;
        tab.wait_until_navigated().map_err(nav_err)?;
        Ok(())
    }

    fn current_url(&self) -> Result<String, SessionError> {
        Ok(self.tab()?.get_url())
    }

    fn rendered_text(&self) -> Result<String, SessionError> {
        let body = self
            .tab()?
            .find_element("body")
            .map_err(|e| SessionError::Read(e.to_string()))?;
        body.get_inner_text()
            .map_err(|e| SessionError::Read(e.to_string()))
    }

    fn find_elements(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        let query_err = |e: anyhow::Error| SessionError::Query {
            selector: selector.to_string(),
            message: e.to_string(),
        };

        let tab = Arc::clone(self.tab()?);
        let found = match tab.find_elements(selector) {
            Ok(found) => found,
            Err(e) if e.downcast_ref::<NoElementFound>().is_some() => Vec::new(),
            Err(e) => return Err(query_err(e)),
        };

        let mut snapshot = Vec::with_capacity(found.len());
        for element in &found {
            let flat = element.get_attributes().map_err(query_err)?.unwrap_or_default();
            let pairs = flat
                .chunks(2)
                .filter_map(|pair| match pair {
                    [name, value] => Some((name.clone(), value.clone())),
                    _ => None,
                })
                .collect();
            snapshot.push(pairs);
        }

        self.elements = snapshot;
        Ok((0..self.elements.len()).map(ElementHandle::new).collect())
    }

    fn element_attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        let attributes = self.elements.get(element.index()).ok_or_else(|| SessionError::Query {
            selector: format!("#{}", element.index()),
            message: "stale element handle".to_string(),
        })?;
        Ok(attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone()))
    }

    fn close(&mut self) {
        self.elements.clear();
        if let Some(tab) = self.tab.take() {
            if let Err(e) = tab.close(false) {
                debug!(worker = self.worker_id, "Tab close failed: {}", e);
            }
        }
        // dropping the browser kills the Chrome process
        if self.browser.take().is_some() {
            debug!(worker = self.worker_id, "Browser session closed");
        }
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_dir_per_worker() {
        let config = BrowserConfig {
            profile_root: PathBuf::from("/tmp/profiles"),
            ..Default::default()
        };
        let factory = ChromeSessionFactory::new(config, Duration::from_secs(60));
        assert_eq!(factory.profile_dir(0), PathBuf::from("/tmp/profiles/profile_0"));
        assert_ne!(factory.profile_dir(1), factory.profile_dir(2));
    }

    #[test]
    fn test_debug_ports_stay_in_range() {
        for _ in 0..250 {
            let port = next_debug_port();
            assert!((FIRST_DEBUG_PORT..=LAST_DEBUG_PORT).contains(&port));
        }
    }

    #[test]
    fn test_configured_chrome_path_wins() {
        let configured = PathBuf::from("/opt/chrome/chrome");
        assert_eq!(chrome_binary(Some(&configured)), Some(configured.clone()));
    }
}
