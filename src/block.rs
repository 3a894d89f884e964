//! Block detection for anti-automation countermeasures

use std::fmt;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::DetectionConfig;
use crate::session::{AutomationSession, SessionError};

#[derive(Error, Debug)]
#[error("Could not read session state: {0}")]
pub struct DetectionError(#[from] pub SessionError);

/// Which marker flagged the page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockReason {
    UrlMarker(String),
    TextMarker(String),
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::UrlMarker(m) => write!(f, "url contains '{}'", m),
            BlockReason::TextMarker(m) => write!(f, "page text contains '{}'", m),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    Clear,
    Blocked(BlockReason),
}

/// Case-insensitive marker matcher over a session's URL and page text
#[derive(Debug, Clone)]
pub struct BlockDetector {
    url_markers: Vec<String>,
    text_markers: Vec<String>,
}

impl BlockDetector {
    pub fn new<U, T>(url_markers: U, text_markers: T) -> Self
    where
        U: IntoIterator,
        U::Item: AsRef<str>,
        T: IntoIterator,
        T::Item: AsRef<str>,
    {
        let normalize = |m: &str| m.trim().to_lowercase();
        Self {
            url_markers: url_markers
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
            text_markers: text_markers
                .into_iter()
                .map(|m| normalize(m.as_ref()))
                .filter(|m| !m.is_empty())
                .collect(),
        }
    }

    pub fn from_config(config: &DetectionConfig) -> Self {
        Self::new(&config.url_markers, &config.text_markers)
    }

    /// Classify the session's current page. Reads URL and text, mutates nothing.
    pub fn inspect(&self, session: &dyn AutomationSession) -> Result<PageState, DetectionError> {
        let url = session.current_url()?.to_lowercase();
        if let Some(marker) = self.url_markers.iter().find(|m| url.contains(m.as_str())) {
            return Ok(PageState::Blocked(BlockReason::UrlMarker(marker.clone())));
        }

        let text = session.rendered_text()?.to_lowercase();
        if let Some(marker) = self.text_markers.iter().find(|m| text.contains(m.as_str())) {
            return Ok(PageState::Blocked(BlockReason::TextMarker(marker.clone())));
        }

        Ok(PageState::Clear)
    }

    /// True when the page is blocked or its state cannot be read
    pub fn is_blocked(&self, session: &dyn AutomationSession) -> bool {
        match self.inspect(session) {
            Ok(PageState::Clear) => false,
            Ok(PageState::Blocked(reason)) => {
                debug!("Block detected: {}", reason);
                true
            }
            Err(e) => {
                warn!("{}; treating page as blocked", e);
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ElementHandle;

    struct StaticPage {
        url: Result<String, SessionError>,
        text: Result<String, SessionError>,
    }

    impl StaticPage {
        fn new(url: &str, text: &str) -> Self {
            Self { url: Ok(url.to_string()), text: Ok(text.to_string()) }
        }
    }

    impl AutomationSession for StaticPage {
        fn navigate(&mut self, _url: &str) -> Result<(), SessionError> {
            Ok(())
        }
        fn current_url(&self) -> Result<String, SessionError> {
            self.url.clone()
        }
        fn rendered_text(&self) -> Result<String, SessionError> {
            self.text.clone()
        }
        fn find_elements(&mut self, _: &str) -> Result<Vec<ElementHandle>, SessionError> {
            Ok(Vec::new())
        }
        fn element_attribute(&self, _: ElementHandle, _: &str) -> Result<Option<String>, SessionError> {
            Ok(None)
        }
        fn close(&mut self) {}
    }

    fn detector() -> BlockDetector {
        BlockDetector::new(
            ["verify", "captcha"],
            ["zostałeś zablokowany", "automatyczne zapytania"],
        )
    }

    #[test]
    fn test_clear_page() {
        let page = StaticPage::new("https://allegro.pl/uzytkownik/shopA", "Oceny sprzedającego");
        assert_eq!(detector().inspect(&page).unwrap(), PageState::Clear);
        assert!(!detector().is_blocked(&page));
    }

    #[test]
    fn test_url_marker() {
        let page = StaticPage::new("https://allegro.pl/captcha?redirect=x", "");
        assert_eq!(
            detector().inspect(&page).unwrap(),
            PageState::Blocked(BlockReason::UrlMarker("captcha".to_string()))
        );
    }

    #[test]
    fn test_text_marker_is_case_insensitive() {
        let page = StaticPage::new("https://allegro.pl/", "Zostałeś zablokowany. Spróbuj później.");
        assert!(detector().is_blocked(&page));
        let page = StaticPage::new("https://allegro.pl/", "Wykryliśmy AUTOMATYCZNE ZAPYTANIA");
        assert!(detector().is_blocked(&page));
    }

    #[test]
    fn test_unreadable_url_is_blocked() {
        let page = StaticPage {
            url: Err(SessionError::Closed),
            text: Ok(String::new()),
        };
        assert!(detector().inspect(&page).is_err());
        assert!(detector().is_blocked(&page));
    }

    #[test]
    fn test_unreadable_text_is_blocked() {
        let page = StaticPage {
            url: Ok("https://allegro.pl/".to_string()),
            text: Err(SessionError::Read("target crashed".to_string())),
        };
        assert!(detector().is_blocked(&page));
    }

    #[test]
    fn test_blank_markers_ignored() {
        let detector = BlockDetector::new(["", "  "], Vec::<String>::new());
        let page = StaticPage::new("https://allegro.pl/", "anything");
        assert!(!detector.is_blocked(&page));
    }
}
