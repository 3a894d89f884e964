//! Browser automation seam
//!
//! Workers drive pages only through [`AutomationSession`], so the crawl logic
//! can run against Chrome in production and against scripted sessions in tests.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Failed to start browser session: {0}")]
    Launch(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Element query '{selector}' failed: {message}")]
    Query { selector: String, message: String },

    #[error("Failed to read page: {0}")]
    Read(String),

    #[error("Session is closed")]
    Closed,
}

/// Opaque reference to an element found by the last query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElementHandle(usize);

impl ElementHandle {
    pub fn new(index: usize) -> Self {
        Self(index)
    }

    pub fn index(&self) -> usize {
        self.0
    }
}

/// One live, stateful browser instance owned by exactly one worker
pub trait AutomationSession: Send {
    /// Load `url` and wait for the document to finish loading
    fn navigate(&mut self, url: &str) -> Result<(), SessionError>;

    fn current_url(&self) -> Result<String, SessionError>;

    /// Visible text of the rendered page
    fn rendered_text(&self) -> Result<String, SessionError>;

    /// Elements matching the CSS `selector` in the current page. Handles are
    /// valid until the next query or navigation.
    fn find_elements(&mut self, selector: &str) -> Result<Vec<ElementHandle>, SessionError>;

    fn element_attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError>;

    /// Release the session. Never fails; cleanup problems are logged.
    fn close(&mut self);
}

/// Creates sessions for workers
pub trait SessionFactory: Send + Sync {
    fn create(&self, worker_id: usize) -> Result<Box<dyn AutomationSession>, SessionError>;
}
