//! In-memory marketplace and automation sessions for driving workers in tests

use std::cell::Cell;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use allegro_enricher::session::{
    AutomationSession, ElementHandle, SessionError, SessionFactory,
};

pub const SITE: &str = "https://allegro.pl";
const PROFILE_PREFIX: &str = "https://allegro.pl/uzytkownik/";
const OFFER_PREFIX: &str = "https://allegro.pl/oferta/";
const BLOCK_URL: &str = "https://allegro.pl/verify?challenge=1";
const LOCKOUT: &str = "Zostałeś zablokowany. Wykryliśmy automatyczne zapytania.";

/// How the scripted site answers for one seller
#[derive(Debug, Clone)]
pub enum SellerScript {
    /// Profile lists `offers` offer links; the offer page shows `text`
    Normal { text: String, offers: usize },
    /// Profile has no offer links and no block markers
    NoOffers,
    /// Every profile visit lands on the verification page
    AlwaysBlocked,
    /// The first `n` profile visits are blocked, later ones behave like `Normal`
    BlockedTimes { n: usize, text: String, offers: usize },
    /// Navigating to the profile fails outright
    NavigationFails,
    /// Profile page renders the lockout message instead of offers
    LockoutText,
    /// Profile lists offers, but every offer page redirects to verification
    OfferPageBlocked { offers: usize },
    /// Profile shows no offers; its text turns into the lockout message only
    /// from the second read on
    LateLockout,
}

#[derive(Debug, Clone, Default)]
struct Page {
    url: String,
    text: String,
    /// Replaces `text` from the second read of the page on
    late_text: Option<String>,
    links: Vec<String>,
}

#[derive(Default)]
pub struct ScriptedSite {
    scripts: Mutex<HashMap<String, SellerScript>>,
    profile_visits: Mutex<HashMap<String, usize>>,
    offer_visits: Mutex<HashMap<String, usize>>,
    pub sessions_created: AtomicUsize,
    pub sessions_closed: AtomicUsize,
}

impl ScriptedSite {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn seller(&self, login: &str, script: SellerScript) -> &Self {
        self.scripts.lock().unwrap().insert(login.to_string(), script);
        self
    }

    pub fn profile_visits(&self, login: &str) -> usize {
        self.profile_visits.lock().unwrap().get(login).copied().unwrap_or(0)
    }

    pub fn offer_visits(&self, login: &str) -> usize {
        self.offer_visits.lock().unwrap().get(login).copied().unwrap_or(0)
    }

    pub fn created(&self) -> usize {
        self.sessions_created.load(Ordering::SeqCst)
    }

    pub fn closed(&self) -> usize {
        self.sessions_closed.load(Ordering::SeqCst)
    }

    fn script(&self, login: &str) -> SellerScript {
        self.scripts
            .lock()
            .unwrap()
            .get(login)
            .cloned()
            .unwrap_or(SellerScript::NoOffers)
    }

    fn profile(&self, url: &str, login: &str) -> Result<Page, SessionError> {
        let visit = {
            let mut visits = self.profile_visits.lock().unwrap();
            let count = visits.entry(login.to_string()).or_insert(0);
            *count += 1;
            *count
        };

        let blocked = Page {
            url: BLOCK_URL.to_string(),
            ..Default::default()
        };
        let page = match self.script(login) {
            SellerScript::Normal { offers, .. } => listing(url, login, offers),
            SellerScript::NoOffers => Page {
                url: url.to_string(),
                text: format!("{} nie ma aktywnych ofert", login),
                ..Default::default()
            },
            SellerScript::AlwaysBlocked => blocked,
            SellerScript::BlockedTimes { n, offers, .. } => {
                if visit <= n {
                    blocked
                } else {
                    listing(url, login, offers)
                }
            }
            SellerScript::NavigationFails => {
                return Err(SessionError::Navigation {
                    url: url.to_string(),
                    message: "net::ERR_CONNECTION_RESET".to_string(),
                })
            }
            SellerScript::LockoutText => Page {
                url: url.to_string(),
                text: LOCKOUT.to_string(),
                ..Default::default()
            },
            SellerScript::OfferPageBlocked { offers } => listing(url, login, offers),
            SellerScript::LateLockout => Page {
                url: url.to_string(),
                text: format!("{} nie ma aktywnych ofert", login),
                late_text: Some(LOCKOUT.to_string()),
                links: Vec::new(),
            },
        };
        Ok(page)
    }

    fn offer(&self, url: &str, login: &str) -> Page {
        *self
            .offer_visits
            .lock()
            .unwrap()
            .entry(login.to_string())
            .or_insert(0) += 1;

        match self.script(login) {
            SellerScript::Normal { text, offers } | SellerScript::BlockedTimes { text, offers, .. } => {
                let mut page = listing(url, login, offers);
                page.text = text;
                page
            }
            SellerScript::OfferPageBlocked { .. } => Page {
                url: BLOCK_URL.to_string(),
                ..Default::default()
            },
            _ => Page {
                url: url.to_string(),
                ..Default::default()
            },
        }
    }
}

fn listing(url: &str, login: &str, offers: usize) -> Page {
    Page {
        url: url.to_string(),
        text: format!("Profil sprzedającego {}", login),
        late_text: None,
        links: (0..offers).map(|i| format!("/oferta/{}/item-{}", login, i)).collect(),
    }
}

pub struct ScriptedSession {
    site: Arc<ScriptedSite>,
    page: Option<Page>,
    closed: bool,
    queried: Vec<String>,
    /// Text reads since the last navigation
    text_reads: Cell<usize>,
}

impl ScriptedSession {
    fn alive(&self) -> Result<&Page, SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.page
            .as_ref()
            .ok_or_else(|| SessionError::Read("no page loaded".to_string()))
    }
}

impl AutomationSession for ScriptedSession {
    fn navigate(&mut self, url: &str) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.queried.clear();
        self.text_reads.set(0);
        let page = if let Some(login) = url.strip_prefix(PROFILE_PREFIX) {
            self.site.profile(url, login)?
        } else if let Some(rest) = url.strip_prefix(OFFER_PREFIX) {
            let login = rest.split('/').next().unwrap_or_default();
            self.site.offer(url, login)
        } else {
            Page {
                url: url.to_string(),
                ..Default::default()
            }
        };
        self.page = Some(page);
        Ok(())
    }

    fn current_url(&self) -> Result<String, SessionError> {
        Ok(self.alive()?.url.clone())
    }

    fn rendered_text(&self) -> Result<String, SessionError> {
        let page = self.alive()?;
        let reads = self.text_reads.get();
        self.text_reads.set(reads + 1);
        match &page.late_text {
            Some(late) if reads > 0 => Ok(late.clone()),
            _ => Ok(page.text.clone()),
        }
    }

    fn find_elements(&mut self, _selector: &str) -> Result<Vec<ElementHandle>, SessionError> {
        let links = self.alive()?.links.clone();
        self.queried = links;
        Ok((0..self.queried.len()).map(ElementHandle::new).collect())
    }

    fn element_attribute(
        &self,
        element: ElementHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        if name != "href" {
            return Ok(None);
        }
        Ok(self.queried.get(element.index()).cloned())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.site.sessions_closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Factory over a scripted site, with optional creation failures
pub struct ScriptedFactory {
    site: Arc<ScriptedSite>,
    failing_workers: HashSet<usize>,
    /// Creations allowed in total before every further one fails
    budget: Option<usize>,
    attempts: AtomicUsize,
}

impl ScriptedFactory {
    pub fn new(site: Arc<ScriptedSite>) -> Self {
        Self {
            site,
            failing_workers: HashSet::new(),
            budget: None,
            attempts: AtomicUsize::new(0),
        }
    }

    pub fn failing_for(mut self, worker_id: usize) -> Self {
        self.failing_workers.insert(worker_id);
        self
    }

    pub fn with_budget(mut self, sessions: usize) -> Self {
        self.budget = Some(sessions);
        self
    }
}

impl SessionFactory for ScriptedFactory {
    fn create(&self, worker_id: usize) -> Result<Box<dyn AutomationSession>, SessionError> {
        if self.failing_workers.contains(&worker_id) {
            return Err(SessionError::Launch(format!("no browser for worker {}", worker_id)));
        }
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.budget.is_some_and(|budget| attempt >= budget) {
            return Err(SessionError::Launch("browser binary disappeared".to_string()));
        }
        self.site.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            site: Arc::clone(&self.site),
            page: None,
            closed: false,
            queried: Vec::new(),
            text_reads: Cell::new(0),
        }))
    }
}
