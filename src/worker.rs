//! Session worker: drives one browser session through the crawl sequence.
//!
//! Per item: open the seller profile, find the first offer, open its seller
//! information anchor, extract, score, and write. A block at any stage closes
//! the session, replaces it after a cooldown and retries the item, up to
//! `max_retries` replacements. Any other failure abandons the item at once.

use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};
use url::Url;

use crate::block::BlockDetector;
use crate::config::TargetConfig;
use crate::extract::{extract_company, extract_reputation};
use crate::output::{OutputSink, SinkError};
use crate::pacing::Pacing;
use crate::report::{ItemOutcome, ItemReport, RunReporter};
use crate::scoring;
use crate::seller::{EnrichedRecord, ScoreResult, WorkItem};
use crate::session::{AutomationSession, SessionError, SessionFactory};
use crate::supervisor::ShutdownFlag;
use crate::task_source::WorkQueue;

/// Where in the sequence a block was detected
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Profile,
    OfferDiscovery,
    SellerInfo,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Profile => "profile page",
            Stage::OfferDiscovery => "offer discovery",
            Stage::SellerInfo => "seller information",
        };
        f.write_str(s)
    }
}

#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("Blocked at {stage}")]
    Blocked { stage: Stage },

    #[error("Navigation failed: {0}")]
    Navigation(#[source] SessionError),

    #[error("Element lookup failed: {0}")]
    Element(#[source] SessionError),

    #[error("First offer link has no href")]
    MissingOfferLink,

    #[error("Offer link '{href}' is not a valid URL: {message}")]
    InvalidOfferUrl { href: String, message: String },

    #[error("Failed to read page text: {0}")]
    Read(#[source] SessionError),

    #[error("Failed to write record: {0}")]
    Commit(#[source] SinkError),
}

/// Fixed per-run settings shared by all workers
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub target: TargetConfig,
    pub pacing: Pacing,
    pub restart_after: u32,
    pub max_retries: u32,
}

/// Shared handles injected into every worker. The queue and the sink are the
/// only state mutated by more than one worker.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<WorkQueue>,
    pub sink: Arc<OutputSink>,
    pub detector: Arc<BlockDetector>,
    pub factory: Arc<dyn SessionFactory>,
    pub reporter: Arc<RunReporter>,
    pub shutdown: ShutdownFlag,
    pub settings: Arc<WorkerSettings>,
}

/// Why a worker stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkerExit {
    /// Queue empty
    Drained,
    /// Shutdown requested before the queue was empty
    Stopped,
    /// Could not create the first session
    StartupFailed(SessionError),
    /// Could not create a replacement session mid-run
    SessionLost(SessionError),
    /// The worker thread panicked
    Panicked(String),
}

/// Successful end of a single attempt
enum Attempt {
    Written(ScoreResult),
    NoOffers,
}

pub struct SessionWorker {
    id: usize,
    ctx: WorkerContext,
    /// `None` once a replacement could not be created
    session: Option<Box<dyn AutomationSession>>,
    /// Items written since the session was created
    processed: u32,
}

impl SessionWorker {
    /// Create the worker and its first session
    pub fn start(id: usize, ctx: WorkerContext) -> Result<Self, SessionError> {
        let session = ctx.factory.create(id)?;
        Ok(Self {
            id,
            ctx,
            session: Some(session),
            processed: 0,
        })
    }

    /// Pull items until the queue is empty, shutdown is requested, or the
    /// session cannot be replaced.
    pub fn run(mut self) -> WorkerExit {
        let _span = info_span!("worker", worker = self.id).entered();
        info!("Worker started");

        let exit = loop {
            if self.ctx.shutdown.is_requested() {
                break WorkerExit::Stopped;
            }
            let Some(item) = self.ctx.queue.pop() else {
                break WorkerExit::Drained;
            };

            let started = Instant::now();
            let (outcome, attempts) = self.process(&item);
            self.ctx.reporter.record(ItemReport::new(
                item.login(),
                self.id,
                outcome,
                attempts,
                started.elapsed(),
            ));

            if let Err(e) = self.housekeeping_check() {
                error!("Worker stopping: {}", e);
                break WorkerExit::SessionLost(e);
            }
        };

        self.retire_session();
        info!("Worker finished: {:?}", exit);
        exit
    }

    /// Run the retry loop for one item. Returns the outcome and the number of
    /// attempts made.
    pub fn process(&mut self, item: &WorkItem) -> (ItemOutcome, u32) {
        let _span = info_span!("item", login = %item.login()).entered();
        let max_retries = self.ctx.settings.max_retries;
        let mut retries = 0u32;
        let mut attempts = 0u32;

        while retries < max_retries {
            attempts += 1;
            match self.attempt(item) {
                Ok(Attempt::Written(score)) => {
                    info!("Written: score {} segment {}", score.score, score.segment);
                    self.processed += 1;
                    return (
                        ItemOutcome::Written {
                            score: score.score,
                            segment: score.segment,
                        },
                        attempts,
                    );
                }
                Ok(Attempt::NoOffers) => {
                    info!("No offers found");
                    return (ItemOutcome::NoOffers, attempts);
                }
                Err(CrawlError::Blocked { stage }) => {
                    retries += 1;
                    self.ctx.reporter.record_block();
                    warn!("Blocked at {} (retry {}/{})", stage, retries, max_retries);
                    if let Err(e) = self.replace_session() {
                        return (
                            ItemOutcome::Abandoned {
                                reason: format!("session replacement failed: {}", e),
                            },
                            attempts,
                        );
                    }
                }
                Err(e) => {
                    warn!("Abandoned: {}", e);
                    return (ItemOutcome::Abandoned { reason: e.to_string() }, attempts);
                }
            }
        }

        warn!("Abandoned after {} blocked attempts", retries);
        (ItemOutcome::RetriesExhausted { attempts: retries }, attempts)
    }

    /// Steps 1 to 7 of the crawl sequence on the current session
    fn attempt(&mut self, item: &WorkItem) -> Result<Attempt, CrawlError> {
        let settings = &self.ctx.settings;
        let detector = &self.ctx.detector;
        let session = self
            .session
            .as_deref_mut()
            .ok_or(CrawlError::Navigation(SessionError::Closed))?;

        let profile_url = settings.target.profile_url_for(item.login());
        debug!("Opening profile {}", profile_url);
        session.navigate(&profile_url).map_err(CrawlError::Navigation)?;
        settings.pacing.settle();

        if detector.is_blocked(session) {
            return Err(CrawlError::Blocked { stage: Stage::Profile });
        }

        let selector = settings.target.offer_link_selector.as_str();
        let links = session
            .find_elements(selector)
            .map_err(CrawlError::Element)?;
        let Some(first) = links.first().copied() else {
            // an empty page can itself be a block
            if detector.is_blocked(session) {
                return Err(CrawlError::Blocked { stage: Stage::OfferDiscovery });
            }
            return Ok(Attempt::NoOffers);
        };
        debug!("Found {} offer links on profile", links.len());

        let href = session
            .element_attribute(first, "href")
            .map_err(CrawlError::Element)?
            .filter(|h| !h.trim().is_empty())
            .ok_or(CrawlError::MissingOfferLink)?;
        let base = session.current_url().map_err(CrawlError::Read)?;
        let offer_url = seller_info_url(&base, &href, &settings.target.seller_anchor)?;

        debug!("Opening offer {}", offer_url);
        session.navigate(&offer_url).map_err(CrawlError::Navigation)?;
        settings.pacing.settle();

        if detector.is_blocked(session) {
            return Err(CrawlError::Blocked { stage: Stage::SellerInfo });
        }

        let text = session.rendered_text().map_err(CrawlError::Read)?;
        let offer_count = session
            .find_elements(selector)
            .map_err(CrawlError::Element)?
            .len();

        let company = extract_company(&text);
        let reputation = extract_reputation(&text, offer_count);
        let score = scoring::score(&company, &reputation);
        let record = EnrichedRecord::new(item.clone(), company, reputation, score);

        self.ctx.sink.write(&record).map_err(CrawlError::Commit)?;
        Ok(Attempt::Written(score))
    }

    /// Restart the session once it has written `restart_after` items
    fn housekeeping_check(&mut self) -> Result<(), SessionError> {
        if self.session.is_none() {
            return Err(SessionError::Closed);
        }
        if self.processed >= self.ctx.settings.restart_after {
            info!("Restarting session after {} items", self.processed);
            self.replace_session()?;
        }
        Ok(())
    }

    /// Close the current session, wait a cooldown, and create a new one.
    /// On failure the worker is left without a session.
    fn replace_session(&mut self) -> Result<(), SessionError> {
        self.retire_session();
        let waited = self.ctx.settings.pacing.cooldown();
        debug!("Cooldown {:?} before new session", waited);

        let session = self.ctx.factory.create(self.id).map_err(|e| {
            error!("Failed to create replacement session: {}", e);
            e
        })?;
        self.session = Some(session);
        self.processed = 0;
        self.ctx.reporter.record_restart();
        Ok(())
    }

    fn retire_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
    }
}

/// Resolve an offer href against the page it was found on and point it at
/// the seller information anchor.
pub fn seller_info_url(base: &str, href: &str, anchor: &str) -> Result<String, CrawlError> {
    let invalid = |message: String| CrawlError::InvalidOfferUrl {
        href: href.to_string(),
        message,
    };
    let mut url = match Url::parse(href) {
        Ok(url) => url,
        Err(url::ParseError::RelativeUrlWithoutBase) => Url::parse(base)
            .and_then(|b| b.join(href))
            .map_err(|e| invalid(e.to_string()))?,
        Err(e) => return Err(invalid(e.to_string())),
    };
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }

    let fragment = anchor.trim_start_matches('#');
    url.set_fragment((!fragment.is_empty()).then_some(fragment));
    Ok(url.into())
}
