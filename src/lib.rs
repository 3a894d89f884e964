pub mod block;
pub mod browser;
pub mod cli;
pub mod config;
pub mod extract;
pub mod logger;
pub mod output;
pub mod pacing;
pub mod report;
pub mod scoring;
pub mod seller;
pub mod session;
pub mod supervisor;
pub mod task_source;
pub mod worker;

pub use block::BlockDetector;
pub use config::AppConfig;
pub use output::OutputSink;
pub use seller::{EnrichedRecord, WorkItem};
pub use session::{AutomationSession, SessionFactory};
pub use supervisor::{PoolSupervisor, ShutdownFlag};
pub use task_source::WorkQueue;
