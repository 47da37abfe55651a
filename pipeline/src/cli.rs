use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[clap(name = "pipeline", version, about = "Depth feed → SMA signals → trader")]
pub struct Cli {
    #[clap(subcommand)]
    pub stage: Stage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
pub enum Stage {
    /// Ingest depth updates from the feed into the Update Store.
    Collector,
    /// Derive signals on a schedule and publish them to the Signal Log.
    Processor,
    /// Consume signals under a consumer group and dispatch actions.
    Trader,
    /// Every stage in one process.
    All,
}

impl Stage {
    pub fn runs_collector(self) -> bool {
        matches!(self, Stage::Collector | Stage::All)
    }

    pub fn runs_processor(self) -> bool {
        matches!(self, Stage::Processor | Stage::All)
    }

    pub fn runs_trader(self) -> bool {
        matches!(self, Stage::Trader | Stage::All)
    }
}
