//! Reference market data and the statistics derived from it.

mod corpus;
mod stats;

pub use corpus::{CorpusError, CorpusSource, MarketCorpus, MarketTrack};
pub use stats::{
    median, percentile, AggregationSettings, MarketProfile, MarketStatsAggregator,
    MarketStatsError,
};
