//! Connection statistics
//!
//! [`RawStatsReport`] is what a handle returns from a poll; [`StatsAggregator`]
//! reduces it into [`AggregatedStats`] and keeps the previous output so byte
//! counters can be turned into bitrates.

pub mod aggregator;
pub mod report;

pub use aggregator::{
    AggregatedStats, CandidatePairStats, CandidateStats, CodecStats, DataChannelStats,
    InboundAudioStats, InboundVideoStats, OutboundAudioStats, StatsAggregator,
};
pub use report::{
    CandidatePairRecord, CandidateRecord, CodecRecord, DataChannelRecord, InboundRtpRecord,
    MediaKind, OutboundRtpRecord, RawStatsReport, RemoteInboundRtpRecord, StatsRecord,
    TransportRecord,
};
