//! # arpflow
//!
//! Presence time-series engine for link-layer addresses seen in periodic
//! packet captures.
//!
//! ```text
//! capture dir ──► CaptureSource (pcap) ──► Ingestor (bucket + forward fill)
//!                                              │
//!                                              ▼
//!                                     ObservationStore (mac.db)
//!                                              │
//!                     GapFiller ◄──────────────┤
//!                     Aggregator ──────────────┼──► CountStore (count.db)
//!                     RetentionManager ◄───────┘          │
//!                                                  CountGapFiller
//! ```
//!
//! One pipeline invocation is driven by [`pipeline::PipelineEngine::run_once`].

pub mod capture;
pub mod pipeline;
pub mod sqlite_pragma;
