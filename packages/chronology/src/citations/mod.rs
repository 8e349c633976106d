//! Page attribution for extracted entries.
//!
//! - [`header`] - printed exhibit/Bates/transcript markers on a page
//! - [`resolver`] - absolute page → exhibit from declared ranges
//! - [`matcher`] - search scoring when only page text is available

pub mod header;
pub mod matcher;
pub mod resolver;

pub use header::{Detection, DetectionMethod, HeaderDetector};
pub use matcher::{CitationMatcher, MatchMethod, MatchResult};
pub use resolver::{CitationResolver, ResolvedPage};
