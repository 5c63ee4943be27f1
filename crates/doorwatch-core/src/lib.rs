//! Face descriptor extraction and identity matching.
//!
//! Computes fixed-length descriptors from grayscale face crops and
//! resolves them against an enrollment registry via flat
//! nearest-neighbor search. Locating faces inside raw camera frames is
//! an upstream detector concern, not part of this crate.

pub mod extractor;
pub mod matcher;
pub mod types;

pub use extractor::FeatureExtractor;
pub use matcher::{IdentityMatcher, MatcherConfig, MatcherStats};
pub use types::{
    AccessEvent, AccessOutcome, AccessType, FaceCrop, FeatureVector, IdentityRecord,
    RecognitionResult, DESCRIPTOR_DIM, UNKNOWN_PERSON,
};
