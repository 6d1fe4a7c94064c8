pub mod grouper;
pub mod normalize;

pub use grouper::{
    CandidatePack, ClassifiedFile, DocumentMeta, GroupingOutcome, IdentityKey, MergedIdentity,
    PackGrouper, UnmatchedFile, UnmatchedReason,
};
pub use normalize::{normalize_email, normalize_name, normalize_phone};
