//! Detection, proposal, merge and learning services
//!
//! Detection runs Normalizer → CandidateBlocker → signal extraction →
//! Classifier → clustering, then hands drafts to the ProposalManager.
//! Approved proposals flow into the MergeExecutor; resolutions feed the
//! LearningLoop.

pub mod candidate_blocker;
pub mod classifier;
pub mod clustering;
pub mod learning_loop;
pub mod merge_executor;
pub mod normalizer;
pub mod proposal_manager;
pub mod signal_extractor;

pub use candidate_blocker::{Block, CandidateBlocker};
pub use classifier::{Classification, Classifier, ClassifierFloors};
pub use clustering::{build_clusters, Cluster, Edge};
pub use learning_loop::{LearningLoop, ThresholdAdjustment};
pub use merge_executor::{MergeExecutor, MergeRequest};
pub use normalizer::{MalformedBrand, NormalizedBrand};
pub use proposal_manager::{proposal_id, ProposalChange, ProposalDraft, ProposalManager};
