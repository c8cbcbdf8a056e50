pub mod affinity;
pub mod buckets;
pub mod catalogue;
pub mod pair_selector;
pub mod providers;
pub mod recommendations;
pub mod session_engine;

pub use affinity::GenreAffinityRecommender;
pub use catalogue::{CatalogueCache, CatalogueSettings};
pub use pair_selector::PairSelector;
pub use recommendations::{RecommendationService, Recommender};
pub use session_engine::{SessionEngine, SessionSettings};
