pub mod prediction;
pub mod ranking;
pub mod metrics;

pub use prediction::{PredictionRecord, PredictionTable};
pub use ranking::{rank, least_confident, standard_queries, RankOrder, RankQuery, RankedImage, RankedImages, RankedSelection};
pub use metrics::ConfusionMatrix;
