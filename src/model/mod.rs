pub mod model_metadata;
pub mod model_storage;
pub mod inference_config;
pub mod config;

pub use model_metadata::ModelMetadata;
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_binary, load_model_with_metadata, log_metadata_info};
pub use inference_config::InferenceConfig;
pub use config::{AppConfig, AugmentationConfig, AnalysisSettings, DataSettings, DeviceType, ModelSettings, TrainingSettings};
