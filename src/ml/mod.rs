pub mod augmentation;
pub mod ml_model;
pub mod training;
pub mod inference;

pub use augmentation::{augment_image, AugmentParams};
pub use ml_model::{TransferClassifier, ModelConfig, BackboneConfig, load_and_normalize_image, load_rgb_image, normalize_image};
pub use training::{train_model, train_with_backend, load_split_datasets, select_device, ImageBatcher, ImageBatch, TrainingReport};
pub use inference::{InferenceEngine, ClassProbabilities};
