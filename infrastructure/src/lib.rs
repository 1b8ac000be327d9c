pub mod audio_loader;
pub mod config;
pub mod feature_extractor;
pub mod mfcc;
pub mod mistral_client;
pub mod resilient_client;
pub mod retry;
