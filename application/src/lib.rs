pub mod analysis_service;
pub mod chat_service;
pub mod guardrail_service;
pub mod health_service;
pub mod prompt_builder;
