pub mod exam_store;
pub mod generation_service;
pub mod llm_service;
