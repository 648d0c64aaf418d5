pub mod config;
pub mod database;
pub mod dto;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

use crate::services::{
    exam_store::ExamStore,
    generation_service::{GenerationService, GenerationTuning},
    llm_service::GroqClient,
};
use reqwest::Client;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub generation_service: GenerationService,
    pub exam_store: ExamStore,
}

impl AppState {
    pub fn new(pool: PgPool) -> Self {
        let config = crate::config::get_config();
        let http_client = Client::builder()
            .timeout(std::time::Duration::from_secs(120))
            .build()
            .unwrap();

        let llm = Arc::new(GroqClient::new(config.groq_api_key.clone(), http_client));
        let generation_service = GenerationService::new(
            llm,
            config.groq_models.clone(),
            GenerationTuning::default(),
        );
        let exam_store = ExamStore::new(pool.clone());

        Self {
            pool,
            generation_service,
            exam_store,
        }
    }
}
