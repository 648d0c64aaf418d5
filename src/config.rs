use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

/// Ordered fallback cascade of candidate models, tried first to last.
const DEFAULT_MODELS: &[&str] = &[
    "llama-3.3-70b-versatile",
    "llama-3.1-8b-instant",
    "meta-llama/llama-4-maverick-17b-128e-instruct",
    "meta-llama/llama-4-scout-17b-16e-instruct",
];

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub groq_api_key: String,
    pub groq_models: Vec<String>,
    pub max_questions: usize,
    pub max_concurrent_generations: usize,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let groq_api_key = get_env("GROQ_API_KEY")?;
        if groq_api_key.is_empty() || groq_api_key == "your_groq_api_key_here" {
            return Err(Error::Config(
                "GROQ_API_KEY not set or left at placeholder value".to_string(),
            ));
        }

        let groq_models = match env::var("GROQ_MODELS") {
            Ok(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|m| !m.is_empty())
                .map(str::to_string)
                .collect(),
            Err(_) => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        };

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            groq_api_key,
            groq_models,
            max_questions: get_env_parse_or("MAX_QUESTIONS", 50)?,
            max_concurrent_generations: get_env_parse_or("MAX_CONCURRENT_GENERATIONS", 4)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> &'static Config {
    CONFIG
        .get()
        .expect("Configuration has not been initialized")
}
