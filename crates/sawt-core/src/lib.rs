pub mod app_config;
pub mod card;
pub mod config;
pub mod ports;
pub mod preview;

pub use app_config::{AppConfig, ClientConfig, Environment};
pub use card::{
    AnswerFragment, AnswerRequest, BiasReport, Card, CardChange, CardError, CardId, CardStatus,
    CardType, Citation, NewCard, BIAS_CATEGORIES, MAX_TITLE_CHARS,
};
pub use config::{
    load_app_config, load_app_config_from_env, load_client_config, load_client_config_from_env,
};
pub use ports::{
    AnswerService, BackendError, CardApi, CardSource, CardStore, ChangeFeed, Subscription,
};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("invalid value for {var}: {reason}")]
    InvalidEnvVar { var: String, reason: String },
}
