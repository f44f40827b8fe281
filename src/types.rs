pub use crate::utils::database;
use crate::{
    modules::autocomplete::{
        repository::{Dataset, MemoryDataset, PgDataset},
        widget::WidgetRegistry,
    },
    utils::{
        cache::{MemoryCache, WidgetCache},
        signing::{Signer, DEFAULT_SALT},
    },
};
use async_trait::async_trait;
use std::env;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone)]
pub struct AppContext {
    pub host: String,
    pub port: u32,
}

#[derive(Clone)]
pub struct AutocompleteContext {
    pub cache_prefix: String,
    pub cache_ttl: Duration,
    pub token_max_age: Option<Duration>,
    pub internal_key: Option<String>,
}

impl Default for AutocompleteContext {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            cache_ttl: Duration::from_secs(DEFAULT_CACHE_TTL),
            token_max_age: None,
            internal_key: None,
        }
    }
}

#[derive(Clone)]
pub struct Context {
    pub app: AppContext,
    pub autocomplete: AutocompleteContext,
    pub signer: Signer,
    pub cache: Arc<dyn WidgetCache>,
    pub memory_cache: Option<Arc<MemoryCache>>,
    pub dataset: Arc<dyn Dataset>,
    pub widgets: WidgetRegistry,
}

pub const DEFAULT_CACHE_PREFIX: &str = "autocomplete_";
pub const DEFAULT_CACHE_TTL: u64 = 300;

#[derive(Clone)]
pub struct DatabaseConfig {
    pub url: Option<String>,
}

#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u32,
}

#[derive(Clone)]
pub struct AutocompleteConfig {
    pub secret_key: String,
    pub cache_prefix: String,
    pub cache_ttl: u64,
    pub token_max_age: Option<u64>,
    pub internal_key: Option<String>,
}

#[derive(Clone)]
pub struct Config {
    pub database: DatabaseConfig,
    pub app: AppConfig,
    pub autocomplete: AutocompleteConfig,
}

impl Default for Config {
    fn default() -> Self {
        let database_url = env::var("DATABASE_URL").ok();
        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("PORT")
            .unwrap_or_else(|_| "8000".to_string())
            .parse::<u32>()
            .expect("Invalid PORT number");
        let secret_key = env::var("SECRET_KEY").expect("SECRET_KEY not set");
        let cache_prefix = env::var("AUTOCOMPLETE_CACHE_PREFIX")
            .unwrap_or_else(|_| DEFAULT_CACHE_PREFIX.to_string());
        let cache_ttl = env::var("AUTOCOMPLETE_CACHE_TTL")
            .map(|ttl| ttl.parse::<u64>().expect("Invalid AUTOCOMPLETE_CACHE_TTL"))
            .unwrap_or(DEFAULT_CACHE_TTL);
        let token_max_age = env::var("AUTOCOMPLETE_TOKEN_MAX_AGE").ok().map(|max_age| {
            max_age
                .parse::<u64>()
                .expect("Invalid AUTOCOMPLETE_TOKEN_MAX_AGE")
        });
        let internal_key = env::var("AUTOCOMPLETE_INTERNAL_KEY").ok();

        Self {
            database: DatabaseConfig { url: database_url },
            app: AppConfig {
                host,
                port,
            },
            autocomplete: AutocompleteConfig {
                secret_key,
                cache_prefix,
                cache_ttl,
                token_max_age,
                internal_key,
            },
        }
    }
}

#[async_trait]
pub trait ToContext {
    async fn to_context(self) -> Context;
}

#[async_trait]
impl ToContext for Config {
    async fn to_context(self) -> Context {
        let dataset: Arc<dyn Dataset> = match self.database.url.as_deref() {
            Some(url) => Arc::new(PgDataset::new(database::connect(url).await.pool)),
            None => {
                tracing::warn!("DATABASE_URL not set, serving from an empty in-memory dataset");
                Arc::new(MemoryDataset::new())
            }
        };

        if self.autocomplete.internal_key.is_none() {
            tracing::warn!("AUTOCOMPLETE_INTERNAL_KEY not set, widget registration is disabled");
        }

        let memory_cache = Arc::new(MemoryCache::new());

        Context {
            app: AppContext {
                host: self.app.host,
                port: self.app.port,
            },
            autocomplete: AutocompleteContext {
                cache_prefix: self.autocomplete.cache_prefix,
                cache_ttl: Duration::from_secs(self.autocomplete.cache_ttl),
                token_max_age: self.autocomplete.token_max_age.map(Duration::from_secs),
                internal_key: self.autocomplete.internal_key,
            },
            signer: Signer::new(&self.autocomplete.secret_key, DEFAULT_SALT),
            cache: memory_cache.clone(),
            memory_cache: Some(memory_cache),
            dataset,
            widgets: WidgetRegistry::default(),
        }
    }
}
