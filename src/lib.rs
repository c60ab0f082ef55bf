pub mod app;
pub mod config;
pub mod domain;
pub mod http;
pub mod infra;
pub mod jobs;

use crate::config::FeedSettings;
use crate::infra::{cache::RedisCache, db::Db, realtime::RealtimeHub};

#[derive(Clone)]
pub struct AppState {
    pub db: Db,
    pub cache: RedisCache,
    pub realtime: RealtimeHub,
    pub admin_token: Option<String>,
    pub paseto_access_key: [u8; 32],
    pub access_ttl_minutes: u64,
    pub feed: FeedSettings,
}
