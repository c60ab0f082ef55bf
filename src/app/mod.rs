pub mod auth;
pub mod chat;
pub mod communities;
pub mod engagement;
pub mod feed;
pub mod feed_window;
pub mod moderation;
pub mod posts;
pub mod ranking;
pub mod realtime;
pub mod social;
pub mod suggestions;
pub mod users;
