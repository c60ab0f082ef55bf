pub mod chat;
pub mod engagement;
pub mod moderation;
pub mod post;
pub mod realtime;
pub mod user;
