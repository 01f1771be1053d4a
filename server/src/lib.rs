pub mod api;
pub mod auth;
pub mod chats;
pub mod config;
pub mod db;
pub mod error;
pub mod media;
pub mod model;
pub mod notify;
pub mod users;
