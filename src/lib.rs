//! Client-side feed aggregation for a meme-sharing app.
//!
//! The stores ([`feed::FeedStore`], [`comments::CommentStore`], [`session::SessionStore`])
//! read and write through the [`domain::Backend`] and [`domain::AuthBackend`] contracts,
//! implemented over HTTP by [`rest::RestBackend`] and in-process by [`memory::MemoryBackend`].
//! The binary exposes the stores to a browser front end through a small axum gateway.

pub mod comments;
pub mod config;
pub mod domain;
pub mod errors;
pub mod feed;
pub mod handlers;
pub mod http_client;
pub mod memory;
pub mod models;
pub mod notices;
pub mod rest;
pub mod routes;
pub mod session;
pub mod startup;
pub mod views;
