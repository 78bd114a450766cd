//! A streaming chat relay: an actix-web server that forwards conversations to
//! an OpenAI-compatible model and streams the reply back as Server-Sent
//! Events, plus a client-side session controller that consumes that stream.

pub mod client;
pub mod config;
pub mod error;
pub mod model;
pub mod sse;
pub mod web;
