pub mod agents;
pub mod alerts;
pub mod audit;
pub mod auth;
pub mod documents;
pub mod error;
pub mod messages;
pub mod prompt;
pub mod redact;
pub mod security;
