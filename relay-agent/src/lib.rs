//! Relay Agent - generative-content providers.
//!
//! A provider turns a role-tagged conversation into generated text, and
//! optionally a prompt into images.

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod gemini;
pub mod provider;

pub use gemini::GeminiProvider;
pub use provider::{GeneratedImage, Provider, ProviderError};
