//! Trading config templates
//!
//! Bots get their own config composed from a shared template plus a handful of
//! per-bot overrides, or generated from a few settings when there is no
//! template. Templates are never modified in place.

pub mod composer;
pub mod custom;
pub mod pairlist;

pub use composer::{ConfigArtifact, ConfigOverrides, ConfigTemplate, TemplateComposer};
pub use custom::{CustomSettings, FreqaiSettings};
pub use pairlist::Pairlist;
