//! Core of the aforo pipeline: detections in, 15-minute movement counts out.
//!
//! The stages, in dataset order: detection normalization ([`normalize`]),
//! frame-sequential box tracking ([`tracking_core`]), access classification
//! and trajectory segmentation ([`access`], [`segment`]), RILSA mapping
//! ([`rilsa`]), quality filtering ([`quality`]), manual-correction overlay
//! ([`corrections`]) and interval aggregation ([`aggregate`]). The
//! [`pipeline`] module wires them together over a [`repository::Repository`].

pub mod access;
pub mod aggregate;
pub mod bundler;
pub mod corrections;
pub mod error;
pub mod geom;
pub mod normalize;
pub mod pipeline;
pub mod quality;
pub mod queries;
pub mod repository;
pub mod rilsa;
pub mod segment;
pub mod tracking_core;

pub use error::{Error, Result};
pub use pipeline::{Pipeline, RunSummary};
pub use repository::{MemoryRepository, Repository};
