// src/lib.rs

//! Lesson view tracking library
//!
//! Deduplicated view recording, the client-side view reporter, likes and
//! comments, and sitemap generation for the lessons site.

pub mod config;
pub mod error;
#[cfg(feature = "lambda")]
pub mod lambda;
pub mod models;
pub mod routes;
pub mod services;
pub mod storage;
pub mod utils;
