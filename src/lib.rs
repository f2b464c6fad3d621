pub mod charts;
pub mod config;
pub mod dataset;
pub mod demo;
pub mod error;
pub mod explain;
pub mod features;
pub mod model;
pub mod narration;
pub mod pages;
pub mod precompute;
pub mod report;
pub mod server;
pub mod vector_ops;
