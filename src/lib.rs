mod detection;
mod error;
mod feedback;
mod image_codec;
mod labels;
mod model_service;
mod ort_service;
mod render;
mod response;
mod routes;
mod server;
mod telemetry;

pub mod app;
pub mod config;

pub use app::start_app;
