pub mod app;
pub mod config;
pub mod dataset;
pub mod detector;
pub mod frame;
pub mod image;
pub mod mask;
pub mod my_types;
pub mod optical_flow;
pub mod pyramid;
pub mod region;
pub mod synthetic;
pub mod tracker;
