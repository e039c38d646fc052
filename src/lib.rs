pub mod cli;
pub mod config;
pub mod error;
pub mod linkify;
pub mod loader;
pub mod model;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod resolver;
pub mod rpc;
pub mod sandbox;
pub mod source;
pub mod util;
