pub mod api;
pub mod client;
pub mod collect;
pub mod config;
pub mod mutate;
pub mod select;
