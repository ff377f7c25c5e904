pub mod adjacency;
pub mod algorithms;
pub mod config;
pub mod engine;
pub mod event;
pub mod fib;
pub mod hello;
pub mod lsa;
pub mod lsdb;
pub mod name_map;
pub mod name_prefix_table;
pub mod routing_table;
pub mod sequencing;
pub mod sync;

/// Hierarchical router identity, e.g. "/net/campus/routers/alpha".
pub type RouterName = String;
