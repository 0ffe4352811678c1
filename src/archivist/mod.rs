pub mod audit;
pub mod chunker;
pub mod config;
pub mod manifest;
pub mod paths;
pub mod pipeline;
pub mod remote;
pub mod schedule;
pub mod snapshot;
pub mod source;
pub mod summarizer;
pub mod util;
pub mod watcher;
