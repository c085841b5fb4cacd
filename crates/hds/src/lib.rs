//! HTTP Dynamic Streaming (HDS) fragment adapter.
//!
//! Consumes an F4M manifest and produces a continuous byte stream of
//! FLV-wrapped media: manifest/bootstrap parsing, fragment URL
//! construction, concurrent fragment downloads, and `mdat` payload
//! extraction, all hidden behind [`stream::HdsStream`]'s `read`/`peek`/
//! `control` surface.

pub mod box_parser;
pub mod chunk;
pub mod config;
pub mod detect;
pub mod downloader;
pub mod error;
pub mod fetch;
pub mod flv_header;
pub mod fragment_index;
pub mod live_poller;
pub mod manifest;
pub mod reader;
pub mod stream;

pub use config::HdsConfig;
pub use error::HdsError;
pub use fetch::FragmentFetcher;
pub use reader::{ControlQuery, ControlResponse};
pub use stream::HdsStream;
