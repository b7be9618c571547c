#![warn(clippy::all, rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod map;

pub use config::{HeightMapConfig, ReplicationConfig, RowChunking};
pub use error::{HeightMapError, HeightMapResult};
pub use map::{MapSource, ReadMap, Rect};
