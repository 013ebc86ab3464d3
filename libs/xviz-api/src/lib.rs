//! Shared types of the xviz decode core: records, binary blocks, the
//! transfer manifest, parser configuration and the decode error taxonomy.

pub mod block;
pub mod config;
pub mod error;
pub mod manifest;
pub mod metadata;
pub mod record;

pub use block::{Block, BlockId, ElementKind};
pub use config::{LegacyShape, ParserConfig, TextEncoding};
pub use error::{DecodeError, ErrorKind};
pub use manifest::{BlockRef, TransferManifest};
pub use metadata::{Layout, MetadataProvider, UiBuilder, UiNode, compose_metadata};
pub use record::{Envelope, PointCloud, PointCloudField, Record};
