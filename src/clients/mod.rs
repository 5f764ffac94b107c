pub mod metadata_client;

pub use metadata_client::{HttpMetadataSource, MetadataSource};
