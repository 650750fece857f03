//! Managed/bundle-mode collaborators: secure connect bundle reading (C2)
//! and Astra-style metadata retrieval (C4).

pub mod bundle;
pub mod metadata;

pub use bundle::{read_bundle, ScbContents, ScbLimits};
pub use metadata::{AstraMetadata, AstraMetadataClient, MetadataClient};
