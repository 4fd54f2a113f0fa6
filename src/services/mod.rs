pub mod catalog;
pub mod catalog_sync;
pub mod encoder;
pub mod memory_store;
pub mod object_store;
pub mod progress;
pub mod proxy;
pub mod signed_url;
pub mod uploader;
