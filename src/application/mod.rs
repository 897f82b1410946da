// Application layer - Window assembly and its collaborators
pub mod cache_store;
pub mod downsample;
pub mod keys;
pub mod level_selector;
pub mod meta_store;
pub mod row_source;
pub mod tile_lock;
pub mod window_service;

#[cfg(test)]
pub mod test_support;
