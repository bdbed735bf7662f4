pub mod buffer_pool;
pub mod lru_k_replacer;

pub use buffer_pool::BufferPoolManager;
pub use lru_k_replacer::LruKReplacer;
