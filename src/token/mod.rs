//! Token persistence.
//!
//! # Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | `lock` | Cross-process cache lock |
//! | `store` | `TokenStore` trait, file and memory stores |

// ============================================================================
// Submodules
// ============================================================================

/// Cross-process cache lock.
pub mod lock;

/// Token stores.
pub mod store;

// ============================================================================
// Re-exports
// ============================================================================

pub use lock::CacheLock;
pub use store::{FileTokenStore, MemoryTokenStore, TokenStore, default_path};
