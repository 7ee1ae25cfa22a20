#![deny(
    warnings,
    rustdoc::broken_intra_doc_links,
    rustdoc::private_intra_doc_links,
    missing_docs,
    missing_debug_implementations,
    trivial_casts,
    trivial_numeric_casts,
    unreachable_pub,
    unsafe_op_in_unsafe_fn,
    unused_crate_dependencies,
    unused_extern_crates,
    unused_import_braces,
    unused_lifetimes,
    unused_qualifications,
    unused_results,
    rust_2018_idioms
)]

//! A concurrent, lock-free point-insertion engine for spatially-partitioned
//! point-cloud octrees.
//!
//! Producers call [`registry::Registry::add_point`] from any number of
//! threads at once; each point races a lock-free compare-and-swap against
//! whatever else is inserting into the same node, descending deeper whenever
//! it loses, until it settles at a node it's the best (closest-to-center)
//! candidate for or falls off the tree's addressable depth range.
//!
//! # Example
//!
//! ```
//! use entwine_core::bbox::BBox;
//! use entwine_core::cell::{DataPool, InfoPool};
//! use entwine_core::chunk::InMemoryChunkStore;
//! use entwine_core::clipper::Clipper;
//! use entwine_core::point::Point;
//! use entwine_core::registry::Registry;
//! use entwine_core::structure::{PoolConfig, Structure};
//! use std::sync::Arc;
//!
//! let structure = Structure::new(0, 8, true, 0, true, false, true).unwrap();
//! let root = BBox::new(Point::new(0.0, 0.0, 0.0), Point::new(1024.0, 1024.0, 1024.0));
//! let registry = Registry::new(
//!     structure,
//!     root,
//!     InfoPool::new(PoolConfig::unbounded(1024)),
//!     DataPool::new(PoolConfig::unbounded(1024)),
//!     Arc::new(InMemoryChunkStore::new()),
//! );
//!
//! let mut clipper = Clipper::new(registry.store());
//! let kept = registry
//!     .add_point(&mut clipper, Point::new(12.0, 34.0, 56.0), 0, 0, b"payload", 0, None)
//!     .unwrap();
//! assert!(kept);
//! ```

pub mod bbox;
pub mod cell;
pub mod chunk;
pub mod climber;
pub mod clipper;
pub mod error;
pub mod hierarchy;
pub mod id;
pub mod point;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod structure;

pub(crate) mod cache_pad;
pub(crate) mod variant;

pub use error::{Error, Result};
pub use registry::Registry;
