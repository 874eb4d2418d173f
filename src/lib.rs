//! # nb-cluster
//!
//! Turns a set of jar files into NetBeans module clusters and a runnable
//! application directory.
//!
//! ## Architecture
//!
//! - **manifest**: Manifest parsing and NetBeans / OSGi / plain classification
//! - **split**: Quote-aware header value splitting
//! - **registry**: Per-run, single-flight cache of classified jars
//! - **gate**: Incremental staleness decisions and `.lastModified` markers
//! - **descriptor**: Module status and update tracking XML, CRC-32
//! - **cluster**: Cluster assembly (jar + config + tracking per module)
//! - **collect**: Staging of non-platform module jars
//! - **app**: Application layout: platform copy, `etc/`, `bin/`
//! - **config**: JSON project settings and per-module overrides

pub mod app;
pub mod cli;
pub mod cluster;
pub mod collect;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod fsutil;
pub mod gate;
pub mod manifest;
pub mod registry;
pub mod split;
