//! Set gap detection and cross-catalog reconciliation for DJ sets.
//!
//! `gaps` and `suggest` analyse a set's timeline and rank repository tracks
//! for the holes; `reconcile` confirms "unreleased" records against public
//! catalogs. Both share `normalize` and `scoring`.

pub mod cache;
pub mod catalog;
pub mod gaps;
pub mod models;
pub mod normalize;
pub mod progress;
pub mod reconcile;
pub mod safety;
pub mod scoring;
pub mod store;
pub mod suggest;
