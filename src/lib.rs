//! # Drudge
//!
//! A configurable static-site build pipeline. A source tree goes in, a final
//! tree comes out; in between, a fixed catalog of stages runs in order,
//! each one enabled by its slot in `drudge.toml`.
//!
//! # Architecture: Temporary Tree, Then Promote
//!
//! ```text
//! src/  ──► pre-build checks (lint, validate)          reads src/
//!       ──► build:setup      src/ ─copy─► build/
//!       ──► build:* stages   build/ ──► build/          templates, sass, bundles,
//!                                                       minifiers, images, revision
//!       ──► post-build       build/                     validate-html, report
//!       ──► promote          build/ ─rename─► dist/     only if nothing failed
//! ```
//!
//! Every stage works in the temporary tree. The final tree is replaced in one
//! rename at the end of a successful run, so a failing stage (a lint error, a
//! broken template, strict markup validation) leaves the previous output in
//! place.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`config`] | `drudge.toml`/`drudge.json` loading, stock defaults, merge, validation |
//! | [`schema`] | Declarative type checks of the raw configuration document |
//! | [`pattern`] | Glob selections with `!` negation, rooted at a tree |
//! | [`stages`] | The 19-stage catalog and effective stage-list resolution |
//! | [`orchestrator`] | Runs, FIFO queueing, rollback and promotion |
//! | [`actions`] | What each stage does to the trees |
//! | [`tools`] | Collaborator traits and their default implementations |
//! | [`cache`] | Per-file stage cache keyed by content and parameter hashes |
//! | [`revision`] | Content-hash file naming and reference rewriting |
//! | [`report`] | Build report and CLI summaries |
//! | [`watch`] | Change coalescing and rebuild loop |
//! | [`serve`] | Development server with live reload |
//! | [`init`] | Project scaffolding |
//!
//! # Design Decisions
//!
//! ## A Closed Stage Catalog
//!
//! Stages are an enum, not plugins. Their order is fixed by the catalog;
//! configuration can only switch stages on or off. Two configurations that
//! enable the same slots always run the same steps in the same order, which
//! is what makes the stage cache and rollback straightforward to reason about.
//!
//! ## Collaborators Behind Traits
//!
//! Anything that talks to the outside world (external compilers and linters,
//! image codecs, the online markup validator) sits behind a trait in
//! [`tools`]. Stage actions only select files, call a collaborator and write
//! results, so tests swap in recording doubles without touching the network
//! or spawning processes.
//!
//! ## Explicit Run Context
//!
//! There is no global "current build". Each run owns an
//! [`actions::RunContext`] carrying its configuration, collaborators, cache
//! handle and statistics, and every stage receives it.

pub mod actions;
pub mod cache;
pub mod config;
pub mod init;
pub mod orchestrator;
pub mod pattern;
pub mod report;
pub mod revision;
pub mod schema;
pub mod serve;
pub mod stages;
pub mod tools;
pub mod watch;

#[cfg(test)]
pub(crate) mod test_helpers;
