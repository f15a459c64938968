//! Parsing and un-quickening of Android Runtime Vdex containers and the Dex/CompactDex
//! files embedded within them.
//!
//! Module layout, leaves first: [`leb128`] and [`instruction`] have no internal
//! dependencies; [`dex`] builds on both; [`vdex`] and [`quicken`] build on [`dex`];
//! [`unquicken`] ties the instruction model, the Dex view, and a version's quickening
//! reader together; [`verifier_deps`] and [`pretty_print`] are leaf consumers of [`dex`].

pub mod dex;
pub mod errors;
pub mod instruction;
pub mod leb128;
pub mod pretty_print;
pub mod quicken;
pub mod unquicken;
pub mod vdex;
pub mod verifier_deps;
