//! PKGBUILD parsing and build-recipe retrieval.
//!
//! Recipes are never sourced by a shell; [`parse_pkgbuild`] reads the
//! dependency arrays directly and returns a typed [`Recipe`].

pub mod error;
pub mod parser;
pub mod provider;

pub use error::PkgbuildError;
pub use parser::{Recipe, parse_pkgbuild};
pub use provider::{DirectoryRecipeProvider, HttpRecipeProvider};
