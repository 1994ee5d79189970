//! Rule application
//!
//! Extras (`misc.tsv`) and rules (`rules.tsv`) carry declarative entries such
//! as permission grants, app-op modes and component states. [`RuleEngine`]
//! replays them best effort; [`RulesImporter`] loads rule files for a set of
//! packages and users.

mod engine;
mod entry;
mod importer;

pub use engine::{ReplayReport, RuleEngine};
pub use entry::{ComponentKind, RuleEntry, UriGrant};
pub use importer::{RulesImporter, TsvRulesImporter};
