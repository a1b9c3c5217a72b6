//! Database repository layer

pub mod attendance_repo;
pub mod catalog_repo;
pub mod drift_repo;
pub mod escalation_repo;
pub mod ledger_repo;

pub use attendance_repo::*;
pub use catalog_repo::*;
pub use drift_repo::*;
pub use escalation_repo::*;
pub use ledger_repo::*;
