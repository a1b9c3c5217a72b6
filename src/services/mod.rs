//! Business logic services layer

pub mod catalog_service;
pub mod escalation_service;
pub mod ledger_service;
pub mod time_authority;
pub mod transition_service;

pub use catalog_service::CatalogService;
pub use escalation_service::EscalationService;
pub use ledger_service::LedgerService;
pub use time_authority::TimeAuthority;
pub use transition_service::TransitionService;
