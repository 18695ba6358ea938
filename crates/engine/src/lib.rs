pub mod alert;
pub mod cadence;
pub mod claim;
pub mod delivery;
pub mod ledger;
pub mod scan;
pub mod scheduler;
pub mod settings;
pub mod store;
pub mod subscription;

pub use scheduler::{CycleSummary, RenewalScheduler};
pub use settings::SchedulerSettings;
