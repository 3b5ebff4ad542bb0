pub mod preferences;
pub mod reconciliation;
