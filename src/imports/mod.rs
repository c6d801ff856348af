mod errors;
pub mod ledger;
mod service;
#[cfg(test)]
mod tests;

pub use errors::ImportError;
pub use service::{DocumentAction, ImportAction, ImportReport, ImportService};
