//! Business context: the snapshot, its store and its prompt digest.
//!
//! - [`BusinessSnapshot`]: immutable point-in-time copy of the business data
//! - [`ContextStore`]: owner of the current snapshot pointer
//! - [`summary`]: bounded digest used to build system instructions

pub mod snapshot;
pub mod store;
pub mod summary;

pub use snapshot::{
    BusinessSnapshot, Client, CompanyProfile, Employee, Equipment, Invoice, InvoiceStatus, Job,
    JobStatus, Lead, LeadStatus, PayPeriod, PayrollRecord, Quote, QuoteStatus, SnapshotPatch,
    TimeEntry, UnknownStatus,
};
pub use store::ContextStore;
