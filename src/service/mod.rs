//! Services behind the dispatcher: retrying transactions, resource execution and capabilities.

pub mod capability;
mod executor;
pub mod transaction;

pub use capability::{AccessDecision, Capability, CapabilityService, ChangeOrDeleteReferencesCapability};
pub use executor::{effective_user, execute, Outcome, ResourceInvocation};
pub use transaction::{RetryPolicy, RetryingTransactionHelper, UnitOfWork};
