//! Provider adapters and the pieces they share: canonical statuses, the
//! adapter trait, webhook signature schemes and the transient-fault retry wrapper.

pub mod error;
pub mod factory;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod signature;
pub mod status;
pub mod types;
pub mod utils;

pub use error::{PaymentError, PaymentResult};
pub use provider::PaymentProvider;
pub use status::CanonicalStatus;
pub use types::{PaymentMethod, PaymentRequest, ProviderName};
