pub mod coinbase;
pub mod mock;
pub mod paymongo;
pub mod stripe;
pub mod xendit;

pub use coinbase::{CoinbaseConfig, CoinbaseProvider};
pub use mock::{MockConfig, MockProvider};
pub use paymongo::{PayMongoConfig, PayMongoProvider};
pub use stripe::{StripeConfig, StripeProvider};
pub use xendit::{XenditConfig, XenditProvider};
