pub mod credentials;
pub mod fetch;
pub mod pool;

pub use credentials::CredentialResolver;
pub use fetch::{FetchOutcome, Fetcher, HttpFetcher};
pub use pool::{Pool, PoolConfig, Task};
