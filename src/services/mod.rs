pub mod agent; // Agent-mediated queries over MCP
pub mod executor; // Submit -> poll -> fetch -> normalize pipeline
pub mod fetcher;
pub mod normalizer;
pub mod poller;
pub mod submitter;
pub mod transport;

pub use agent::*;
pub use executor::*;
pub use fetcher::*;
pub use normalizer::{extract, normalize, Strategy};
pub use poller::*;
pub use submitter::*;
pub use transport::{Credential, ReqwestTransport, ServiceClient, Transport, TransportRequest, TransportResponse};
