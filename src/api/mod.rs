pub mod demo;
pub mod provider;
#[cfg(feature = "rpc")]
pub mod rpc;

pub use demo::DemoLedger;
pub use provider::{DataSourceStatus, Ledger, LedgerError, LedgerResult};
#[cfg(feature = "rpc")]
pub use rpc::RpcLedger;
