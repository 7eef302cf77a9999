//! Client core for a yield-aggregating ERC-4626 vault.
//!
//! [`vault::VaultSession`] is the entry point: it reads vault, account and
//! strategy state through a [`api::Ledger`], previews conversions, and runs
//! deposit, withdraw, redeem and harvest as ordered state machines whose
//! results land in a subscribable [`vault::VaultStateStore`].

pub mod api;
pub mod config;
pub mod model;
pub mod vault;
