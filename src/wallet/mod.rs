//! Wallet module: per-address spendable views and construction locks

pub mod address_lock;
pub mod wallet;

pub use address_lock::AddressLocks;
pub use wallet::{is_output_for_address, Wallet, WalletManager};
