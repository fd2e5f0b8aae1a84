pub mod auth;
pub mod balance;
pub mod catalog;
pub mod checkout;
pub mod config;
pub mod correlator;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod payment;
pub mod reconciler;
pub mod scheduler;
pub mod server;
pub mod storage;
pub mod subscription;
