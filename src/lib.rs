pub mod auction;
pub mod broadcast;
pub mod config;
pub mod database;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod service;
pub mod store;
pub mod sweeper;
