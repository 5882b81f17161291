//! Returns, exchanges and store-credit coupons for the storefront.
//!
//! [`service::ReturnsService`] is the entry point: it checks eligibility, files and
//! moves return requests, and issues, validates and redeems the coupons they produce.

pub mod clock;
pub mod collaborators;
pub mod config;
pub mod coupon;
pub mod eligibility;
pub mod error;
pub mod logger;
pub mod returns;
pub mod service;
pub mod store;
pub mod transition;
pub mod types;
pub mod utils;
