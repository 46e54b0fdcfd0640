pub mod audit;
pub mod auth;
pub mod document_store;
pub mod games;
pub mod jwt;
pub mod kyc_service;
pub mod pix_service;
pub mod postal_code;
pub mod responsible_gaming;
pub mod user_service;
pub mod withdrawal_service;
