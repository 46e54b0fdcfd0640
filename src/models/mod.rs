pub mod audit;
pub mod game;
pub mod kyc;
pub mod limits;
pub mod payment_request;
pub mod transaction;
pub mod user;
