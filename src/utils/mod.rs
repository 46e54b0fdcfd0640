pub mod crypto;
pub mod middleware;
pub mod money;
pub mod validation;
