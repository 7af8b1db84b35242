pub mod crypto;
pub mod redirect_validator;
pub mod responses;
