pub mod password;
pub mod ticket;
pub mod tokens;
pub mod totp;
