mod client;
mod models;
mod totp;

pub use client::{AngelOneClient, Credentials};
pub use models::*;
pub use totp::generate_totp;
