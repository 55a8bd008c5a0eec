pub mod prelude;

pub mod auth_challenge;
pub mod faucet_grant;
pub mod reward_grant;
pub mod user;
