#![allow(unused_imports)]

pub use super::auth_challenge::Entity as AuthChallenge;
pub use super::faucet_grant::Entity as FaucetGrant;
pub use super::reward_grant::Entity as RewardGrant;
pub use super::user::Entity as User;
