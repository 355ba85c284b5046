pub mod action_router;
pub mod conversation;
pub mod credentials;
pub mod intent;
pub mod keywords;
pub mod oauth;
pub mod reports;
pub mod state_cleanup;
pub mod token_refresher;
