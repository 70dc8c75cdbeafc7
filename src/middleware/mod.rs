mod client_ctx;

pub use client_ctx::{client_ip, hash_voter_token, ClientCtx, SESSION_USER_ID, SESSION_VOTER_TOKEN};
