pub mod feeds;
pub mod pull;
