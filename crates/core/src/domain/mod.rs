pub mod client;
pub mod job;
pub mod proposal;
pub mod provider;
pub mod token;
