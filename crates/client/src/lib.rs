pub mod balance;
pub mod client;
pub mod error;
pub mod heartbeat;

pub use balance::{LoadBalancer, Random, RoundRobin, Strategy};
pub use client::{BeaconClient, RetryPolicy, DEFAULT_BASE_URL};
pub use error::ClientError;
pub use heartbeat::{heartbeat_interval, spawn_heartbeat, Registration};
