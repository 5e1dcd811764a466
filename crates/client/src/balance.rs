//! Client-side load balancing over a resolved instance set.
//!
//! The registry returns instances in no particular order, so strategies that
//! depend on position order the set by instance id first.

use beacon_common::ServiceInstance;
use rand::Rng;
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};

pub trait LoadBalancer: Send + Sync {
    fn pick<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance>;
}

#[derive(Debug, Default)]
pub struct RoundRobin {
    next: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LoadBalancer for RoundRobin {
    fn pick<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let mut ordered: Vec<&ServiceInstance> = instances.iter().collect();
        ordered.sort_by(|a, b| a.instance_id.cmp(&b.instance_id));
        let i = self.next.fetch_add(1, Ordering::Relaxed) % ordered.len();
        Some(ordered[i])
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct Random;

impl LoadBalancer for Random {
    fn pick<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        if instances.is_empty() {
            return None;
        }
        let i = rand::thread_rng().gen_range(0..instances.len());
        instances.get(i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    RoundRobin,
    Random,
}

impl Strategy {
    pub fn balancer(self) -> Box<dyn LoadBalancer> {
        match self {
            Strategy::RoundRobin => Box::new(RoundRobin::new()),
            Strategy::Random => Box::new(Random),
        }
    }
}

impl FromStr for Strategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "round-robin" | "rr" => Ok(Strategy::RoundRobin),
            "random" => Ok(Strategy::Random),
            other => Err(format!("unknown strategy {:?} (expected round-robin or random)", other)),
        }
    }
}
