// Instance selection policies
use rand::seq::IndexedRandom;

use crate::gateway::discovery::ServiceInstance;

/// Selection policy over the instances discovery returned.
///
/// The policy is only consulted for non-empty sets; an empty set short
/// circuits to the registry's static fallback URL before selection.
pub trait SelectionPolicy: Send + Sync {
    fn choose<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance>;
}

/// Uniform random selection with no state carried between calls.
pub struct RandomPolicy;

impl SelectionPolicy for RandomPolicy {
    fn choose<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        instances.choose(&mut rand::rng())
    }
}

/// Always picks the first instance. Deterministic stand-in for tests.
#[cfg(test)]
pub struct FirstPolicy;

#[cfg(test)]
impl SelectionPolicy for FirstPolicy {
    fn choose<'a>(&self, instances: &'a [ServiceInstance]) -> Option<&'a ServiceInstance> {
        instances.first()
    }
}
