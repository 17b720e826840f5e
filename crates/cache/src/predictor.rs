//! Request-sequence tracking for predictive pre-loading.
//!
//! Tracks which cache key tends to follow which, per user. When a user's
//! latest key matches a known transition, the most frequent successor is
//! offered for speculative recomputation. The predictor also remembers a
//! bounded set of "recipes" (recompute closures) so a predicted artifact
//! can actually be rebuilt without the original request.

use futures::future::BoxFuture;
use gridiron_core::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// A closure that recomputes the artifact for a key.
pub type PreloadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<serde_json::Value>> + Send + Sync>;

/// Per-user transition model over observed cache keys.
pub struct SequencePredictor {
    /// Last observed key per user.
    last_key: HashMap<String, String>,
    /// key → successor key → observation count, FIFO-bounded on the
    /// predecessor key like the recipe map (fingerprint keys would
    /// otherwise accumulate for the process lifetime).
    transitions: HashMap<String, HashMap<String, u32>>,
    transition_order: VecDeque<String>,
    /// key → recompute recipe, with FIFO bound.
    recipes: HashMap<String, PreloadFn>,
    recipe_order: VecDeque<String>,
    max_recipes: usize,
    max_users: usize,
}

/// Distinct successors tracked per predecessor key.
const MAX_SUCCESSORS: usize = 16;

impl std::fmt::Debug for SequencePredictor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequencePredictor")
            .field("users", &self.last_key.len())
            .field("transitions", &self.transitions.len())
            .field("recipes", &self.recipes.len())
            .finish()
    }
}

impl SequencePredictor {
    pub fn new(max_recipes: usize, max_users: usize) -> Self {
        Self {
            last_key: HashMap::new(),
            transitions: HashMap::new(),
            transition_order: VecDeque::new(),
            recipes: HashMap::new(),
            recipe_order: VecDeque::new(),
            max_recipes,
            max_users,
        }
    }

    /// Record that `user` just consumed `key`, remember how to rebuild it,
    /// and return the predicted next key (with its recipe) if one is known.
    pub fn observe(
        &mut self,
        user: &str,
        key: &str,
        recipe: PreloadFn,
    ) -> Option<(String, PreloadFn)> {
        self.remember_recipe(key, recipe);

        if let Some(prev) = self.last_key.get(user) {
            let prev = prev.clone();
            if prev != key {
                self.record_transition(&prev, key);
            }
        }

        // Bound the per-user map: drop an arbitrary stale user at capacity.
        if !self.last_key.contains_key(user) && self.last_key.len() >= self.max_users {
            if let Some(stale) = self.last_key.keys().next().cloned() {
                self.last_key.remove(&stale);
            }
        }
        self.last_key.insert(user.to_string(), key.to_string());

        self.predict_next(key)
    }

    /// Count a `prev → next` observation. Tracked predecessor keys share
    /// the recipe cap and are evicted FIFO; successors per key are capped,
    /// with new successors ignored once established ones fill the slots.
    fn record_transition(&mut self, prev: &str, next: &str) {
        if !self.transitions.contains_key(prev) {
            if self.transition_order.len() >= self.max_recipes {
                if let Some(oldest) = self.transition_order.pop_front() {
                    self.transitions.remove(&oldest);
                }
            }
            self.transition_order.push_back(prev.to_string());
        }
        let successors = self.transitions.entry(prev.to_string()).or_default();
        if successors.len() >= MAX_SUCCESSORS && !successors.contains_key(next) {
            return;
        }
        *successors.entry(next.to_string()).or_insert(0) += 1;
    }

    /// The most frequently observed successor of `key`, if any, paired with
    /// a recipe to rebuild it. No recipe → no prediction.
    fn predict_next(&self, key: &str) -> Option<(String, PreloadFn)> {
        let successors = self.transitions.get(key)?;
        let (next, _) = successors.iter().max_by_key(|(_, count)| **count)?;
        let recipe = self.recipes.get(next)?.clone();
        Some((next.clone(), recipe))
    }

    fn remember_recipe(&mut self, key: &str, recipe: PreloadFn) {
        if !self.recipes.contains_key(key) {
            if self.recipe_order.len() >= self.max_recipes {
                if let Some(oldest) = self.recipe_order.pop_front() {
                    self.recipes.remove(&oldest);
                }
            }
            self.recipe_order.push_back(key.to_string());
        }
        self.recipes.insert(key.to_string(), recipe);
    }
}
