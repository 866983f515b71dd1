// The core module contains all business logic.
// Each feature gets its own submodule.

#[path = "ai/mod.rs"]
pub mod ai;

#[path = "automod/mod.rs"]
pub mod automod;

#[path = "delivery/mod.rs"]
pub mod delivery;

#[path = "rate_limit/rate_limiter.rs"]
pub mod rate_limit;

#[cfg(test)]
#[path = "testing.rs"]
pub mod testing;
