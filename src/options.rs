use crate::level::MAX_HEIGHT;
use crate::pool::PoolPolicy;

/// Construction options shared by [`SkipList`](crate::SkipList) and
/// [`ConcurrentSkipList`](crate::ConcurrentSkipList).
///
/// ```
/// use skiptower::{PoolPolicy, SkipListOptions};
///
/// let options = SkipListOptions::default()
///     .pool(PoolPolicy::bounded(4_096))
///     .max_height(12)
///     .seed(7);
/// assert_eq!(options.max_height_limit(), 12);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SkipListOptions {
    pub(crate) pool: PoolPolicy,
    pub(crate) max_height: usize,
    pub(crate) seed: Option<u64>,
}

impl SkipListOptions {
    /// Sets the node pool policy.
    pub fn pool(mut self, policy: PoolPolicy) -> Self {
        self.pool = policy;
        self
    }

    /// Caps tower heights, clamped to `1..=64`.
    pub fn max_height(mut self, max_height: usize) -> Self {
        self.max_height = max_height.clamp(1, MAX_HEIGHT);
        self
    }

    /// Seeds the generator of a sequential list. Concurrent lists draw
    /// heights from per-thread generators and ignore the seed.
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The configured height cap.
    pub fn max_height_limit(&self) -> usize {
        self.max_height
    }

    /// The configured pool policy.
    pub fn pool_policy(&self) -> PoolPolicy {
        self.pool
    }
}

impl Default for SkipListOptions {
    fn default() -> Self {
        SkipListOptions {
            pool: PoolPolicy::default(),
            max_height: MAX_HEIGHT,
            seed: None,
        }
    }
}
