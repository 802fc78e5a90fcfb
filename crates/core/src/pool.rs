use rayon::ThreadPoolBuilder;
use tracing::warn;

/// Run `work` inside a rayon pool of `jobs` threads (0 = one per CPU).
///
/// When a dedicated pool cannot be created the work runs on the global pool.
pub(crate) fn run_in_pool<R, F>(jobs: usize, work: F) -> R
where
    R: Send,
    F: FnOnce() -> R + Send,
{
    match ThreadPoolBuilder::new().num_threads(jobs).build() {
        Ok(pool) => pool.install(work),
        Err(err) => {
            warn!(%err, jobs, "cannot create worker pool; using the global pool");
            work()
        }
    }
}
