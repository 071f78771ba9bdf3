/// Background worker pool.
///
/// Info fetches, directory listings and downloads are blocking native
/// calls; they run here so the control context never waits on the device.
use anyhow::{Context, Result};
use rayon::{ThreadPool, ThreadPoolBuilder};

pub fn build_worker_pool(threads: usize) -> Result<ThreadPool> {
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("openitools-worker-{i}"))
        .build()
        .with_context(|| format!("Failed to build a worker pool of {threads} threads"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_has_requested_size_and_named_threads() {
        let pool = build_worker_pool(3).unwrap();
        assert_eq!(pool.current_num_threads(), 3);
        let name = pool.install(|| std::thread::current().name().map(str::to_owned));
        assert!(name.unwrap().starts_with("openitools-worker-"));
    }
}
