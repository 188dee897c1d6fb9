//! Batching of independent installs.
//!
//! Installs may share a batch only when their path footprints are disjoint
//! (no path is equal to or nested inside another). Exclusive installs always
//! get a batch of their own. Batches run one after another; the installs of
//! a batch run in parallel on a rayon pool.

use crate::executor::SerializationHint;
use rayon::prelude::*;
use std::collections::BTreeSet;
use std::path::PathBuf;

/// Scheduling input for one install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    /// Whether the install must run alone.
    pub hint: SerializationHint,
    /// Paths the install writes to.
    pub footprint: BTreeSet<PathBuf>,
}

/// Indices of installs that may run together.
pub type Batch = Vec<usize>;

/// Whether two footprints touch a common path.
pub fn overlaps(a: &BTreeSet<PathBuf>, b: &BTreeSet<PathBuf>) -> bool {
    a.iter()
        .any(|p| b.iter().any(|q| p.starts_with(q) || q.starts_with(p)))
}

/// Group jobs into batches, keeping input order.
pub fn schedule(jobs: &[JobSpec]) -> Vec<Batch> {
    let mut batches = Vec::new();
    let mut current: Batch = Vec::new();

    for (index, job) in jobs.iter().enumerate() {
        if job.hint.is_exclusive() {
            if !current.is_empty() {
                batches.push(std::mem::take(&mut current));
            }
            batches.push(vec![index]);
            continue;
        }

        let clashes = current
            .iter()
            .any(|&other| overlaps(&jobs[other].footprint, &job.footprint));
        if clashes {
            batches.push(std::mem::take(&mut current));
        }
        current.push(index);
    }

    if !current.is_empty() {
        batches.push(current);
    }
    log::debug!("Scheduled {} job(s) into {} batch(es)", jobs.len(), batches.len());
    batches
}

/// Run `work` for every item, batch by batch, on `jobs` threads.
///
/// Results come back in item order.
pub fn run_batches<T, R, F>(
    items: &[T],
    batches: &[Batch],
    jobs: usize,
    work: F,
) -> Result<Vec<R>, rayon::ThreadPoolBuildError>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> R + Sync,
{
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(jobs.max(1))
        .build()?;

    let mut results: Vec<(usize, R)> = Vec::with_capacity(items.len());
    for batch in batches {
        let batch_results: Vec<(usize, R)> = pool.install(|| {
            batch
                .par_iter()
                .filter_map(|&index| items.get(index).map(|item| (index, work(item))))
                .collect()
        });
        results.extend(batch_results);
    }

    results.sort_by_key(|(index, _)| *index);
    Ok(results.into_iter().map(|(_, r)| r).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared(paths: &[&str]) -> JobSpec {
        JobSpec {
            hint: SerializationHint::Shared,
            footprint: paths.iter().map(PathBuf::from).collect(),
        }
    }

    fn exclusive(paths: &[&str]) -> JobSpec {
        JobSpec {
            hint: SerializationHint::Exclusive {
                reason: "single-job install".into(),
            },
            footprint: paths.iter().map(PathBuf::from).collect(),
        }
    }

    #[test]
    fn test_overlaps_nested_paths() {
        let a: BTreeSet<PathBuf> = [PathBuf::from("/fx/etc/php")].into();
        let b: BTreeSet<PathBuf> = [PathBuf::from("/fx/etc/php/7.4")].into();
        let c: BTreeSet<PathBuf> = [PathBuf::from("/fx/etc/phpunit")].into();

        assert!(overlaps(&a, &b));
        assert!(!overlaps(&a, &c));
    }

    #[test]
    fn test_disjoint_jobs_share_batch() {
        let jobs = vec![
            shared(&["/fx/Cellar/gmp"]),
            shared(&["/fx/Cellar/curl"]),
            shared(&["/fx/Cellar/gmp/6.3"]),
        ];
        assert_eq!(schedule(&jobs), vec![vec![0, 1], vec![2]]);
    }

    #[test]
    fn test_exclusive_runs_alone() {
        let jobs = vec![
            shared(&["/fx/a"]),
            exclusive(&["/fx/b"]),
            shared(&["/fx/c"]),
            shared(&["/fx/d"]),
        ];
        assert_eq!(schedule(&jobs), vec![vec![0], vec![1], vec![2, 3]]);
    }

    #[test]
    fn test_run_batches_preserves_order() {
        let items = vec![1, 2, 3, 4];
        let batches = vec![vec![0, 2], vec![1], vec![3]];
        let results = run_batches(&items, &batches, 4, |n| n * 10).unwrap();
        assert_eq!(results, vec![10, 20, 30, 40]);
    }
}
