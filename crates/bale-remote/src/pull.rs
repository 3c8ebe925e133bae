use crate::retry::RetryPolicy;
use crate::{RemoteConfig, RemoteError, Transport};
use bale_store::{
    file_digest, is_safe_relative, layer_paths, CancelToken, LayerDescriptor, PackageLayout,
    RootManifest, StoreError,
};
use std::collections::BTreeSet;
use std::fs;
use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PullOptions {
    /// Number of layers fetched in parallel.
    pub concurrency: usize,
    pub retry: RetryPolicy,
}

impl Default for PullOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl PullOptions {
    pub fn from_config(config: &RemoteConfig) -> Self {
        Self {
            concurrency: config.concurrency.max(1),
            retry: config.retry_policy(),
        }
    }
}

/// Result of a pull operation.
#[derive(Debug, Clone)]
pub struct PullResult {
    /// Layers now present in the destination, in request order.
    pub layers: Vec<LayerDescriptor>,
    pub layers_pulled: usize,
    pub layers_skipped: usize,
    pub bytes_pulled: u64,
    /// True when fewer layers were pulled than the root manifest declares.
    pub partial: bool,
}

impl PullResult {
    /// Package-relative paths carried by the pulled layers.
    pub fn paths(&self) -> BTreeSet<String> {
        layer_paths(&self.layers)
    }
}

enum Outcome {
    Pulled(u64),
    Skipped,
}

/// Fetch `layers` into `dest`, verifying each blob's size and digest.
///
/// Duplicate titles are fetched once. A layer whose destination already
/// holds the expected content is skipped. Up to `opts.concurrency` layers
/// are fetched at a time; the first failed layer stops the pull, and files
/// already written stay in place.
pub fn pull(
    transport: &dyn Transport,
    root: &RootManifest,
    layers: &[LayerDescriptor],
    dest: &PackageLayout,
    opts: &PullOptions,
    cancel: &CancelToken,
) -> Result<PullResult, RemoteError> {
    if layers.is_empty() {
        return Err(RemoteError::NotFound("no layers to pull".to_owned()));
    }

    let mut seen = BTreeSet::new();
    let mut unique = Vec::new();
    for layer in layers {
        let title = layer
            .title()
            .ok_or_else(|| RemoteError::InvalidLayout(format!("layer {} has no title", layer.digest)))?;
        if !is_safe_relative(title) {
            return Err(RemoteError::InvalidLayout(format!(
                "unsafe layer title '{title}'"
            )));
        }
        if seen.insert(title.to_owned()) {
            unique.push(layer.clone());
        }
    }

    let total: u64 = unique.iter().map(|l| l.size).sum();
    info!(
        "pulling {} layers ({total} bytes) from {}",
        unique.len(),
        transport.location()
    );
    fs::create_dir_all(dest.root())?;

    let next = AtomicUsize::new(0);
    let abort = AtomicBool::new(false);
    let workers = opts.concurrency.clamp(1, unique.len());
    let (tx, rx) = mpsc::channel::<Result<Outcome, RemoteError>>();

    let outcomes: Vec<Result<Outcome, RemoteError>> = std::thread::scope(|s| {
        for _ in 0..workers {
            let tx = tx.clone();
            let (next, abort, unique) = (&next, &abort, &unique);
            s.spawn(move || loop {
                if abort.load(Ordering::SeqCst) || cancel.is_cancelled() {
                    break;
                }
                let i = next.fetch_add(1, Ordering::SeqCst);
                let Some(layer) = unique.get(i) else { break };
                let result = fetch_layer(transport, layer, dest, &opts.retry, cancel);
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                if tx.send(result).is_err() {
                    break;
                }
            });
        }
        drop(tx);
        rx.iter().collect()
    });

    let mut result = PullResult {
        layers: unique,
        layers_pulled: 0,
        layers_skipped: 0,
        bytes_pulled: 0,
        partial: false,
    };
    for outcome in outcomes {
        match outcome? {
            Outcome::Pulled(n) => {
                result.layers_pulled += 1;
                result.bytes_pulled += n;
            }
            Outcome::Skipped => result.layers_skipped += 1,
        }
    }
    cancel.check()?;

    result.partial = result.layers.len() < root.layers.len();
    info!(
        "pulled {} layers, skipped {} ({} bytes){}",
        result.layers_pulled,
        result.layers_skipped,
        result.bytes_pulled,
        if result.partial { ", partial" } else { "" }
    );
    Ok(result)
}

/// True when `path` already holds the layer's exact content.
fn already_present(path: &std::path::Path, layer: &LayerDescriptor) -> bool {
    fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() == layer.size)
        && file_digest(path).is_ok_and(|d| d == layer.digest)
}

fn fetch_layer(
    transport: &dyn Transport,
    layer: &LayerDescriptor,
    dest: &PackageLayout,
    retry: &RetryPolicy,
    cancel: &CancelToken,
) -> Result<Outcome, RemoteError> {
    let title = layer.title().unwrap_or_default();
    let path = dest.path_of(title);
    if already_present(&path, layer) {
        debug!("{title} already present");
        return Ok(Outcome::Skipped);
    }
    let dir = path
        .parent()
        .ok_or_else(|| StoreError::OutsidePackage(path.display().to_string()))?;
    fs::create_dir_all(dir)?;

    retry.run(title, cancel, || {
        debug!("fetching {title}");
        // one byte past the declared size is enough to detect an oversized blob
        let mut reader = transport.open_blob(layer)?.take(layer.size.saturating_add(1));
        let mut tmp = NamedTempFile::new_in(dir)?;
        let written = std::io::copy(&mut reader, &mut tmp)?;
        tmp.flush()?;
        if written != layer.size {
            return Err(RemoteError::SizeMismatch {
                key: title.to_owned(),
                expected: layer.size,
                actual: written,
            });
        }
        let actual = file_digest(tmp.path())?;
        if actual != layer.digest {
            return Err(RemoteError::IntegrityFailure {
                key: title.to_owned(),
                expected: layer.digest.to_string(),
                actual: actual.into_inner(),
            });
        }
        tmp.persist(&path).map_err(|e| RemoteError::Io(e.error))?;
        debug!("fetched {title} ({written} bytes)");
        Ok(Outcome::Pulled(written))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTransport;
    use std::time::Duration;

    fn files() -> Vec<(&'static str, &'static str)> {
        vec![
            ("bale.yaml", "metadata:\n  name: demo\n"),
            ("checksums.txt", "sums\n"),
            ("components/a.tar", "archive a"),
            ("components/b.tar", "archive b"),
            ("images/blobs/sha256/0001", "image blob"),
        ]
    }

    fn fast() -> PullOptions {
        PullOptions {
            concurrency: 2,
            retry: RetryPolicy {
                attempts: 3,
                delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            },
        }
    }

    #[test]
    fn pull_all_layers() {
        let mock = MockTransport::new(&files());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let result = pull(&mock, &mock.root, &mock.root.layers, &dest, &fast(), &CancelToken::new())
            .unwrap();
        assert_eq!(result.layers_pulled, 5);
        assert!(!result.partial);
        assert_eq!(
            fs::read_to_string(dir.path().join("components/b.tar")).unwrap(),
            "archive b"
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("images/blobs/sha256/0001")).unwrap(),
            "image blob"
        );
    }

    #[test]
    fn subset_pull_is_partial() {
        let mock = MockTransport::new(&files());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let subset: Vec<_> = mock.root.layers[..3].to_vec();
        let result =
            pull(&mock, &mock.root, &subset, &dest, &fast(), &CancelToken::new()).unwrap();
        assert!(result.partial);
        assert_eq!(
            result.paths(),
            ["bale.yaml", "checksums.txt", "components/a.tar"]
                .into_iter()
                .map(str::to_owned)
                .collect()
        );
        assert!(!dir.path().join("components/b.tar").exists());
    }

    #[test]
    fn duplicate_titles_fetched_once() {
        let mock = MockTransport::new(&files());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let mut layers = mock.root.layers.clone();
        layers.push(mock.root.layers[2].clone());
        let result =
            pull(&mock, &mock.root, &layers, &dest, &fast(), &CancelToken::new()).unwrap();
        assert_eq!(result.layers.len(), 5);
        assert_eq!(mock.fetched().len(), 5);
    }

    #[test]
    fn existing_valid_files_are_skipped() {
        let mock = MockTransport::new(&files());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let token = CancelToken::new();
        pull(&mock, &mock.root, &mock.root.layers, &dest, &fast(), &token).unwrap();

        fs::write(dir.path().join("components/a.tar"), "corrupted").unwrap();
        let again = MockTransport::new(&files());
        let result = pull(&again, &again.root, &again.root.layers, &dest, &fast(), &token).unwrap();
        assert_eq!(result.layers_skipped, 4);
        assert_eq!(result.layers_pulled, 1);
        assert_eq!(again.fetched(), vec!["components/a.tar".to_owned()]);
        assert_eq!(
            fs::read_to_string(dir.path().join("components/a.tar")).unwrap(),
            "archive a"
        );
    }

    #[test]
    fn transient_failures_are_retried() {
        let mock = MockTransport::new(&files());
        mock.failures.store(2, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let opts = PullOptions {
            concurrency: 1,
            ..fast()
        };
        let result =
            pull(&mock, &mock.root, &mock.root.layers, &dest, &opts, &CancelToken::new()).unwrap();
        assert_eq!(result.layers_pulled, 5);
    }

    #[test]
    fn exhausted_retries_abort_pull() {
        let mock = MockTransport::new(&files());
        mock.failures.store(100, Ordering::SeqCst);
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let err = pull(&mock, &mock.root, &mock.root.layers, &dest, &fast(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RemoteError::RetriesExhausted { attempts: 3, .. }));
    }

    #[test]
    fn corrupted_blob_is_integrity_failure() {
        let mut mock = MockTransport::new(&files());
        let target = mock.root.locate("components/a.tar").unwrap().clone();
        mock.blobs
            .insert(target.digest.to_string(), b"archive X".to_vec());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let opts = PullOptions {
            retry: RetryPolicy::none(),
            ..fast()
        };
        let err = pull(&mock, &mock.root, &[target], &dest, &opts, &CancelToken::new())
            .unwrap_err();
        match err {
            RemoteError::RetriesExhausted { last, .. } => {
                assert!(matches!(*last, RemoteError::IntegrityFailure { .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("components/a.tar").exists());
    }

    #[test]
    fn oversized_blob_is_cut_off() {
        let mut mock = MockTransport::new(&files());
        let target = mock.root.locate("components/a.tar").unwrap().clone();
        mock.blobs
            .insert(target.digest.to_string(), vec![b'x'; 1 << 20]);
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let opts = PullOptions {
            retry: RetryPolicy::none(),
            ..fast()
        };
        let err = pull(&mock, &mock.root, &[target.clone()], &dest, &opts, &CancelToken::new())
            .unwrap_err();
        match err {
            RemoteError::RetriesExhausted { last, .. } => match *last {
                RemoteError::SizeMismatch {
                    expected, actual, ..
                } => {
                    assert_eq!(expected, target.size);
                    assert_eq!(actual, target.size + 1);
                }
                other => panic!("unexpected error: {other}"),
            },
            other => panic!("unexpected error: {other}"),
        }
        assert!(!dir.path().join("components/a.tar").exists());
    }

    #[test]
    fn cancelled_pull_stops() {
        let mock = MockTransport::new(&files());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let token = CancelToken::new();
        token.cancel();
        let err = pull(&mock, &mock.root, &mock.root.layers, &dest, &fast(), &token).unwrap_err();
        assert!(err.is_cancelled());
    }

    #[test]
    fn empty_request_is_error() {
        let mock = MockTransport::new(&files());
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        assert!(pull(&mock, &mock.root, &[], &dest, &fast(), &CancelToken::new()).is_err());
    }

    #[test]
    fn unsafe_titles_rejected() {
        let mock = MockTransport::new(&[("../escape", "x")]);
        let dir = tempfile::tempdir().unwrap();
        let dest = PackageLayout::new(dir.path());
        let err = pull(&mock, &mock.root, &mock.root.layers, &dest, &fast(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, RemoteError::InvalidLayout(_)));
    }
}
