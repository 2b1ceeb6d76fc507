//! Scatter/gather over `may` coroutines.
//!
//! Work items are queued on a crossbeam channel that is filled and closed up
//! front; `concurrency` coroutines drain it and the caller joins all of them.
//! Every item runs to completion even when others fail, and results come back
//! in item order.

use crate::error::LinkError;
use crossbeam_channel::unbounded;
use once_cell::sync::OnceCell;
use std::sync::Arc;

static RUNTIME_CONFIGURED: OnceCell<()> = OnceCell::new();

/// Apply the coroutine stack size once per process; later calls are ignored
pub(crate) fn configure_runtime(stack_size: usize) {
    RUNTIME_CONFIGURED.get_or_init(|| {
        may::config().set_stack_size(stack_size);
        log::debug!("may coroutine stack size set to {stack_size}");
    });
}

/// Run `work` over `items` on at most `concurrency` coroutines
///
/// A worker that panics loses the items it had claimed; they are reported as
/// [`LinkError::FanOut`].
pub(crate) fn scatter_gather<T, R, F>(
    items: Vec<T>,
    concurrency: usize,
    work: F,
) -> Vec<Result<R, LinkError>>
where
    T: Send + 'static,
    R: Send + 'static,
    F: Fn(T) -> Result<R, LinkError> + Send + Sync + 'static,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }

    let (tx, rx) = unbounded();
    for item in items.into_iter().enumerate() {
        // the receiver is alive until the workers are joined
        let _ = tx.send(item);
    }
    drop(tx);

    let work = Arc::new(work);
    let workers = concurrency.clamp(1, total);
    let handles: Vec<_> = (0..workers)
        .map(|_| {
            let rx = rx.clone();
            let work = Arc::clone(&work);
            may::go!(move || {
                let mut done = Vec::new();
                while let Ok((index, item)) = rx.recv() {
                    done.push((index, work(item)));
                }
                done
            })
        })
        .collect();

    let mut results: Vec<Option<Result<R, LinkError>>> = (0..total).map(|_| None).collect();
    for handle in handles {
        match handle.join() {
            Ok(done) => {
                for (index, result) in done {
                    results[index] = Some(result);
                }
            }
            Err(_) => log::warn!("fan-out worker panicked"),
        }
    }

    results
        .into_iter()
        .map(|slot| {
            slot.unwrap_or_else(|| Err(LinkError::FanOut("worker panicked before reporting".to_string())))
        })
        .collect()
}

/// First error in item order, after every item has settled
pub(crate) fn first_error<R>(results: &mut Vec<Result<R, LinkError>>) -> Option<LinkError> {
    let position = results.iter().position(Result::is_err)?;
    results.remove(position).err()
}
