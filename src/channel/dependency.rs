//! Dependency ordering for channel sets.
//!
//! Computing and integrating channels read from their inputs, so every lifecycle call
//! must reach an input before the channels derived from it. The sort repeatedly emits
//! every remaining item whose dependencies have all been emitted. A pass that emits
//! nothing means the remaining items form at least one cycle.

use super::SharedChannel;
use crate::error::{AppResult, DaqError};

/// Order `items` so that each one appears after everything it depends on.
///
/// `depends_on(a, b)` must return true when `a` reads from `b`. An item depending on
/// itself is a cycle of length one. Items without mutual dependencies keep their
/// relative input order.
///
/// # Errors
///
/// Returns [`DaqError::CircularDependency`] if the relation contains a cycle.
///
/// # Example
///
/// ```
/// use measure_daq::channel::sort_by_dependency;
///
/// // (name, inputs)
/// let items = vec![("sum", vec!["double"]), ("double", vec!["raw"]), ("raw", vec![])];
/// let sorted = sort_by_dependency(items, |a, b| a.1.contains(&b.0)).unwrap();
/// let names: Vec<_> = sorted.iter().map(|item| item.0).collect();
/// assert_eq!(names, ["raw", "double", "sum"]);
/// ```
pub fn sort_by_dependency<T, F>(items: Vec<T>, depends_on: F) -> AppResult<Vec<T>>
where
    F: Fn(&T, &T) -> bool,
{
    let deps: Vec<Vec<usize>> = items
        .iter()
        .map(|outer| {
            items
                .iter()
                .enumerate()
                .filter(|(_, inner)| depends_on(outer, inner))
                .map(|(index, _)| index)
                .collect()
        })
        .collect();

    let mut emitted = vec![false; items.len()];
    let mut order = Vec::with_capacity(items.len());
    let mut remaining: Vec<usize> = (0..items.len()).collect();

    while !remaining.is_empty() {
        let before = order.len();

        remaining.retain(|&index| {
            if deps[index].iter().all(|&dep| emitted[dep]) {
                emitted[index] = true;
                order.push(index);
                false
            } else {
                true
            }
        });

        if order.len() == before {
            return Err(DaqError::CircularDependency);
        }
    }

    let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|index| slots[index].take())
        .collect())
}

/// Sort shared channels by their input relation.
pub fn sort_channels(channels: Vec<SharedChannel>) -> AppResult<Vec<SharedChannel>> {
    sort_by_dependency(channels, |a, b| {
        let b_name = b.borrow().name().to_string();
        a.borrow().depends_on(&b_name)
    })
}
