//! Part-of side index (spec.md §3, §4.7).
//!
//! A process-wide weak log from a part's cursor to its registered whole.
//! Weak because neither side of the relationship should keep the other
//! alive just by being registered (spec.md §5: best-effort, unlocked,
//! readers and writers both touch it without synchronizing beyond what the
//! log itself guarantees).

use std::sync::{Mutex, OnceLock};

use crate::cursor::Cursor;
use crate::error::{CResult, Error};
use crate::log::{Log, WeakLog};
use crate::state::CellState;
use crate::transaction;

fn whole_of() -> &'static Mutex<WeakLog<Cursor>> {
    static WHOLE_OF: OnceLock<Mutex<WeakLog<Cursor>>> = OnceLock::new();
    WHOLE_OF.get_or_init(|| Mutex::new(WeakLog::new()))
}

/// Registers `part` as part of `whole`. Fails if `part` is already
/// registered under a *different* whole.
pub fn part_of(whole: &Cursor, part: &Cursor) -> CResult<()> {
    let mut log = whole_of().lock().expect("meronymy mutex poisoned");
    if let Some(existing) = log.get(part).and_then(|s| s.as_value().cloned()) {
        if existing != *whole {
            return Err(Error::Meronymic(format!(
                "cursor {:?} is already a part of {:?}",
                part, existing
            )));
        }
    }
    log.set(part, CellState::present(whole.clone()));
    Ok(())
}

/// The whole registered for `part`, collapsing transitively to a fixed
/// point. A whole that (incorrectly) ends up part of itself terminates the
/// walk rather than looping forever (spec.md §4.7: "look up the registered
/// whole, transitively collapsing chains until a fixed point").
pub fn whole(part: &Cursor) -> Option<Cursor> {
    let mut log = whole_of().lock().expect("meronymy mutex poisoned");
    let mut seen = std::collections::HashSet::new();
    seen.insert(part.id());
    let mut result = None;
    let mut current = part.clone();
    while let Some(w) = log.get(&current).and_then(|s| s.as_value().cloned()) {
        if !seen.insert(w.id()) {
            break;
        }
        result = Some(w.clone());
        current = w;
    }
    result
}

/// The resolved whole for each of `parts`, in order (spec.md §4.7).
pub fn wholes(parts: &[Cursor]) -> Vec<Option<Cursor>> {
    parts.iter().map(whole).collect()
}

/// The parts directly registered under `whole` (the reverse direction of
/// `part_of`); a linear scan, since the index is expected to be small and
/// best-effort.
pub fn parts_of(whole: &Cursor) -> Vec<Cursor> {
    let mut log = whole_of().lock().expect("meronymy mutex poisoned");
    log.iterate()
        .into_iter()
        .filter(|(_, state)| state.as_value().map(|w| w.id()) == Some(whole.id()))
        .map(|(part, _)| part)
        .collect()
}

/// Saves `whole` and cascades the save transitively to every part
/// registered under it (spec.md §4.7, scenario S6).
pub fn save_with_parts(whole: &Cursor) -> CResult<()> {
    transaction::save(Some(std::slice::from_ref(whole)))?;
    for part in parts_of(whole) {
        save_with_parts(&part)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registering_same_whole_twice_is_fine() {
        let whole = Cursor::new();
        let part = Cursor::new();
        part_of(&whole, &part).unwrap();
        part_of(&whole, &part).unwrap();
        assert_eq!(self::whole(&part), Some(whole));
    }

    #[test]
    fn registering_a_different_whole_fails() {
        let a = Cursor::new();
        let b = Cursor::new();
        let part = Cursor::new();
        part_of(&a, &part).unwrap();
        assert!(matches!(part_of(&b, &part), Err(Error::Meronymic(_))));
    }

    #[test]
    fn whole_collapses_a_transitive_chain_to_its_fixed_point() {
        let grandparent = Cursor::new();
        let parent = Cursor::new();
        let child = Cursor::new();
        part_of(&grandparent, &parent).unwrap();
        part_of(&parent, &child).unwrap();
        assert_eq!(whole(&child), Some(grandparent));
    }

    #[test]
    fn wholes_maps_each_part_independently() {
        let whole_a = Cursor::new();
        let whole_b = Cursor::new();
        let part_a = Cursor::new();
        let part_b = Cursor::new();
        let unregistered = Cursor::new();
        part_of(&whole_a, &part_a).unwrap();
        part_of(&whole_b, &part_b).unwrap();
        assert_eq!(
            wholes(&[part_a, part_b, unregistered]),
            vec![Some(whole_a), Some(whole_b), None],
        );
    }

    #[test]
    fn parts_of_finds_registered_parts() {
        let whole = Cursor::new();
        let part_a = Cursor::new();
        let part_b = Cursor::new();
        part_of(&whole, &part_a).unwrap();
        part_of(&whole, &part_b).unwrap();
        let mut parts = parts_of(&whole);
        parts.sort_by_key(|c| c.id());
        let mut expected = vec![part_a, part_b];
        expected.sort_by_key(|c| c.id());
        assert_eq!(parts, expected);
    }
}
