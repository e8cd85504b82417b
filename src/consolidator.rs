//! Pure transformation from a bag of raw filesystem notifications to the
//! minimal, non-redundant canonical event list described in the design
//! notes: directory-modify noise is dropped, subtrees absorbed into a
//! single ancestor move/delete, create/delete pairs at one path folded,
//! and move chains (including the editor save-through-temp-file shuffle)
//! collapsed to their net effect.
//!
//! The consolidator never performs I/O and never fails on well-formed
//! input; malformed `RawEvent`s (a `Moved` missing its destination, or a
//! `dest_path` on a non-`Moved` kind) are rejected by `push` at the
//! boundary, per spec.md §4.1's failure model.

use std::collections::HashSet;

use crate::error::ConsolidatorError;
use crate::model::{CanonicalEvent, RawEvent, RawEventKind};

/// A `RawEvent` tagged with the order it arrived in this batch. The
/// arrival index doubles as a cheap "happened-before" clock for
/// disambiguating move chains that reuse a path (the editor
/// create-tmp/rename/rename-back/delete-tmp shuffle).
#[derive(Debug, Clone)]
struct Indexed {
    idx: usize,
    event: RawEvent,
}

/// Accepts `RawEvent`s one at a time and, on demand, materializes the
/// minimal canonical event list. Construction is cheap; a fresh
/// `Consolidator` is meant to be built per quiescence-window batch (see
/// `watcher.rs`).
#[derive(Debug, Default)]
pub struct Consolidator {
    pushed: Vec<RawEvent>,
}

impl Consolidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record a raw event. Rejects the preconditions
    /// `spec.md` §3 requires of `RawEvent`: a `Moved` event must carry a
    /// `dest_path` whose `is_directory` matches the source, and no other
    /// kind may carry one.
    pub fn push(&mut self, event: RawEvent) -> Result<(), ConsolidatorError> {
        validate(&event)?;
        self.pushed.push(event);
        Ok(())
    }

    /// The current canonical event list: the shortest sequence that,
    /// applied to the pre-batch state, produces the same post-batch state
    /// as the raw events pushed so far, ordered per §4.1 item 5.
    pub fn events(&self) -> Vec<CanonicalEvent> {
        resolve(&self.pushed)
    }

    pub fn is_empty(&self) -> bool {
        self.pushed.is_empty()
    }
}

fn validate(event: &RawEvent) -> Result<(), ConsolidatorError> {
    match event.kind {
        RawEventKind::Moved => {
            let dest = event
                .dest_path
                .as_ref()
                .ok_or_else(|| ConsolidatorError::MissingDestPath(event.path.clone()))?;
            if dest.is_directory() != event.path.is_directory() {
                return Err(ConsolidatorError::MovedKindMismatch {
                    src: event.path.clone(),
                    dest: dest.clone(),
                });
            }
        }
        RawEventKind::Created | RawEventKind::Modified | RawEventKind::Deleted => {
            if event.dest_path.is_some() {
                return Err(ConsolidatorError::UnexpectedDestPath(event.path.clone()));
            }
        }
    }
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Direction {
    Forward,
    Backward,
}

/// Walk the surviving move list from `start` (owned by event `start_idx`),
/// following exact-path hops or ancestor (directory) rebases, enforcing a
/// strictly monotonic arrival-order bound so a later reuse of a path name
/// is never mistaken for an earlier link in the same chain (the crossing
/// graph the editor temp-file pattern produces, see `tests::editor_temp_file_*`).
///
/// Forward resolution (creates, modifies) requires each hop's index to be
/// greater than the previous one; backward resolution (deletes) requires
/// each hop's index to be less than the previous one.
///
/// Returns the resolved path, the move indices consumed along the way,
/// and the index of the last hop (or `start_idx` if the chain was empty) —
/// the latter used to splice a rebased Modify immediately after its move.
fn resolve_chain(
    start: &crate::model::SyncPath,
    start_idx: usize,
    moves: &[Indexed],
    dir: Direction,
) -> (crate::model::SyncPath, Vec<usize>, usize) {
    let mut current = start.clone();
    let mut used = Vec::new();
    let mut bound = start_idx as i64;

    loop {
        let hop = moves.iter().find(|m| {
            let (from, _to) = endpoints(m, dir);
            let idx_ok = match dir {
                Direction::Forward => (m.idx as i64) > bound,
                Direction::Backward => (m.idx as i64) < bound,
            };
            idx_ok && (*from == current || current.is_proper_descendant_of(from))
        });

        match hop {
            Some(m) => {
                let (from, to) = endpoints(m, dir);
                current = if *from == current {
                    to.clone()
                } else {
                    current.rebase(from, to)
                };
                used.push(m.idx);
                bound = m.idx as i64;
            }
            None => break,
        }
    }

    let last_hop = used.last().copied().unwrap_or(start_idx);
    (current, used, last_hop)
}

/// The (from, to) endpoints of a move, oriented for the resolution direction.
fn endpoints(m: &Indexed, dir: Direction) -> (&crate::model::SyncPath, &crate::model::SyncPath) {
    let dest = m
        .event
        .dest_path
        .as_ref()
        .expect("Moved event without dest_path should have been rejected by validate()");
    match dir {
        Direction::Forward => (&m.event.path, dest),
        Direction::Backward => (dest, &m.event.path),
    }
}

/// A directory `Delete(P)` wipes everything below it; any other event
/// (of any kind) whose path — and, for a `Moved` event, whose destination
/// too — lies under `P` is moot and dropped. Processed shallowest-first
/// so a parent's engulfment removes a nested directory delete before it
/// is itself considered as an engulfing candidate.
fn engulf_directory_deletes(events: &[Indexed], removed: &mut HashSet<usize>) {
    let mut candidates: Vec<usize> = events
        .iter()
        .filter(|it| it.event.kind == RawEventKind::Deleted && it.event.is_directory())
        .map(|it| it.idx)
        .collect();
    candidates.sort_by_key(|idx| find(events, *idx).event.path.depth());

    for p_idx in candidates {
        if removed.contains(&p_idx) {
            continue;
        }
        let p_path = find(events, p_idx).event.path.clone();

        // If the directory is recreated later in the batch (a fresh Created
        // or a Moved-in landing exactly at `p_path`), engulfment stops
        // there: anything arriving after the recreate belongs to the new
        // directory, not the one that got deleted.
        let recreated_at = events
            .iter()
            .filter(|it| it.idx > p_idx && it.event.path == p_path)
            .filter(|it| match it.event.kind {
                RawEventKind::Created => true,
                RawEventKind::Moved => it.event.dest_path.as_ref() == Some(&p_path),
                _ => false,
            })
            .map(|it| it.idx)
            .min();

        for it in events {
            if it.idx == p_idx || removed.contains(&it.idx) {
                continue;
            }
            if !it.event.path.is_proper_descendant_of(&p_path) {
                continue;
            }
            if recreated_at.is_some_and(|r| it.idx > r) {
                continue;
            }
            let drop = match it.event.kind {
                RawEventKind::Moved => it
                    .event
                    .dest_path
                    .as_ref()
                    .is_some_and(|d| d.is_proper_descendant_of(&p_path)),
                _ => true,
            };
            if drop {
                removed.insert(it.idx);
            }
        }
    }
}

/// A directory `Move(P -> Q)` absorbs any descendant `Moved` event (file
/// or directory) whose destination is the corresponding path under `Q`.
/// Processed shallowest-first, mirroring `engulf_directory_deletes`.
fn subsume_directory_moves(events: &[Indexed], removed: &mut HashSet<usize>) {
    let mut candidates: Vec<usize> = events
        .iter()
        .filter(|it| {
            !removed.contains(&it.idx)
                && it.event.kind == RawEventKind::Moved
                && it.event.is_directory()
        })
        .map(|it| it.idx)
        .collect();
    candidates.sort_by_key(|idx| find(events, *idx).event.path.depth());

    for p_idx in candidates {
        if removed.contains(&p_idx) {
            continue;
        }
        let p_src = find(events, p_idx).event.path.clone();
        let p_dest = find(events, p_idx)
            .event
            .dest_path
            .clone()
            .expect("directory Moved event always carries dest_path");

        for it in events {
            if it.idx == p_idx || removed.contains(&it.idx) {
                continue;
            }
            if it.event.kind != RawEventKind::Moved {
                continue;
            }
            if !it.event.path.is_proper_descendant_of(&p_src) {
                continue;
            }
            let expected_dest = it.event.path.rebase(&p_src, &p_dest);
            if it.event.dest_path.as_ref() == Some(&expected_dest) {
                removed.insert(it.idx);
            }
        }
    }
}

fn find(events: &[Indexed], idx: usize) -> &Indexed {
    events
        .iter()
        .find(|it| it.idx == idx)
        .expect("idx must reference a live event")
}

fn resolve(pushed: &[RawEvent]) -> Vec<CanonicalEvent> {
    let all: Vec<Indexed> = pushed
        .iter()
        .cloned()
        .enumerate()
        .filter(|(_, e)| !(e.kind == RawEventKind::Modified && e.is_directory()))
        .map(|(idx, event)| Indexed { idx, event })
        .collect();

    let mut removed: HashSet<usize> = HashSet::new();
    engulf_directory_deletes(&all, &mut removed);
    subsume_directory_moves(&all, &mut removed);

    let live: Vec<Indexed> = all.into_iter().filter(|it| !removed.contains(&it.idx)).collect();

    let mut creates: Vec<Indexed> = Vec::new();
    let mut deletes: Vec<Indexed> = Vec::new();
    let mut moves: Vec<Indexed> = Vec::new();
    let mut modifies: Vec<Indexed> = Vec::new();
    for it in live {
        match it.event.kind {
            RawEventKind::Created => creates.push(it),
            RawEventKind::Deleted => deletes.push(it),
            RawEventKind::Moved => moves.push(it),
            RawEventKind::Modified => modifies.push(it),
        }
    }

    let mut cancelled_creates: HashSet<usize> = HashSet::new();
    let mut cancelled_deletes: HashSet<usize> = HashSet::new();
    let mut consumed_moves: HashSet<usize> = HashSet::new();
    let mut relocated_creates: std::collections::HashMap<usize, crate::model::SyncPath> =
        std::collections::HashMap::new();
    let mut relocated_deletes: std::collections::HashMap<usize, crate::model::SyncPath> =
        std::collections::HashMap::new();

    // Resolve deletes backward through the move chain first: a delete at
    // the end of a chain that started at a path this batch also created
    // cancels the whole chain (the object never existed before the batch
    // and doesn't after); otherwise the delete relocates to the object's
    // original path.
    for d in &deletes {
        let (origin, used, removal_time) =
            resolve_chain(&d.event.path, d.idx, &moves, Direction::Backward);
        consumed_moves.extend(&used);

        if let Some(c) = creates
            .iter()
            .find(|c| c.event.path == origin && !cancelled_creates.contains(&c.idx))
        {
            if (c.idx as i64) < removal_time as i64 {
                cancelled_creates.insert(c.idx);
                cancelled_deletes.insert(d.idx);
            } else {
                // Delete(P) then Create(P): content reset, Create wins.
                cancelled_deletes.insert(d.idx);
            }
        } else if origin != d.event.path {
            relocated_deletes.insert(d.idx, origin);
        }
    }

    // Resolve remaining creates forward through the move chain: a create
    // later renamed collapses to a single Create at the final name.
    for c in &creates {
        if cancelled_creates.contains(&c.idx) {
            continue;
        }
        let (final_path, used, _) = resolve_chain(&c.event.path, c.idx, &moves, Direction::Forward);
        consumed_moves.extend(&used);
        if final_path != c.event.path {
            relocated_creates.insert(c.idx, final_path);
        }
    }

    // A create and a delete that land on the same final path via
    // disjoint chains (the save-through-temp-file shuffle: the old
    // file's content is moved aside and deleted while new content is
    // moved into the vacated name) describe a content reset; the create
    // wins and the delete is dropped.
    for d in &deletes {
        if cancelled_deletes.contains(&d.idx) {
            continue;
        }
        let d_path = relocated_deletes
            .get(&d.idx)
            .cloned()
            .unwrap_or_else(|| d.event.path.clone());
        let collides = creates.iter().any(|c| {
            if cancelled_creates.contains(&c.idx) {
                return false;
            }
            let c_path = relocated_creates
                .get(&c.idx)
                .cloned()
                .unwrap_or_else(|| c.event.path.clone());
            c_path == d_path
        });
        if collides {
            cancelled_deletes.insert(d.idx);
        }
    }

    // Resolve modifies forward; drop one whose target ends up created
    // (content superseded) or deleted (content gone), otherwise rebase it
    // onto the final path and remember the move to splice it after.
    struct ModifyPlan {
        event: CanonicalEvent,
        after_move_idx: Option<usize>,
    }
    let mut modify_plans: Vec<ModifyPlan> = Vec::new();
    for m in &modifies {
        let (final_path, used, last_hop) =
            resolve_chain(&m.event.path, m.idx, &moves, Direction::Forward);

        let superseded_by_create = creates.iter().any(|c| {
            !cancelled_creates.contains(&c.idx)
                && relocated_creates
                    .get(&c.idx)
                    .cloned()
                    .unwrap_or_else(|| c.event.path.clone())
                    == final_path
        });
        if superseded_by_create {
            continue;
        }
        let deleted_after = deletes.iter().any(|d| {
            !cancelled_deletes.contains(&d.idx)
                && relocated_deletes
                    .get(&d.idx)
                    .cloned()
                    .unwrap_or_else(|| d.event.path.clone())
                    == final_path
        });
        if deleted_after {
            continue;
        }

        let mut event = m.event.clone();
        event.path = final_path;
        let after_move_idx = if used.is_empty() {
            None
        } else {
            Some(last_hop).filter(|idx| !consumed_moves.contains(idx))
        };
        modify_plans.push(ModifyPlan { event, after_move_idx });
    }

    // Assemble: moves (deepest-first by source depth) with any rebased
    // modify spliced right after its move, then deletes (deepest-first),
    // then creates (shallowest-first), then any modify left unattached.
    let mut out_moves: Vec<&Indexed> = moves
        .iter()
        .filter(|m| !consumed_moves.contains(&m.idx))
        .collect();
    out_moves.sort_by(|a, b| b.event.path.depth().cmp(&a.event.path.depth()).then(a.idx.cmp(&b.idx)));

    let mut out_deletes: Vec<CanonicalEvent> = deletes
        .iter()
        .filter(|d| !cancelled_deletes.contains(&d.idx))
        .map(|d| {
            let mut e = d.event.clone();
            if let Some(p) = relocated_deletes.get(&d.idx) {
                e.path = p.clone();
            }
            e
        })
        .collect();
    out_deletes.sort_by(|a, b| b.path.depth().cmp(&a.path.depth()));

    let mut out_creates: Vec<CanonicalEvent> = creates
        .iter()
        .filter(|c| !cancelled_creates.contains(&c.idx))
        .map(|c| {
            let mut e = c.event.clone();
            if let Some(p) = relocated_creates.get(&c.idx) {
                e.path = p.clone();
            }
            e
        })
        .collect();
    out_creates.sort_by(|a, b| a.path.depth().cmp(&b.path.depth()));

    modify_plans.sort_by(|a, b| a.event.path.depth().cmp(&b.event.path.depth()));

    let mut result: Vec<CanonicalEvent> = Vec::new();
    let mut spliced = vec![false; modify_plans.len()];
    for m in &out_moves {
        result.push(m.event.clone());
        for (i, plan) in modify_plans.iter().enumerate() {
            if !spliced[i] && plan.after_move_idx == Some(m.idx) {
                result.push(plan.event.clone());
                spliced[i] = true;
            }
        }
    }
    result.extend(out_deletes);
    result.extend(out_creates);
    for (i, plan) in modify_plans.into_iter().enumerate() {
        if !spliced[i] {
            result.push(plan.event);
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SyncPath;

    fn created(p: &str) -> RawEvent {
        RawEvent::created(SyncPath::parse(p))
    }
    fn modified(p: &str) -> RawEvent {
        RawEvent::modified(SyncPath::parse(p))
    }
    fn deleted(p: &str) -> RawEvent {
        RawEvent::deleted(SyncPath::parse(p))
    }
    fn moved(src: &str, dest: &str) -> RawEvent {
        RawEvent::moved(SyncPath::parse(src), SyncPath::parse(dest))
    }

    fn consolidate(events: Vec<RawEvent>) -> Vec<CanonicalEvent> {
        let mut c = Consolidator::new();
        for e in events {
            c.push(e).expect("well-formed event");
        }
        c.events()
    }

    // --- spec.md §8 concrete scenarios ---

    #[test]
    fn scenario_1_directory_modify_dropped() {
        assert_eq!(consolidate(vec![modified("/A/")]), vec![]);
    }

    #[test]
    fn scenario_2_directory_move_absorbs_child_move() {
        let out = consolidate(vec![
            moved("/parent/", "/george/"),
            moved("/parent/child/file", "/george/child/file"),
        ]);
        assert_eq!(out, vec![moved("/parent/", "/george/")]);
    }

    #[test]
    fn scenario_3_delete_then_create_resets() {
        let out = consolidate(vec![deleted("/file"), created("/file")]);
        assert_eq!(out, vec![created("/file")]);
    }

    #[test]
    fn scenario_4_create_then_delete_cancels() {
        let out = consolidate(vec![created("/file"), deleted("/file")]);
        assert_eq!(out, vec![]);
    }

    #[test]
    fn scenario_5_move_then_delete_dest_is_delete_source() {
        let out = consolidate(vec![moved("/file", "/other"), deleted("/other")]);
        assert_eq!(out, vec![deleted("/file")]);
    }

    #[test]
    fn scenario_6_editor_temp_file_collapses_to_create() {
        let out = consolidate(vec![
            created("/~WRL1.tmp"),
            modified("/~WRL1.tmp"),
            moved("/doc.docx", "/~WRL5.tmp"),
            moved("/~WRL1.tmp", "/doc.docx"),
            deleted("/~WRL5.tmp"),
        ]);
        assert_eq!(out, vec![created("/doc.docx")]);
    }

    #[test]
    fn scenario_7_move_then_modify_rebased_after_move() {
        let out = consolidate(vec![
            modified("/folder/donut"),
            moved("/folder/donut", "/test/donut"),
            moved("/folder/", "/test/"),
        ]);
        assert_eq!(
            out,
            vec![moved("/folder/", "/test/"), modified("/test/donut")]
        );
    }

    // --- additional cases from the original test suite ---

    #[test]
    fn directory_delete_subsumes_descendant_deletes() {
        let out = consolidate(vec![
            deleted("/parent/"),
            deleted("/parent/child/"),
            deleted("/parent/file.txt"),
            deleted("/parent/child/file.txt"),
            deleted("/parent/child/grandchild/"),
            deleted("/parent/child/grandchild/file.txt"),
        ]);
        assert_eq!(out, vec![deleted("/parent/")]);
    }

    #[test]
    fn sibling_creates_do_not_consolidate() {
        let out = consolidate(vec![created("/parent/"), created("/parent/file.txt")]);
        assert_eq!(out, vec![created("/parent/"), created("/parent/file.txt")]);
    }

    #[test]
    fn independent_file_moves_survive_deepest_first() {
        let out = consolidate(vec![
            moved("/parent/file.txt", "/george/file.txt"),
            moved("/parent/child/file.txt", "/george/child/file.txt"),
            moved(
                "/parent/child/grandchild/file.txt",
                "/george/child/grandchild/file.txt",
            ),
        ]);
        assert_eq!(
            out,
            vec![
                moved(
                    "/parent/child/grandchild/file.txt",
                    "/george/child/grandchild/file.txt"
                ),
                moved("/parent/child/file.txt", "/george/child/file.txt"),
                moved("/parent/file.txt", "/george/file.txt"),
            ]
        );
    }

    #[test]
    fn independent_file_deletes_survive_deepest_first() {
        let out = consolidate(vec![
            deleted("/parent/file.txt"),
            deleted("/parent/child/file.txt"),
            deleted("/parent/child/grandchild/file.txt"),
        ]);
        assert_eq!(
            out,
            vec![
                deleted("/parent/child/grandchild/file.txt"),
                deleted("/parent/child/file.txt"),
                deleted("/parent/file.txt"),
            ]
        );
    }

    #[test]
    fn create_move_delete_chain_cancels_entirely() {
        let out = consolidate(vec![
            created("/file.txt"),
            moved("/file.txt", "/other_file.txt"),
            deleted("/other_file.txt"),
        ]);
        assert_eq!(out, vec![]);
    }

    #[test]
    fn move_inside_doomed_directory_is_engulfed() {
        let out = consolidate(vec![
            moved("/folder1/file.txt", "/folder1/other_file.txt"),
            deleted("/folder1/"),
        ]);
        assert_eq!(out, vec![deleted("/folder1/")]);
    }

    #[test]
    fn create_then_delete_of_doomed_subtree_cancels() {
        let out = consolidate(vec![
            created("/folder/"),
            created("/folder/file.txt"),
            deleted("/folder/"),
        ]);
        assert_eq!(out, vec![]);
    }

    #[test]
    fn directory_recreated_after_delete_keeps_events_that_arrive_after_recreation() {
        // Delete(/parent/) then Create(/parent/) (recreated) then a new
        // child created inside the *recreated* directory. The child must
        // survive: it arrived after the directory came back, so it isn't
        // part of the subtree the delete wiped out.
        let out = consolidate(vec![
            deleted("/parent/"),
            created("/parent/"),
            created("/parent/file.txt"),
        ]);
        assert_eq!(out, vec![created("/parent/"), created("/parent/file.txt")]);
    }

    #[test]
    fn directory_recreated_after_delete_still_engulfs_events_before_recreation() {
        // The file created at idx 1 existed only inside the doomed
        // subtree before the directory came back at idx 2, so it's still
        // engulfed by the delete; only the post-recreation child survives.
        let out = consolidate(vec![
            deleted("/parent/"),
            created("/parent/old.txt"),
            created("/parent/"),
            created("/parent/new.txt"),
        ]);
        assert_eq!(out, vec![created("/parent/"), created("/parent/new.txt")]);
    }

    #[test]
    fn modify_of_child_then_modify_of_parent_keeps_only_child() {
        let out = consolidate(vec![modified("/parent/file.txt"), modified("/parent/")]);
        assert_eq!(out, vec![modified("/parent/file.txt")]);
    }

    #[test]
    fn create_then_move_collapses_to_create_at_dest() {
        let out = consolidate(vec![created("/file.txt"), moved("/file.txt", "/test.txt")]);
        assert_eq!(out, vec![created("/test.txt")]);
    }

    #[test]
    fn create_then_modify_same_path_collapses_to_create() {
        let out = consolidate(vec![created("/osfoffline.py"), modified("/osfoffline.py")]);
        assert_eq!(out, vec![created("/osfoffline.py")]);
    }

    #[test]
    fn unrelated_descendant_move_does_not_absorb_into_ancestor_move() {
        let out = consolidate(vec![
            moved("/folder/donut.txt", "/other_folder/bagel.txt"),
            moved("/folder/", "/test/"),
        ]);
        assert_eq!(
            out,
            vec![
                moved("/folder/donut.txt", "/other_folder/bagel.txt"),
                moved("/folder/", "/test/"),
            ]
        );
    }

    #[test]
    fn modify_then_move_rebased_and_reordered() {
        let out = consolidate(vec![modified("/donut.txt"), moved("/donut.txt", "/bagel.txt")]);
        assert_eq!(out, vec![moved("/donut.txt", "/bagel.txt"), modified("/bagel.txt")]);
    }

    // --- consolidator laws (spec.md §8) ---

    #[test]
    fn law_directory_modify_only_yields_empty() {
        let out = consolidate(vec![modified("/a/"), modified("/a/b/"), modified("/a/b/c/")]);
        assert!(out.is_empty());
    }

    #[test]
    fn law_idempotence() {
        let first = consolidate(vec![
            modified("/folder/donut"),
            moved("/folder/donut", "/test/donut"),
            moved("/folder/", "/test/"),
        ]);
        let mut c = Consolidator::new();
        for e in first.clone() {
            c.push(e).unwrap();
        }
        assert_eq!(c.events(), first);
    }

    #[test]
    fn law_cancellation_order_matters() {
        assert_eq!(consolidate(vec![created("/f"), deleted("/f")]), vec![]);
        assert_eq!(
            consolidate(vec![deleted("/f"), created("/f")]),
            vec![created("/f")]
        );
    }

    #[test]
    fn law_move_absorption_for_subtree() {
        let out = consolidate(vec![
            moved("/P/", "/Q/"),
            moved("/P/x", "/Q/x"),
        ]);
        assert_eq!(out, vec![moved("/P/", "/Q/")]);
    }

    // --- validation ---

    #[test]
    fn push_rejects_moved_without_dest() {
        let mut c = Consolidator::new();
        let mut e = moved("/a", "/b");
        e.dest_path = None;
        assert!(c.push(e).is_err());
    }

    #[test]
    fn push_rejects_moved_kind_mismatch() {
        let mut c = Consolidator::new();
        let e = RawEvent::moved(SyncPath::parse("/a"), SyncPath::parse("/b/"));
        assert!(c.push(e).is_err());
    }

    #[test]
    fn push_rejects_dest_path_on_non_moved() {
        let mut c = Consolidator::new();
        let mut e = created("/a");
        e.dest_path = Some(SyncPath::parse("/b"));
        assert!(c.push(e).is_err());
    }
}
