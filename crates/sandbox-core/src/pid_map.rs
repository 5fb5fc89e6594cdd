//! Bidirectional map between portal ("external") and namespace ("relative") pids

use std::collections::HashMap;

use nix::unistd::Pid;

/// A pid as reported by the portal service, relative to the host
pub type ExternalPid = u32;

/// A correlated pid pair
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PidPair {
    pub external: ExternalPid,
    pub relative: Pid,
}

impl PidPair {
    pub fn new(external: ExternalPid, relative: Pid) -> Self {
        Self { external, relative }
    }
}

/// Unique mapping in both directions. Both inner maps always hold the same
/// set of pairs.
#[derive(Debug, Default)]
pub struct PidMap {
    by_external: HashMap<ExternalPid, Pid>,
    by_relative: HashMap<Pid, ExternalPid>,
}

impl PidMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a pair. Fails without mutation if either side is already mapped.
    pub fn insert(&mut self, pair: PidPair) -> bool {
        if self.by_external.contains_key(&pair.external)
            || self.by_relative.contains_key(&pair.relative)
        {
            return false;
        }

        self.by_external.insert(pair.external, pair.relative);
        self.by_relative.insert(pair.relative, pair.external);
        true
    }

    pub fn find_relative_by_external(&self, external: ExternalPid) -> Option<Pid> {
        self.by_external.get(&external).copied()
    }

    pub fn find_external_by_relative(&self, relative: Pid) -> Option<ExternalPid> {
        self.by_relative.get(&relative).copied()
    }

    /// Remove the pair keyed by `external`, returning its relative side
    pub fn delete_by_external(&mut self, external: ExternalPid) -> Option<Pid> {
        let relative = self.by_external.remove(&external)?;
        self.by_relative.remove(&relative);
        Some(relative)
    }

    /// Remove the pair keyed by `relative`, returning its external side
    pub fn delete_by_relative(&mut self, relative: Pid) -> Option<ExternalPid> {
        let external = self.by_relative.remove(&relative)?;
        self.by_external.remove(&external);
        Some(external)
    }

    pub fn len(&self) -> usize {
        self.by_external.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_external.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn pair(external: u32, relative: i32) -> PidPair {
        PidPair::new(external, Pid::from_raw(relative))
    }

    #[test]
    fn insert_and_lookup_both_directions() {
        let mut map = PidMap::new();
        assert!(map.insert(pair(100, 55)));

        assert_eq!(map.find_relative_by_external(100), Some(Pid::from_raw(55)));
        assert_eq!(map.find_external_by_relative(Pid::from_raw(55)), Some(100));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn insert_rejects_duplicate_external() {
        let mut map = PidMap::new();
        assert!(map.insert(pair(100, 55)));
        assert!(!map.insert(pair(100, 56)));

        assert_eq!(map.find_relative_by_external(100), Some(Pid::from_raw(55)));
        assert_eq!(map.find_external_by_relative(Pid::from_raw(56)), None);
    }

    #[test]
    fn insert_rejects_duplicate_relative() {
        let mut map = PidMap::new();
        assert!(map.insert(pair(100, 55)));
        assert!(!map.insert(pair(101, 55)));

        assert_eq!(map.find_relative_by_external(101), None);
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn delete_by_external_clears_both_sides() {
        let mut map = PidMap::new();
        map.insert(pair(100, 55));

        assert_eq!(map.delete_by_external(100), Some(Pid::from_raw(55)));
        assert_eq!(map.find_external_by_relative(Pid::from_raw(55)), None);
        assert!(map.is_empty());
        assert_eq!(map.delete_by_external(100), None);
    }

    #[test]
    fn delete_by_relative_clears_both_sides() {
        let mut map = PidMap::new();
        map.insert(pair(100, 55));

        assert_eq!(map.delete_by_relative(Pid::from_raw(55)), Some(100));
        assert_eq!(map.find_relative_by_external(100), None);
        assert_eq!(map.delete_by_relative(Pid::from_raw(55)), None);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Insert(u32, i32),
        DeleteExternal(u32),
        DeleteRelative(i32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        // Small key space so collisions actually happen
        prop_oneof![
            (1u32..8, 1i32..8).prop_map(|(e, r)| Op::Insert(e, r)),
            (1u32..8).prop_map(Op::DeleteExternal),
            (1i32..8).prop_map(Op::DeleteRelative),
        ]
    }

    proptest! {
        #[test]
        fn stays_a_bijection(ops in proptest::collection::vec(op_strategy(), 0..64)) {
            let mut map = PidMap::new();

            for op in ops {
                match op {
                    Op::Insert(e, r) => {
                        let taken = map.find_relative_by_external(e).is_some()
                            || map.find_external_by_relative(Pid::from_raw(r)).is_some();
                        prop_assert_eq!(map.insert(pair(e, r)), !taken);
                    }
                    Op::DeleteExternal(e) => {
                        map.delete_by_external(e);
                    }
                    Op::DeleteRelative(r) => {
                        map.delete_by_relative(Pid::from_raw(r));
                    }
                }

                prop_assert_eq!(map.by_external.len(), map.by_relative.len());
                for (external, relative) in &map.by_external {
                    prop_assert_eq!(map.by_relative.get(relative), Some(external));
                }
            }
        }
    }
}
