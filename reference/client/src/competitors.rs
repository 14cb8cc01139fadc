//! Ordering of the tokens contending for one lock.

use turnstile_common::LockName;

/// Where a token stands in its competitor set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rank {
    /// Smallest token: the lock is held.
    First,
    /// Queued; `predecessor` is the token immediately ahead and `position`
    /// the number of tokens ahead.
    Behind { predecessor: String, position: usize },
}

/// Snapshot of every token under the root for one lock name, sorted by full
/// node name. Fixed-width sequence suffixes make that numeric order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompetitorSet {
    tokens: Vec<String>,
}

impl CompetitorSet {
    /// Build from a children listing; tokens of other locks are dropped.
    pub fn from_children<I>(children: I, name: &LockName, separator: &str) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        let mut tokens: Vec<String> = children
            .into_iter()
            .filter(|child| name.owns(child, separator))
            .collect();
        tokens.sort();
        Self { tokens }
    }

    /// Number of contenders.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Check if nobody contends.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Current holder.
    pub fn first(&self) -> Option<&str> {
        self.tokens.first().map(String::as_str)
    }

    /// Tokens in acquisition order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    /// Rank of `node_name`, located by binary search. `None` if absent.
    pub fn rank_of(&self, node_name: &str) -> Option<Rank> {
        let index = self
            .tokens
            .binary_search_by(|t| t.as_str().cmp(node_name))
            .ok()?;

        if index == 0 {
            return Some(Rank::First);
        }

        Some(Rank::Behind {
            predecessor: self.tokens[index - 1].clone(),
            position: index,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use turnstile_common::format_sequence;

    const SEP: &str = "_lock_";

    fn name(raw: &str) -> LockName {
        LockName::new(raw, SEP).unwrap()
    }

    fn token(lock: &str, seq: u64) -> String {
        format!("{}{}{}", lock, SEP, format_sequence(seq))
    }

    #[test]
    fn test_filters_other_locks() {
        let children = vec![
            token("res", 3),
            token("other", 1),
            token("res2", 2),
            token("res", 1),
            "unrelated".to_string(),
        ];
        let set = CompetitorSet::from_children(children, &name("res"), SEP);

        assert_eq!(set.len(), 2);
        assert_eq!(set.first(), Some(token("res", 1).as_str()));
    }

    #[test]
    fn test_rank_of() {
        let children = vec![token("res", 7), token("res", 2), token("res", 5)];
        let set = CompetitorSet::from_children(children, &name("res"), SEP);

        assert_eq!(set.rank_of(&token("res", 2)), Some(Rank::First));
        assert_eq!(
            set.rank_of(&token("res", 7)),
            Some(Rank::Behind {
                predecessor: token("res", 5),
                position: 2,
            })
        );
        assert_eq!(set.rank_of(&token("res", 3)), None);
    }

    #[test]
    fn test_empty_set() {
        let set = CompetitorSet::from_children(Vec::new(), &name("res"), SEP);
        assert!(set.is_empty());
        assert_eq!(set.first(), None);
        assert_eq!(set.rank_of(&token("res", 1)), None);
    }

    proptest! {
        #[test]
        fn order_follows_sequence(unique in proptest::collection::hash_set(0u64..10_000_000_000, 1..50)) {
            let mut seqs: Vec<u64> = unique.into_iter().collect();
            let children: Vec<String> = seqs.iter().map(|s| token("res", *s)).collect();
            let set = CompetitorSet::from_children(children, &name("res"), SEP);

            seqs.sort_unstable();
            let expected: Vec<String> = seqs.iter().map(|s| token("res", *s)).collect();
            prop_assert_eq!(set.iter().map(str::to_string).collect::<Vec<_>>(), expected.clone());

            for (i, node) in expected.iter().enumerate() {
                let rank = set.rank_of(node).unwrap();
                if i == 0 {
                    prop_assert_eq!(rank, Rank::First);
                } else {
                    prop_assert_eq!(rank, Rank::Behind { predecessor: expected[i - 1].clone(), position: i });
                }
            }
        }
    }
}
