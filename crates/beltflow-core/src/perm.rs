//! Distinct permutations of a multiset.
//!
//! The exhaustive plan search walks every distinct ordering of the targets
//! and sources. [`MultisetPermutations`] produces each ordering exactly once
//! by selection without replacement over symbol counts, holding its own
//! explicit stack so the consumer can stop between any two orderings.

/// Number of distinct permutations: `n! / (k1! * k2! * ... * km!)`.
///
/// Computed as a product of binomials so intermediate values stay small.
/// Saturates at `u128::MAX`.
pub fn count_multiset_permutations<T: PartialEq>(items: &[T]) -> u128 {
    let (_, counts) = tally(items);
    let mut placed: u128 = 0;
    let mut total: u128 = 1;
    for count in counts {
        for k in 1..=count as u128 {
            placed += 1;
            // total *= C(placed, k) incrementally: total * placed / k stays exact.
            total = match total.checked_mul(placed) {
                Some(v) => v / k,
                None => return u128::MAX,
            };
        }
    }
    total
}

/// Distinct symbols in first-appearance order, with their multiplicities.
fn tally<T: PartialEq>(items: &[T]) -> (Vec<&T>, Vec<usize>) {
    let mut symbols: Vec<&T> = Vec::new();
    let mut counts: Vec<usize> = Vec::new();
    for item in items {
        match symbols.iter().position(|s| *s == item) {
            Some(i) => counts[i] += 1,
            None => {
                symbols.push(item);
                counts.push(1);
            }
        }
    }
    (symbols, counts)
}

/// Iterator over the distinct permutations of a multiset.
///
/// Finite and single-pass; restart by constructing a new one.
#[derive(Debug, Clone)]
pub struct MultisetPermutations<T> {
    symbols: Vec<T>,
    /// Remaining (unplaced) copies of each symbol.
    counts: Vec<usize>,
    len: usize,
    /// Symbol indices chosen so far.
    prefix: Vec<usize>,
    /// Next symbol index to try at each depth.
    cursor: Vec<usize>,
    exhausted: bool,
}

impl<T: Clone + PartialEq> MultisetPermutations<T> {
    pub fn new(items: &[T]) -> Self {
        let (symbols, counts) = tally(items);
        Self {
            symbols: symbols.into_iter().cloned().collect(),
            counts,
            len: items.len(),
            prefix: Vec::with_capacity(items.len()),
            cursor: vec![0; items.len() + 1],
            exhausted: false,
        }
    }

    fn emit(&self) -> Vec<T> {
        self.prefix.iter().map(|&i| self.symbols[i].clone()).collect()
    }
}

impl<T: Clone + PartialEq> Iterator for MultisetPermutations<T> {
    type Item = Vec<T>;

    fn next(&mut self) -> Option<Vec<T>> {
        if self.exhausted {
            return None;
        }
        if self.len == 0 {
            self.exhausted = true;
            return Some(Vec::new());
        }

        loop {
            let depth = self.prefix.len();
            if depth == self.len {
                let out = self.emit();
                if let Some(last) = self.prefix.pop() {
                    self.counts[last] += 1;
                }
                return Some(out);
            }

            let start = self.cursor[depth];
            match (start..self.symbols.len()).find(|&i| self.counts[i] > 0) {
                Some(i) => {
                    self.counts[i] -= 1;
                    self.prefix.push(i);
                    self.cursor[depth] = i + 1;
                    self.cursor[depth + 1] = 0;
                }
                None => {
                    self.cursor[depth] = 0;
                    match self.prefix.pop() {
                        Some(last) => self.counts[last] += 1,
                        None => {
                            self.exhausted = true;
                            return None;
                        }
                    }
                }
            }
        }
    }
}
