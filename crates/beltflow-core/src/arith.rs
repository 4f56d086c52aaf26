//! Integer arithmetic behind the splitting strategies.
//!
//! [`normalize_ratio`] turns arbitrary rational quantities into the minimal
//! integer ratio the graph is built from. [`FactorCache`] owns the memoized
//! primes and smooth numbers for one planning session; it is plain state,
//! dropped together with the [`Balancer`](crate::balancer::Balancer) that
//! holds it.

use crate::ratio::{Ratio, gcd, lcm};
use std::collections::HashMap;

/// Order in which prime factors are listed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FactorOrder {
    #[default]
    Ascending,
    Descending,
}

// ---------------------------------------------------------------------------
// Ratio normalization
// ---------------------------------------------------------------------------

/// Rescale `values` to the smallest integers with the same ratio.
///
/// All values are brought to their least common denominator, then divided
/// through by the greatest common factor of the resulting numerators. The
/// output is coprime as a set. Totals are not checked here.
///
/// `[15, 30, 60] -> [1, 2, 4]`, `[0.5, 1, 1.5, 3] -> [1, 2, 3, 6]`.
///
/// Values must be positive. Returns `None` when the common denominator or a
/// rescaled value does not fit an `i128`. Results too large for a `u64`
/// saturate, which callers reject through their output limit.
pub fn normalize_ratio(values: &[Ratio]) -> Option<Vec<u64>> {
    assert!(
        values.iter().all(Ratio::is_positive),
        "normalize_ratio requires positive values"
    );
    if values.is_empty() {
        return Some(Vec::new());
    }

    let lcd = values
        .iter()
        .try_fold(1i128, |acc, v| lcm(acc, v.denom()))?;
    let scaled = values
        .iter()
        .map(|v| v.numer().checked_mul(lcd / v.denom()))
        .collect::<Option<Vec<i128>>>()?;
    let gcf = scaled.iter().fold(0i128, |acc, &n| gcd(acc, n));

    Some(
        scaled
            .into_iter()
            .map(|n| u64::try_from(n / gcf).unwrap_or(u64::MAX))
            .collect(),
    )
}

// ---------------------------------------------------------------------------
// FactorCache
// ---------------------------------------------------------------------------

/// Memoized primes and smooth numbers.
#[derive(Debug, Clone)]
pub struct FactorCache {
    /// Every prime up to `sieved_to`, ascending.
    primes: Vec<u64>,
    sieved_to: u64,
    /// Per largest-factor bound: every smooth number found so far, ascending.
    smooth: HashMap<u64, Vec<u64>>,
}

impl Default for FactorCache {
    fn default() -> Self {
        Self::new()
    }
}

impl FactorCache {
    pub fn new() -> Self {
        Self {
            primes: vec![2],
            sieved_to: 2,
            smooth: HashMap::new(),
        }
    }

    /// Extend the prime list to cover every prime `<= limit`.
    fn extend_primes(&mut self, limit: u64) {
        let mut n = self.sieved_to + 1;
        while n <= limit {
            let is_prime = self
                .primes
                .iter()
                .take_while(|&&p| p * p <= n)
                .all(|&p| n % p != 0);
            if is_prime {
                self.primes.push(n);
            }
            n += 1;
        }
        self.sieved_to = self.sieved_to.max(limit);
    }

    /// All primes `<= limit`.
    pub fn primes_up_to(&mut self, limit: u64) -> &[u64] {
        self.extend_primes(limit);
        let end = self.primes.partition_point(|&p| p <= limit);
        &self.primes[..end]
    }

    /// Prime factorization with multiplicity. `1` (and `0`) factor to `[]`.
    pub fn prime_factors(&mut self, n: u64, order: FactorOrder) -> Vec<u64> {
        let mut factors = Vec::new();
        if n < 2 {
            return factors;
        }
        let mut rest = n;
        let mut candidate = 0usize;
        loop {
            let bound = isqrt(rest);
            self.extend_primes(bound.max(2));
            let Some(&p) = self.primes.get(candidate) else {
                break;
            };
            if p > bound {
                break;
            }
            if rest % p == 0 {
                factors.push(p);
                rest /= p;
            } else {
                candidate += 1;
            }
        }
        if rest > 1 {
            factors.push(rest);
        }
        if order == FactorOrder::Descending {
            factors.reverse();
        }
        factors
    }

    /// Smallest factor of `n` in `2..=max`, if any.
    pub fn smallest_factor_within(n: u64, max: u64) -> Option<u64> {
        (2..=max).find(|s| n % s == 0)
    }

    /// Smallest integer `>= start` whose prime factors are all `<= largest_factor`.
    pub fn next_smooth(&mut self, start: u64, largest_factor: u64) -> u64 {
        assert!(largest_factor >= 2, "largest_factor must be at least 2");
        let mut found = self.smooth.remove(&largest_factor).unwrap_or_else(|| vec![2]);

        let result = match found.iter().find(|&&n| n >= start) {
            Some(&n) => n,
            None => {
                let mut n = found.last().copied().unwrap_or(2);
                loop {
                    n += 1;
                    let smooth = self
                        .prime_factors(n, FactorOrder::Ascending)
                        .iter()
                        .all(|&p| p <= largest_factor);
                    if smooth {
                        found.push(n);
                        if n >= start {
                            break n;
                        }
                    }
                }
            }
        };

        self.smooth.insert(largest_factor, found);
        result
    }
}

fn isqrt(n: u64) -> u64 {
    let mut r = (n as f64).sqrt() as u64;
    while r * r > n {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= n {
        r += 1;
    }
    r
}
