//! Shared deterministic types for forge core logic.
//!
//! These types define stable contracts between the dispatcher, the agents and
//! the orchestrators. They do not depend on external state or I/O.

use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::Serialize;

/// Token counts reported for one or more generation calls.
///
/// The total is always derived from the two parts; there is no way to build a
/// usage value with an inconsistent total.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    input_tokens: u64,
    output_tokens: u64,
    total_tokens: u64,
}

impl TokenUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    pub fn input_tokens(&self) -> u64 {
        self.input_tokens
    }

    pub fn output_tokens(&self) -> u64 {
        self.output_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}

impl Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: TokenUsage) -> TokenUsage {
        TokenUsage::new(
            self.input_tokens + rhs.input_tokens,
            self.output_tokens + rhs.output_tokens,
        )
    }
}

impl AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: TokenUsage) {
        *self = *self + rhs;
    }
}

impl Sum for TokenUsage {
    fn sum<I: Iterator<Item = TokenUsage>>(iter: I) -> Self {
        iter.fold(TokenUsage::default(), Add::add)
    }
}

/// Normalized reply of one generation call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenerationResult {
    pub text: String,
    pub usage: TokenUsage,
}

/// A decoded agent output together with the tokens spent producing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generated<T> {
    pub value: T,
    pub usage: TokenUsage,
}

impl<T> Generated<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Generated<U> {
        Generated {
            value: f(self.value),
            usage: self.usage,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_is_always_the_sum_of_parts() {
        let usage = TokenUsage::new(120, 30);
        assert_eq!(usage.total_tokens(), 150);

        let summed: TokenUsage = [TokenUsage::new(1, 2), TokenUsage::new(10, 20)]
            .into_iter()
            .sum();
        assert_eq!(summed, TokenUsage::new(11, 22));
        assert_eq!(
            summed.total_tokens(),
            summed.input_tokens() + summed.output_tokens()
        );
    }
}
