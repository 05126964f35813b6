//! Accumulators for collapsing a patient's rows into one.
//!
//! Missing values are skipped. An accumulator that saw no values gives `None`.

/// Something that can be fed values one at a time.
pub trait Fold<T>: Default {
    type Output;

    fn push(&mut self, value: Option<T>);

    fn finish(self) -> Self::Output;

    fn fold(values: impl IntoIterator<Item = Option<T>>) -> Self::Output {
        let mut this = Self::default();
        for value in values {
            this.push(value);
        }
        this.finish()
    }
}

/// Smallest value seen.
#[derive(Debug, Clone, Copy)]
pub struct Min<T>(Option<T>);

impl<T> Default for Min<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: Ord> Fold<T> for Min<T> {
    type Output = Option<T>;

    fn push(&mut self, value: Option<T>) {
        self.0 = match (self.0.take(), value) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
    }

    fn finish(self) -> Option<T> {
        self.0
    }
}

/// Largest value seen.
#[derive(Debug, Clone, Copy)]
pub struct Max<T>(Option<T>);

impl<T> Default for Max<T> {
    fn default() -> Self {
        Self(None)
    }
}

impl<T: Ord> Fold<T> for Max<T> {
    type Output = Option<T>;

    fn push(&mut self, value: Option<T>) {
        self.0 = match (self.0.take(), value) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    fn finish(self) -> Option<T> {
        self.0
    }
}

/// Sum of flags, capped at 1. Always present: no flags sum to 0.
#[derive(Debug, Clone, Copy, Default)]
pub struct CappedSum(u64);

impl Fold<u8> for CappedSum {
    type Output = u8;

    fn push(&mut self, value: Option<u8>) {
        self.0 += u64::from(value.unwrap_or(0));
    }

    fn finish(self) -> u8 {
        u8::from(self.0 > 0)
    }
}
