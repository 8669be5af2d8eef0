//! Lazy pull-based document stream
//!
//! Every pipeline stage consumes one `Lazy` and produces another. Nothing is
//! evaluated until the consumer pulls, and each element passes through the
//! composed combinators exactly once unless `transform` or a terminal method
//! forces materialization. Errors travel with the elements, so a failing map
//! or transform surfaces on the pull that triggered it.

use crate::error::{EngineError, Result};
use crate::value::Value;

/// Boxed fallible element source
pub type Source = Box<dyn Iterator<Item = Result<Value>>>;

/// Single-pass, composable stream of values
pub struct Lazy {
    source: Source,
    buffer: Option<Vec<Value>>,
    /// Error that stopped materialization, and whether a pull has yielded it
    failure: Option<(EngineError, bool)>,
}

impl Lazy {
    /// Wrap any iterable of values
    pub fn new<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Value>,
        I::IntoIter: 'static,
    {
        Self::from_results(items.into_iter().map(Ok))
    }

    /// Wrap an iterator that may yield errors
    pub fn from_results<I>(items: I) -> Self
    where
        I: IntoIterator<Item = Result<Value>>,
        I::IntoIter: 'static,
    {
        Self {
            source: Box::new(items.into_iter()),
            buffer: None,
            failure: None,
        }
    }

    /// Wrap a pull function; the stream ends when it returns `None`
    pub fn from_fn<F>(pull: F) -> Self
    where
        F: FnMut() -> Option<Value> + 'static,
    {
        Self::new(std::iter::from_fn(pull))
    }

    /// Stream with no elements
    pub fn empty() -> Self {
        Self::new(std::iter::empty())
    }

    /// Concatenate streams, exhausting each one in turn
    pub fn concat(streams: Vec<Lazy>) -> Self {
        Self::from_results(streams.into_iter().flatten())
    }

    /// Apply `f` to each element
    pub fn map<F>(self, mut f: F) -> Self
    where
        F: FnMut(Value) -> Result<Value> + 'static,
    {
        Self::from_results(self.source.map(move |item| item.and_then(&mut f)))
    }

    /// Keep elements for which `f` returns true
    pub fn filter<F>(self, mut f: F) -> Self
    where
        F: FnMut(&Value) -> Result<bool> + 'static,
    {
        Self::from_results(self.source.filter_map(move |item| match item {
            Ok(value) => match f(&value) {
                Ok(true) => Some(Ok(value)),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            },
            Err(e) => Some(Err(e)),
        }))
    }

    /// Yield at most `n` elements; upstream is not pulled past the limit
    pub fn take(self, n: usize) -> Self {
        let mut source = self.source;
        let mut remaining = n;
        Self::from_results(std::iter::from_fn(move || {
            if remaining == 0 {
                return None;
            }
            let item = source.next()?;
            if item.is_ok() {
                remaining -= 1;
            }
            Some(item)
        }))
    }

    /// Skip the first `n` elements
    pub fn drop(self, n: usize) -> Self {
        let mut skipped = 0usize;
        Self::from_results(self.source.filter(move |item| {
            if item.is_ok() && skipped < n {
                skipped += 1;
                return false;
            }
            true
        }))
    }

    /// Materialize the upstream, then re-stream the result of `f`
    pub fn transform<F>(self, f: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> Result<Vec<Value>> + 'static,
    {
        self.flat_transform(move |values| f(values).map(Lazy::new))
    }

    /// Materialize the upstream, then continue with the stream `f` returns.
    ///
    /// Materialization is deferred until the first pull.
    pub fn flat_transform<F>(self, f: F) -> Self
    where
        F: FnOnce(Vec<Value>) -> Result<Lazy> + 'static,
    {
        let mut pending = Some((self, f));
        let mut output: Option<Lazy> = None;
        Self::from_results(std::iter::from_fn(move || {
            if output.is_none() {
                let (upstream, f) = pending.take()?;
                match upstream.collect_values().and_then(f) {
                    Ok(stream) => output = Some(stream),
                    Err(e) => return Some(Err(e)),
                }
            }
            output.as_mut()?.next()
        }))
    }

    /// Materialize all remaining elements; repeated calls return the same values.
    ///
    /// Once materialization fails the stream stays failed: later calls return
    /// the same error, and the next pull yields it before the stream ends.
    pub fn value(&mut self) -> Result<&[Value]> {
        if let Some((e, _)) = &self.failure {
            return Err(e.clone());
        }
        let mut buffer = self.buffer.take().unwrap_or_default();
        for item in self.source.by_ref() {
            match item {
                Ok(value) => buffer.push(value),
                Err(e) => {
                    self.buffer = Some(buffer);
                    self.failure = Some((e.clone(), false));
                    return Err(e);
                }
            }
        }
        Ok(self.buffer.insert(buffer).as_slice())
    }

    /// Consume the stream into a vector, stopping at the first error
    pub fn collect_values(mut self) -> Result<Vec<Value>> {
        self.value()?;
        Ok(self.buffer.unwrap_or_default())
    }

    /// Call `f` for each element until it returns false
    pub fn each<F>(self, mut f: F) -> Result<()>
    where
        F: FnMut(Value) -> bool,
    {
        for item in self {
            if !f(item?) {
                break;
            }
        }
        Ok(())
    }

    /// Fold the stream into a single value
    pub fn reduce<T, F>(self, init: T, mut f: F) -> Result<T>
    where
        F: FnMut(T, Value) -> Result<T>,
    {
        let mut acc = init;
        for item in self {
            acc = f(acc, item?)?;
        }
        Ok(acc)
    }

    /// Number of elements, materializing the stream
    pub fn size(&mut self) -> Result<usize> {
        Ok(self.value()?.len())
    }
}

impl Iterator for Lazy {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_some() {
            return match &mut self.failure {
                Some((e, yielded)) if !*yielded => {
                    *yielded = true;
                    Some(Err(e.clone()))
                }
                _ => None,
            };
        }
        self.source.next()
    }
}

impl std::fmt::Debug for Lazy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lazy")
            .field("materialized", &self.buffer.is_some())
            .field("failed", &self.failure.is_some())
            .finish()
    }
}
