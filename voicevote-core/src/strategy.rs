//! Ordered providers where the first success wins.
//!
//! Used twice: recognition backends (offline, then online) and speech output
//! voices (espeak-ng, espeak, ...). Each attempt is isolated: an `Err` or a
//! panic inside one provider is logged and the next provider is tried.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::warn;

use crate::error::Result;

/// Anything that can take part in a [`StrategyList`].
pub trait Strategy {
    /// Short name used in logs.
    fn name(&self) -> &str;
}

/// An ordered list of boxed providers.
pub struct StrategyList<P: ?Sized + Strategy> {
    providers: Vec<Box<P>>,
}

impl<P: ?Sized + Strategy> StrategyList<P> {
    pub fn new(providers: Vec<Box<P>>) -> Self {
        Self { providers }
    }

    pub fn names(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &P> {
        self.providers.iter().map(|p| &**p)
    }

    /// Run `attempt` on each provider in order until one returns `Ok(Some)`.
    ///
    /// `Ok(None)` means "no result, try the next one". Errors and panics are
    /// logged and treated the same way.
    pub fn first_success<T>(
        &mut self,
        mut attempt: impl FnMut(&mut P) -> Result<Option<T>>,
    ) -> Option<T> {
        for provider in self.providers.iter_mut() {
            if let Some(value) = run_isolated(&mut **provider, &mut attempt) {
                return Some(value);
            }
        }
        None
    }

    /// Like [`first_success`](Self::first_success), but only over providers
    /// whose `key` appears in `order`, visited in `order`'s sequence.
    /// Keys absent from the list are skipped.
    pub fn first_success_by_key<K: PartialEq, T>(
        &mut self,
        order: &[K],
        key: impl Fn(&P) -> K,
        mut attempt: impl FnMut(&mut P) -> Result<Option<T>>,
    ) -> Option<T> {
        for wanted in order {
            let Some(provider) = self.providers.iter_mut().find(|p| key(&***p) == *wanted)
            else {
                continue;
            };
            if let Some(value) = run_isolated(&mut **provider, &mut attempt) {
                return Some(value);
            }
        }
        None
    }
}

fn run_isolated<P: ?Sized + Strategy, T>(
    provider: &mut P,
    attempt: &mut impl FnMut(&mut P) -> Result<Option<T>>,
) -> Option<T> {
    let name = provider.name().to_string();
    match catch_unwind(AssertUnwindSafe(|| attempt(provider))) {
        Ok(Ok(Some(value))) => Some(value),
        Ok(Ok(None)) => None,
        Ok(Err(e)) => {
            warn!(provider = name.as_str(), error = %e, "provider failed, trying next");
            None
        }
        Err(panic) => {
            warn!(
                provider = name.as_str(),
                panic = panic_message(panic.as_ref()),
                "provider panicked, trying next"
            );
            None
        }
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}
