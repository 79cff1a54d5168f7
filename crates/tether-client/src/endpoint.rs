//! Where and how to dial.

use std::fmt;
use std::sync::Arc;

use tether_core::{BoxError, DialOptions};

type ResolveFn = dyn Fn() -> Result<String, BoxError> + Send + Sync;
type OptionsFn = dyn Fn() -> Result<DialOptions, BoxError> + Send + Sync;

/// Target address, fixed or resolved before every dial.
#[derive(Clone)]
pub enum Endpoint {
    /// Always dial this address.
    Static(String),
    /// Ask this resolver on every attempt.
    Dynamic(Arc<ResolveFn>),
}

impl Endpoint {
    /// Endpoint resolved by `f` before each dial.
    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn() -> Result<String, BoxError> + Send + Sync + 'static,
    {
        Self::Dynamic(Arc::new(f))
    }

    /// Address for the next dial.
    pub fn resolve(&self) -> Result<String, BoxError> {
        match self {
            Self::Static(addr) => Ok(addr.clone()),
            Self::Dynamic(f) => f(),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Static(addr) => f.debug_tuple("Static").field(addr).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

impl From<&str> for Endpoint {
    fn from(addr: &str) -> Self {
        Self::Static(addr.to_owned())
    }
}

impl From<String> for Endpoint {
    fn from(addr: String) -> Self {
        Self::Static(addr)
    }
}

/// Dial options, fixed or built before every dial (for example to refresh an
/// auth header).
#[derive(Clone)]
pub(crate) enum DialOptionsSource {
    Fixed(DialOptions),
    Provider(Arc<OptionsFn>),
}

impl DialOptionsSource {
    pub(crate) fn provider<F>(f: F) -> Self
    where
        F: Fn() -> Result<DialOptions, BoxError> + Send + Sync + 'static,
    {
        Self::Provider(Arc::new(f))
    }

    pub(crate) fn build(&self) -> Result<DialOptions, BoxError> {
        match self {
            Self::Fixed(opts) => Ok(opts.clone()),
            Self::Provider(f) => f(),
        }
    }
}

impl Default for DialOptionsSource {
    fn default() -> Self {
        Self::Fixed(DialOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn static_endpoint_resolves_to_itself() {
        let ep = Endpoint::from("ws://localhost:9000/feed");
        assert_eq!(ep.resolve().unwrap(), "ws://localhost:9000/feed");
        assert_eq!(format!("{ep:?}"), r#"Static("ws://localhost:9000/feed")"#);
    }

    #[test]
    fn dynamic_endpoint_called_every_time() {
        let calls = Arc::new(AtomicU32::new(0));
        let ep = {
            let calls = Arc::clone(&calls);
            Endpoint::dynamic(move || {
                let n = calls.fetch_add(1, Ordering::SeqCst);
                Ok(format!("ws://shard-{n}"))
            })
        };
        assert_eq!(ep.resolve().unwrap(), "ws://shard-0");
        assert_eq!(ep.resolve().unwrap(), "ws://shard-1");
    }

    #[test]
    fn dynamic_endpoint_error_passes_through() {
        let ep = Endpoint::dynamic(|| Err("no shards available".into()));
        assert_eq!(ep.resolve().unwrap_err().to_string(), "no shards available");
    }

    #[test]
    fn options_provider_rebuilds() {
        let source = DialOptionsSource::provider(|| {
            Ok(DialOptions::default().header("Authorization", "Bearer fresh"))
        });
        assert_eq!(source.build().unwrap().headers.len(), 1);
        assert_eq!(DialOptionsSource::default().build().unwrap(), DialOptions::default());
    }
}
