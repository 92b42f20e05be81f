//! Delegate capabilities and the name registry the orchestrator dispatches through

use crate::builtin::Builtin;
use async_trait::async_trait;
use plancraft_error::{Error, Result};
use plancraft_vm::Span;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// An external capability answering self-contained natural-language requests
#[async_trait]
pub trait Delegate: Send + Sync {
    fn name(&self) -> &str;

    /// One line shown to the model next to the delegate's signature
    fn description(&self) -> &str;

    /// Answer `prompt`. `span` is the delegate call's span; implementations
    /// may open children under it.
    async fn invoke(&self, prompt: &str, span: &Span) -> Result<String>;
}

type DelegateFn = dyn Fn(&str) -> Result<String> + Send + Sync;

/// A delegate backed by a plain function
pub struct FnDelegate {
    name: String,
    description: String,
    handler: Box<DelegateFn>,
}

impl FnDelegate {
    pub fn new<F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&str) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            handler: Box::new(handler),
        }
    }
}

impl fmt::Debug for FnDelegate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnDelegate").field("name", &self.name).finish()
    }
}

#[async_trait]
impl Delegate for FnDelegate {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    async fn invoke(&self, prompt: &str, _span: &Span) -> Result<String> {
        (self.handler)(prompt)
    }
}

/// Name to delegate mapping. Built before the orchestrator and read-only after.
#[derive(Default, Clone)]
pub struct DelegateRegistry {
    delegates: BTreeMap<String, Arc<dyn Delegate>>,
}

impl DelegateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, delegate: Arc<dyn Delegate>) -> Result<()> {
        let name = delegate.name().to_string();
        let reject = |reason: &str| {
            Err(Error::config_invalid(format!("cannot register delegate '{}': {}", name, reason))
                .with_operation("registry::register")
                .with_context("delegate", name.clone()))
        };

        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return reject("names must be non-empty identifiers");
        }
        if Builtin::from_name(&name).is_some() {
            return reject("the name is reserved for a built-in");
        }
        if self.delegates.contains_key(&name) {
            return reject("a delegate with this name is already registered");
        }

        self.delegates.insert(name, delegate);
        Ok(())
    }

    /// Chainable form of [`register`](Self::register)
    pub fn with(mut self, delegate: impl Delegate + 'static) -> Result<Self> {
        self.register(Arc::new(delegate))?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Delegate>> {
        self.delegates.get(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.delegates.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Delegate>> {
        self.delegates.values()
    }

    pub fn len(&self) -> usize {
        self.delegates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.delegates.is_empty()
    }
}

impl fmt::Debug for DelegateRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
