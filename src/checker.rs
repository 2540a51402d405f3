// Copyright (C) 2025  Tom Waddington
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published
// by the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Pass/fail predicates evaluated against a device before a command or task runs

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::device::Device;
use crate::error::{Error, Result};

#[async_trait]
pub trait Checker: Send + Sync {
    async fn check(&self, device: &Device) -> Result<bool>;
}

pub type SharedChecker = Arc<dyn Checker>;

/// Checker that always passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Always;

#[async_trait]
impl Checker for Always {
    async fn check(&self, _device: &Device) -> Result<bool> {
        Ok(true)
    }
}

/// Checker that never passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct Never;

#[async_trait]
impl Checker for Never {
    async fn check(&self, _device: &Device) -> Result<bool> {
        Ok(false)
    }
}

/// Wraps a synchronous closure.
pub struct FnChecker<F>(F);

#[async_trait]
impl<F> Checker for FnChecker<F>
where
    F: Fn(&Device) -> bool + Send + Sync,
{
    async fn check(&self, device: &Device) -> Result<bool> {
        Ok((self.0)(device))
    }
}

pub fn checker_fn<F>(f: F) -> SharedChecker
where
    F: Fn(&Device) -> bool + Send + Sync + 'static,
{
    Arc::new(FnChecker(f))
}

pub fn always() -> SharedChecker {
    Arc::new(Always)
}

/// Passes while the focused window contains `fragment`.
#[derive(Debug, Clone)]
pub struct ActivityFocused {
    pub fragment: String,
}

#[async_trait]
impl Checker for ActivityFocused {
    async fn check(&self, device: &Device) -> Result<bool> {
        let focus = device.current_activity().await?;
        Ok(focus.contains(&self.fragment))
    }
}

/// Passes when the device is listed as connected.
#[derive(Debug, Clone, Copy, Default)]
pub struct Connected;

#[async_trait]
impl Checker for Connected {
    async fn check(&self, device: &Device) -> Result<bool> {
        Ok(device.refresh_connection().await)
    }
}

type Factory = Arc<dyn Fn(&[Value]) -> Result<SharedChecker> + Send + Sync>;

/// Named checker constructors used when loading declarative flows.
#[derive(Clone, Default)]
pub struct CheckerRegistry {
    factories: HashMap<String, Factory>,
}

impl CheckerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `always`, `never`, `connected` and
    /// `activity_focused(fragment)`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_checker("always", Always);
        registry.register_checker("never", Never);
        registry.register_checker("connected", Connected);
        registry.register("activity_focused", |args| {
            let fragment = args
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| Error::InvalidCheckerArgs {
                    name: "activity_focused".to_string(),
                    reason: "expected a window name fragment".to_string(),
                })?;
            Ok(Arc::new(ActivityFocused {
                fragment: fragment.to_string(),
            }) as SharedChecker)
        });
        registry
    }

    /// Register a constructor that receives the bound arguments.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&[Value]) -> Result<SharedChecker> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Register a checker that ignores arguments.
    pub fn register_checker<C>(&mut self, name: impl Into<String>, checker: C) -> &mut Self
    where
        C: Checker + 'static,
    {
        let checker: SharedChecker = Arc::new(checker);
        self.register(name, move |_| Ok(checker.clone()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn resolve(&self, name: &str, args: &[Value]) -> Result<SharedChecker> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| Error::UnknownChecker(name.to_string()))?;
        factory(args)
    }
}

impl fmt::Debug for CheckerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.factories.keys().collect();
        names.sort();
        f.debug_struct("CheckerRegistry")
            .field("names", &names)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::mock::ScriptedBridge;
    use crate::device::DeviceConfig;

    fn device(bridge: Arc<ScriptedBridge>) -> Arc<Device> {
        Device::new("emulator-5554", bridge, DeviceConfig::default())
    }

    #[tokio::test]
    async fn test_builtins_resolve() {
        let registry = CheckerRegistry::with_builtins();
        let device = device(Arc::new(ScriptedBridge::new()));

        let always = registry.resolve("always", &[]).unwrap();
        let never = registry.resolve("never", &[]).unwrap();
        assert!(always.check(&device).await.unwrap());
        assert!(!never.check(&device).await.unwrap());
    }

    #[test]
    fn test_unknown_checker() {
        let registry = CheckerRegistry::with_builtins();
        let result = registry.resolve("missing", &[]);
        assert!(matches!(result, Err(Error::UnknownChecker(name)) if name == "missing"));
    }

    #[test]
    fn test_activity_focused_requires_argument() {
        let registry = CheckerRegistry::with_builtins();
        let result = registry.resolve("activity_focused", &[]);
        assert!(matches!(result, Err(Error::InvalidCheckerArgs { .. })));
    }

    #[tokio::test]
    async fn test_activity_focused() {
        let bridge = Arc::new(ScriptedBridge::new());
        bridge.respond(
            "dumpsys",
            "  mCurrentFocus=Window{4f2 u0 game.example/com.qk.game.MainActivity}\n",
        );
        let device = device(bridge);
        let registry = CheckerRegistry::with_builtins();

        let focused = registry
            .resolve("activity_focused", &[Value::from("game.example/")])
            .unwrap();
        let other = registry
            .resolve("activity_focused", &[Value::from("other.app")])
            .unwrap();
        assert!(focused.check(&device).await.unwrap());
        assert!(!other.check(&device).await.unwrap());
    }

    #[tokio::test]
    async fn test_checker_fn() {
        let device = device(Arc::new(ScriptedBridge::new()));
        let checker = checker_fn(|d| d.serial() == "emulator-5554");
        assert!(checker.check(&device).await.unwrap());
    }
}
