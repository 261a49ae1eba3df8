#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use stackdag::config::Properties;
use stackdag::resource::{
    Cookie, HookContext, HookError, HookResult, PropertyDiff, ResourcePlugin, TypeRegistry,
    UpdateOutcome, UpdatePolicy,
};
use stackdag::types::Action;

/// Replaces on a mixed in-place/replace-only change.
pub const SCRIPTED: &str = "Test::Scripted";
/// Rejects a mixed in-place/replace-only change.
pub const STRICT: &str = "Test::Strict";

/// Ordered record of every hook call made by scripted resources.
///
/// Entries look like `"A create"`, `"A create done"`, `"A delete cancelled"`.
#[derive(Debug, Clone, Default)]
pub struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap().push(entry);
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    /// Resources whose `handle_<action>` ran, in call order.
    pub fn started(&self, action: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|e| e.strip_suffix(&format!(" {action}")).map(str::to_string))
            .collect()
    }

    /// Resources whose `<action>` completed, in completion order.
    pub fn finished(&self, action: &str) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|e| e.strip_suffix(&format!(" {action} done")).map(str::to_string))
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.position(entry).is_some()
    }

    pub fn clear(&self) {
        self.0.lock().unwrap().clear();
    }
}

/// A resource type whose behaviour is driven by its properties:
///
/// - `fail = "create"` (or an array): `handle_<action>` fails.
/// - `fail_check = "create"`: `check_<action>_complete` fails.
/// - `fail_only = "G-1"`: `fail` and `fail_check` apply to that resource
///   name only, for members that share one set of properties.
/// - `polls = n`: every check answers "not yet" `n` times first.
/// - `hang = "create"`: the check never completes.
/// - `unsupported = ["suspend"]`: the action is unsupported.
/// - `invalid = true`: property validation rejects the resource.
///
/// Only `tag` can be updated in place; any other changed key needs a
/// replacement.
pub struct ScriptedPlugin {
    journal: Journal,
    policy: UpdatePolicy,
}

struct Polls(i64);

fn verb(action: Action) -> String {
    action.as_str().to_lowercase()
}

fn listed(ctx: &HookContext<'_>, key: &str, action: Action) -> bool {
    let wanted = verb(action);
    match ctx.properties().get(key) {
        Some(toml::Value::String(s)) => *s == wanted,
        Some(toml::Value::Array(items)) => items.iter().any(|v| v.as_str() == Some(&wanted)),
        _ => false,
    }
}

fn fails(ctx: &HookContext<'_>, key: &str, action: Action) -> bool {
    let targeted = match ctx.property_str("fail_only") {
        Some(only) => only == ctx.name(),
        None => true,
    };
    targeted && listed(ctx, key, action)
}

impl ScriptedPlugin {
    pub fn new(journal: Journal, policy: UpdatePolicy) -> Self {
        Self { journal, policy }
    }

    fn handle(&mut self, ctx: &mut HookContext<'_>, action: Action) -> HookResult<Cookie> {
        if listed(ctx, "unsupported", action) {
            return Err(HookError::Unsupported(action));
        }
        self.journal.push(format!("{} {}", ctx.name(), verb(action)));
        if fails(ctx, "fail", action) {
            return Err(HookError::Failed(anyhow!(
                "{} of {} failed as scripted",
                verb(action),
                ctx.name()
            )));
        }
        if action == Action::Create {
            let id = format!("id-{}", ctx.physical_name());
            ctx.set_resource_id(Some(id));
        }
        Ok(Cookie::new(Polls(ctx.property_int("polls").unwrap_or(0))))
    }

    fn check(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
        action: Action,
    ) -> HookResult<bool> {
        if fails(ctx, "fail_check", action) {
            return Err(HookError::Failed(anyhow!(
                "{} of {} did not converge",
                verb(action),
                ctx.name()
            )));
        }
        if listed(ctx, "hang", action) {
            return Ok(false);
        }
        if let Some(Polls(left)) = cookie.downcast_mut::<Polls>() {
            if *left > 0 {
                *left -= 1;
                return Ok(false);
            }
        }
        self.journal.push(format!("{} {} done", ctx.name(), verb(action)));
        Ok(true)
    }
}

impl ResourcePlugin for ScriptedPlugin {
    fn type_name(&self) -> &str {
        match self.policy {
            UpdatePolicy::Replace => SCRIPTED,
            UpdatePolicy::Reject => STRICT,
        }
    }

    fn validate(&self, properties: &Properties) -> Option<String> {
        match properties.get("invalid").and_then(|v| v.as_bool()) {
            Some(true) => Some("scripted validation failure".to_string()),
            _ => None,
        }
    }

    fn handle_create(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.handle(ctx, Action::Create)
    }

    fn check_create_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.check(ctx, cookie, Action::Create)
    }

    fn handle_update(
        &mut self,
        ctx: &mut HookContext<'_>,
        diff: &PropertyDiff,
    ) -> HookResult<UpdateOutcome> {
        let cookie = self.handle(ctx, Action::Update)?;
        self.journal
            .push(format!("{} changed {}", ctx.name(), diff.changed.join(",")));
        Ok(UpdateOutcome::InPlace(cookie))
    }

    fn check_update_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.check(ctx, cookie, Action::Update)
    }

    fn handle_delete(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.handle(ctx, Action::Delete)
    }

    fn check_delete_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.check(ctx, cookie, Action::Delete)
    }

    fn handle_suspend(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.handle(ctx, Action::Suspend)
    }

    fn check_suspend_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.check(ctx, cookie, Action::Suspend)
    }

    fn handle_resume(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.handle(ctx, Action::Resume)
    }

    fn check_resume_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.check(ctx, cookie, Action::Resume)
    }

    fn update_allowed_properties(&self) -> Vec<String> {
        vec!["tag".to_string()]
    }

    fn update_policy(&self) -> UpdatePolicy {
        self.policy
    }

    fn on_cancel(
        &mut self,
        ctx: &mut HookContext<'_>,
        action: Action,
        _cookie: &mut Cookie,
    ) -> HookResult<()> {
        self.journal
            .push(format!("{} {} cancelled", ctx.name(), verb(action)));
        Ok(())
    }
}

/// Built-in types plus `Test::Scripted` and `Test::Strict`, all recording
/// into `journal`.
pub fn scripted_registry(journal: &Journal) -> TypeRegistry {
    let mut registry = TypeRegistry::with_builtins();
    let j = journal.clone();
    registry.register(SCRIPTED, move || {
        Box::new(ScriptedPlugin::new(j.clone(), UpdatePolicy::Replace))
    });
    let j = journal.clone();
    registry.register(STRICT, move || {
        Box::new(ScriptedPlugin::new(j.clone(), UpdatePolicy::Reject))
    });
    registry
}
