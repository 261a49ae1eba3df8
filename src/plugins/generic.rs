// src/plugins/generic.rs

//! `Stackdag::Generic`: a provider-free resource with configurable polling.
//!
//! Properties:
//! - `create_polls` / `delete_polls`: checks that report "not yet" before
//!   the action completes (default 0).
//! - `fail_on`: name of an action whose `handle_*` fails.
//! - `suspendable`: whether suspend/resume are supported (default true).
//! - `image`: looked up once through the provider cache; the resolved id is
//!   kept in the resource-data side channel under `image_id`.
//!
//! Every other key is free data.

use anyhow::anyhow;
use tracing::debug;

use crate::config::model::Properties;
use crate::resource::plugin::{
    Cookie, HookContext, HookError, HookResult, PropertyDiff, ResourcePlugin, UpdateOutcome,
};
use crate::types::Action;

pub const TYPE_NAME: &str = "Stackdag::Generic";

#[derive(Debug, Default)]
pub struct GenericResource;

impl GenericResource {
    pub fn new() -> Self {
        Self
    }
}

/// Remaining "not yet" answers before a check reports completion.
struct PollsLeft(u64);

fn polls(ctx: &HookContext<'_>, key: &str) -> u64 {
    ctx.property_int(key)
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0)
}

fn fail_if_configured(ctx: &HookContext<'_>, action: Action) -> HookResult<()> {
    match ctx.property_str("fail_on") {
        Some(on) if on.eq_ignore_ascii_case(action.as_str()) => Err(HookError::Failed(anyhow!(
            "{} of {} failed as configured",
            action.as_str().to_lowercase(),
            ctx.physical_name()
        ))),
        _ => Ok(()),
    }
}

fn count_down(cookie: &mut Cookie) -> bool {
    match cookie.downcast_mut::<PollsLeft>() {
        Some(PollsLeft(0)) | None => true,
        Some(PollsLeft(left)) => {
            *left -= 1;
            false
        }
    }
}

impl ResourcePlugin for GenericResource {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn validate(&self, properties: &Properties) -> Option<String> {
        for key in ["create_polls", "delete_polls"] {
            if let Some(value) = properties.get(key) {
                match value.as_integer() {
                    Some(n) if n >= 0 => {}
                    _ => return Some(format!("{key} must be a non-negative integer")),
                }
            }
        }
        if let Some(value) = properties.get("fail_on") {
            match value.as_str().map(str::parse::<Action>) {
                Some(Ok(_)) => {}
                _ => return Some("fail_on must name an action".to_string()),
            }
        }
        if let Some(value) = properties.get("suspendable") {
            if !value.is_bool() {
                return Some("suspendable must be a boolean".to_string());
            }
        }
        None
    }

    fn handle_create(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        fail_if_configured(ctx, Action::Create)?;

        if let Some(image) = ctx.property_str("image").map(str::to_string) {
            let image_id = ctx
                .cache()
                .get_or_insert_with(&format!("image:{image}"), || Ok(format!("img-{image}")))?;
            ctx.data_set("image_id", image_id)?;
        }

        let id = ctx.physical_name();
        debug!(resource = %ctx.name(), %id, "generic resource created");
        ctx.set_resource_id(Some(id));
        Ok(Cookie::new(PollsLeft(polls(ctx, "create_polls"))))
    }

    fn check_create_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(count_down(cookie))
    }

    fn handle_update(
        &mut self,
        ctx: &mut HookContext<'_>,
        diff: &PropertyDiff,
    ) -> HookResult<UpdateOutcome> {
        fail_if_configured(ctx, Action::Update)?;
        debug!(resource = %ctx.name(), changed = ?diff.changed, "generic resource updated");
        Ok(UpdateOutcome::InPlace(Cookie::none()))
    }

    fn handle_delete(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        fail_if_configured(ctx, Action::Delete)?;
        Ok(Cookie::new(PollsLeft(polls(ctx, "delete_polls"))))
    }

    fn check_delete_complete(
        &mut self,
        _ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        Ok(count_down(cookie))
    }

    fn handle_suspend(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        if ctx.property_bool("suspendable") == Some(false) {
            return Err(HookError::Unsupported(Action::Suspend));
        }
        fail_if_configured(ctx, Action::Suspend)?;
        Ok(Cookie::none())
    }

    fn handle_resume(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        if ctx.property_bool("suspendable") == Some(false) {
            return Err(HookError::Unsupported(Action::Resume));
        }
        fail_if_configured(ctx, Action::Resume)?;
        Ok(Cookie::none())
    }

    fn update_allowed_properties(&self) -> Vec<String> {
        vec!["value".to_string(), "create_polls".to_string()]
    }
}
