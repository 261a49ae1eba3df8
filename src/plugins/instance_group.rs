// src/plugins/instance_group.rs

//! `Stackdag::InstanceGroup`: a resource that owns `size` member resources.
//!
//! Members are named `<group>-<index>` and built from `member_type`
//! (default `Stackdag::Generic`) with the `member_properties` table. Their
//! lifecycle actions run as a [`PollingTaskGroup`] held in the hook cookie
//! and stepped by the matching `check_*_complete`. The group's
//! `resource_id` is the comma-joined list of member names. It is refreshed
//! after every step of the fan-out, so members that already exist stay
//! recorded when a sibling fails.

use std::collections::HashSet;

use anyhow::anyhow;
use tracing::{debug, info, warn};

use crate::config::model::{Properties, ResourceDefinition};
use crate::plugins::generic;
use crate::resource::plugin::{
    Cookie, HookContext, HookResult, PropertyDiff, ResourcePlugin, UpdateOutcome,
};
use crate::resource::{Resource, ResourceActionTask, ResourceHandle, ResourceState, lock};
use crate::scheduler::{PollingTaskGroup, TaskRunner};
use crate::types::{Action, Status};

pub const TYPE_NAME: &str = "Stackdag::InstanceGroup";

#[derive(Debug, Default)]
pub struct InstanceGroup {
    members: Vec<ResourceHandle>,
}

impl InstanceGroup {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Cookie of every group action: the member fan-out plus every member the
/// action can leave behind, in index order.
struct Fanout {
    runner: TaskRunner,
    candidates: Vec<ResourceHandle>,
}

fn size(ctx: &HookContext<'_>) -> usize {
    ctx.property_int("size")
        .and_then(|n| usize::try_from(n).ok())
        .unwrap_or(0)
}

fn member_type(ctx: &HookContext<'_>) -> String {
    ctx.property_str("member_type")
        .unwrap_or(generic::TYPE_NAME)
        .to_string()
}

fn member_name(group: &str, index: usize) -> String {
    format!("{group}-{index}")
}

fn member_index(member: &ResourceHandle) -> usize {
    lock(member)
        .name()
        .rsplit('-')
        .next()
        .and_then(|suffix| suffix.parse().ok())
        .unwrap_or(usize::MAX)
}

fn member_list(members: &[ResourceHandle]) -> Option<String> {
    if members.is_empty() {
        return None;
    }
    Some(
        members
            .iter()
            .map(|m| lock(m).name().to_string())
            .collect::<Vec<_>>()
            .join(","),
    )
}

impl InstanceGroup {
    fn build_member(&self, ctx: &HookContext<'_>, name: String) -> HookResult<ResourceHandle> {
        let type_name = member_type(ctx);
        let plugin = ctx.registry().instantiate(&type_name)?;

        let mut definition = ResourceDefinition::new(name, type_name);
        if let Some(props) = ctx.properties().get("member_properties").and_then(|v| v.as_table()) {
            definition.properties = props.clone();
        }

        Ok(Resource::nested(definition, plugin, ctx.stack().clone()).into_handle())
    }

    /// Members after a reload: the plugin instance is fresh, but the
    /// resource id still names every member.
    fn recover_members(&mut self, ctx: &HookContext<'_>) -> HookResult<()> {
        if !self.members.is_empty() {
            return Ok(());
        }
        let Some(id) = ctx.resource_id() else {
            return Ok(());
        };
        let names: Vec<String> = id
            .split(',')
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect();
        debug!(group = %ctx.name(), count = names.len(), "recovering members from resource id");

        for name in names {
            let member = self.build_member(ctx, name)?;
            {
                let mut m = lock(&member);
                let name = m.physical_resource_name();
                m.load_state(
                    ResourceState::new(Action::Create, Status::Complete, ""),
                    Some(name),
                );
            }
            self.members.push(member);
        }
        Ok(())
    }

    /// Build `count` new members on the lowest indices not already taken.
    fn new_members(&self, ctx: &HookContext<'_>, count: usize) -> HookResult<Vec<ResourceHandle>> {
        let taken: HashSet<String> = self
            .members
            .iter()
            .map(|m| lock(m).name().to_string())
            .collect();
        (0..)
            .map(|index| member_name(ctx.name(), index))
            .filter(|name| !taken.contains(name))
            .take(count)
            .map(|name| self.build_member(ctx, name))
            .collect()
    }

    fn fan_out(
        &self,
        ctx: &HookContext<'_>,
        action: Action,
        targets: Vec<ResourceHandle>,
        mut candidates: Vec<ResourceHandle>,
    ) -> Cookie {
        candidates.sort_by_key(member_index);
        let label = format!("{} {} members", ctx.name(), action);
        let group = PollingTaskGroup::from_task_with_args(
            label,
            |member| ResourceActionTask::new(member, action),
            targets,
        )
        // Teardown keeps going past individual member failures.
        .aggregate_exceptions(matches!(action, Action::Delete));

        Cookie::new(Fanout {
            runner: TaskRunner::new(group),
            candidates,
        })
    }

    fn advance(&mut self, ctx: &mut HookContext<'_>, cookie: &mut Cookie) -> HookResult<bool> {
        let Some(fanout) = cookie.downcast_mut::<Fanout>() else {
            return Ok(true);
        };
        let stepped = if fanout.runner.done() {
            Ok(true)
        } else {
            fanout.runner.step()
        };
        self.record_members(ctx, fanout);
        Ok(stepped?)
    }

    /// Keep exactly the candidates that may exist on the provider side.
    fn record_members(&mut self, ctx: &mut HookContext<'_>, fanout: &Fanout) {
        self.members = fanout
            .candidates
            .iter()
            .filter(|m| lock(m).exists())
            .cloned()
            .collect();
        ctx.set_resource_id(member_list(&self.members));
    }
}

impl ResourcePlugin for InstanceGroup {
    fn type_name(&self) -> &str {
        TYPE_NAME
    }

    fn validate(&self, properties: &Properties) -> Option<String> {
        match properties.get("size").map(|v| v.as_integer()) {
            Some(Some(n)) if n >= 0 => {}
            Some(_) => return Some("size must be a non-negative integer".to_string()),
            None => return Some("size is required".to_string()),
        }
        if let Some(value) = properties.get("member_type") {
            if !value.is_str() {
                return Some("member_type must be a string".to_string());
            }
        }
        if let Some(value) = properties.get("member_properties") {
            if !value.is_table() {
                return Some("member_properties must be a table".to_string());
            }
        }
        None
    }

    fn handle_create(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        let members = self.new_members(ctx, size(ctx))?;
        info!(group = %ctx.name(), size = members.len(), "creating members");
        Ok(self.fan_out(ctx, Action::Create, members.clone(), members))
    }

    fn check_create_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.advance(ctx, cookie)
    }

    fn handle_update(
        &mut self,
        ctx: &mut HookContext<'_>,
        diff: &PropertyDiff,
    ) -> HookResult<UpdateOutcome> {
        self.recover_members(ctx)?;

        let new_size = diff
            .after
            .get("size")
            .and_then(|v| v.as_integer())
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| anyhow!("size must be a non-negative integer"))?;
        let current = self.members.len();
        info!(group = %ctx.name(), from = current, to = new_size, "resizing");

        let cookie = if new_size >= current {
            let added = self.new_members(ctx, new_size - current)?;
            let mut candidates = self.members.clone();
            candidates.extend(added.iter().cloned());
            self.fan_out(ctx, Action::Create, added, candidates)
        } else {
            // Highest-numbered members go first.
            let removed: Vec<ResourceHandle> =
                self.members[new_size..].iter().rev().cloned().collect();
            self.fan_out(ctx, Action::Delete, removed, self.members.clone())
        };
        Ok(UpdateOutcome::InPlace(cookie))
    }

    fn check_update_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.advance(ctx, cookie)
    }

    fn handle_delete(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.recover_members(ctx)?;
        let targets: Vec<ResourceHandle> = self
            .members
            .iter()
            .rev()
            .filter(|m| lock(m).exists())
            .cloned()
            .collect();
        Ok(self.fan_out(ctx, Action::Delete, targets, self.members.clone()))
    }

    fn check_delete_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.advance(ctx, cookie)
    }

    fn handle_suspend(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.recover_members(ctx)?;
        let members = self.members.clone();
        Ok(self.fan_out(ctx, Action::Suspend, members.clone(), members))
    }

    fn check_suspend_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.advance(ctx, cookie)
    }

    fn handle_resume(&mut self, ctx: &mut HookContext<'_>) -> HookResult<Cookie> {
        self.recover_members(ctx)?;
        let members = self.members.clone();
        Ok(self.fan_out(ctx, Action::Resume, members.clone(), members))
    }

    fn check_resume_complete(
        &mut self,
        ctx: &mut HookContext<'_>,
        cookie: &mut Cookie,
    ) -> HookResult<bool> {
        self.advance(ctx, cookie)
    }

    fn update_allowed_properties(&self) -> Vec<String> {
        vec!["size".to_string()]
    }

    fn on_cancel(
        &mut self,
        ctx: &mut HookContext<'_>,
        action: Action,
        cookie: &mut Cookie,
    ) -> HookResult<()> {
        let Some(fanout) = cookie.downcast_mut::<Fanout>() else {
            return Ok(());
        };
        warn!(group = %ctx.name(), %action, "cancelling member tasks");
        let cancelled = fanout.runner.cancel();
        self.record_members(ctx, fanout);
        Ok(cancelled?)
    }
}
