//! Built-in service management commands.
//!
//! Registers the hidden `service_manager` service with three group commands:
//!
//! - `lssv` / `services` / `服务列表`: lists services and their state in the
//!   current group
//! - `enable` / `启用` / `开启` `<name>...`
//! - `disable` / `禁用` / `关闭` `<name>...`
//!
//! Toggling a service requires the sender to satisfy that service's
//! `manage_perm`.

use std::sync::{Arc, Weak};

use tracing::{error, info};

use crate::context::HandlerContext;
use crate::error::ServiceError;
use crate::extractor::{CommandArg, GroupId};
use crate::handler::Flow;
use crate::permission::Permission;
use crate::service::{Service, ServiceOptions, ServiceRegistry};
use crate::wrapper::MatchOptions;

pub const MANAGER_SERVICE: &str = "service_manager";

/// Registers the service manager on `registry`.
pub fn register_service_manager(registry: &Arc<ServiceRegistry>) -> Result<Arc<Service>, ServiceError> {
    let sv = registry.register(
        ServiceOptions::new(MANAGER_SERVICE)
            .manage_perm(Permission::SUPERUSER)
            .visible(false),
    )?;

    let weak = Arc::downgrade(registry);
    sv.on_command("lssv", ["services", "服务列表"], MatchOptions::default())
        .handle(move |ctx: Arc<HandlerContext>, GroupId(group_id): GroupId| async move {
            list_services(weak, ctx, group_id).await
        });

    let weak = Arc::downgrade(registry);
    sv.on_command("enable", ["启用", "开启"], MatchOptions::default())
        .handle(
            move |ctx: Arc<HandlerContext>, GroupId(group_id): GroupId, CommandArg(arg): CommandArg| async move {
                toggle(weak, ctx, group_id, arg, true).await
            },
        );

    let weak = Arc::downgrade(registry);
    sv.on_command("disable", ["禁用", "关闭"], MatchOptions::default())
        .handle(
            move |ctx: Arc<HandlerContext>, GroupId(group_id): GroupId, CommandArg(arg): CommandArg| async move {
                toggle(weak, ctx, group_id, arg, false).await
            },
        );

    Ok(sv)
}

async fn list_services(registry: Weak<ServiceRegistry>, ctx: Arc<HandlerContext>, group_id: i64) -> Flow {
    let Some(registry) = registry.upgrade() else {
        return Flow::Finish;
    };
    let show_hidden = ctx.is_superuser();
    let lines: Vec<String> = registry
        .list_all()
        .iter()
        .filter(|sv| show_hidden || sv.visible())
        .map(|sv| {
            let mark = if sv.check_enabled(group_id) { "○" } else { "×" };
            format!("{mark} {}", sv.name())
        })
        .collect();
    ctx.finish(format!("群{group_id}服务一览：\n{}", lines.join("\n")))
        .await
}

async fn toggle(
    registry: Weak<ServiceRegistry>,
    ctx: Arc<HandlerContext>,
    group_id: i64,
    arg: String,
    enable: bool,
) -> Flow {
    let Some(registry) = registry.upgrade() else {
        return Flow::Finish;
    };
    let verb = if enable { "启用" } else { "禁用" };

    let names: Vec<&str> = arg.split_whitespace().collect();
    if names.is_empty() {
        return ctx.finish(format!("用法：{verb} <服务名> [服务名...]")).await;
    }

    let mut lines = Vec::with_capacity(names.len());
    for name in names {
        let Some(target) = registry.get(name) else {
            lines.push(format!("未找到服务：{name}"));
            continue;
        };
        if !target
            .manage_perm()
            .allows(ctx.event().as_ref(), ctx.base().superusers())
        {
            lines.push(format!("权限不足，无法{verb}服务：{name}"));
            continue;
        }

        let result = if enable {
            target.set_enable(group_id)
        } else {
            target.set_disable(group_id)
        };
        match result {
            Ok(()) => {
                info!(service = name, group_id, enable, user = ?ctx.event().user_id(), "Service toggled by command");
                lines.push(format!("已{verb}服务：{name}"));
            }
            Err(e) => {
                error!(service = name, group_id, error = %e, "Failed to persist service state");
                lines.push(format!("服务{name}状态保存失败"));
            }
        }
    }

    ctx.finish(lines.join("\n")).await
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use hoshi_core::{BotManager, BoxedBot, ChatEvent, SenderRole};

    use super::*;
    use crate::dispatcher::{DispatchSettings, EventDispatcher};
    use crate::store::MemoryStore;
    use crate::testing::MockBot;

    struct Fixture {
        registry: Arc<ServiceRegistry>,
        dispatcher: EventDispatcher,
        bot: Arc<MockBot>,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(ServiceRegistry::new(
                Arc::new(MemoryStore::new()),
                Arc::new(BotManager::new()),
            ));
            register_service_manager(&registry).unwrap();
            registry.register(ServiceOptions::new("pcr")).unwrap();
            registry
                .register(ServiceOptions::new("hidden").visible(false))
                .unwrap();
            registry
                .register(ServiceOptions::new("root-only").manage_perm(Permission::SUPERUSER))
                .unwrap();

            let dispatcher = EventDispatcher::new(
                Arc::clone(registry.matcher_table()),
                DispatchSettings {
                    superusers: HashSet::from([1]),
                    ..Default::default()
                },
            );
            Self {
                registry,
                dispatcher,
                bot: MockBot::new("bot"),
            }
        }

        async fn say(&self, event: ChatEvent) -> String {
            let bot: BoxedBot = self.bot.clone();
            self.dispatcher.dispatch_event(event.into(), bot).await;
            self.bot.sent().last().cloned().unwrap_or_default()
        }
    }

    #[tokio::test]
    async fn test_lssv_hides_invisible_services_from_members() {
        let fx = Fixture::new();
        assert_eq!(
            fx.say(ChatEvent::group_message(10, 5, "lssv")).await,
            "group:10:群10服务一览：\n○ pcr\n○ root-only"
        );
        assert_eq!(
            fx.say(ChatEvent::group_message(10, 1, "/服务列表")).await,
            "group:10:群10服务一览：\n○ hidden\n○ pcr\n○ root-only\n○ service_manager"
        );
    }

    #[tokio::test]
    async fn test_toggle_checks_manage_perm() {
        let fx = Fixture::new();
        let admin = |text: &str| ChatEvent::group_message(10, 5, text).role(SenderRole::Admin);

        assert_eq!(
            fx.say(admin("disable pcr root-only nope")).await,
            "group:10:已禁用服务：pcr\n权限不足，无法禁用服务：root-only\n未找到服务：nope"
        );
        assert!(!fx.registry.get("pcr").unwrap().check_enabled(10));
        assert!(fx.registry.get("pcr").unwrap().check_enabled(11));

        assert_eq!(
            fx.say(ChatEvent::group_message(10, 5, "启用 pcr")).await,
            "group:10:权限不足，无法启用服务：pcr"
        );
        assert_eq!(
            fx.say(ChatEvent::group_message(10, 1, "开启 pcr")).await,
            "group:10:已启用服务：pcr"
        );
        assert!(fx.registry.get("pcr").unwrap().check_enabled(10));

        assert_eq!(
            fx.say(admin("enable")).await,
            "group:10:用法：启用 <服务名> [服务名...]"
        );
    }

    #[tokio::test]
    async fn test_commands_are_group_only() {
        let fx = Fixture::new();
        assert_eq!(fx.say(ChatEvent::private_message(1, "lssv")).await, "");
    }
}
