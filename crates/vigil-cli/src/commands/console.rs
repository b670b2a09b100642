//! `vigil console`: the parent's oversight console.

use ::console::style;
use std::time::Duration;

use vigil_client::{ConsoleSnapshot, Lists, Notice, OversightConsole};
use vigil_config::VigilConfig;
use vigil_core::{AppealRecord, ListKind, ParentSettings, SettingsUpdate};

use super::{ConsoleAction, api_client, resource_kind, unreachable};
use crate::output;

pub(super) async fn cmd_console(
    config: &VigilConfig,
    action: ConsoleAction,
) -> vigil_core::Result<()> {
    let console = OversightConsole::new(api_client(config)?);
    let client = api_client(config)?;

    let result = match action {
        ConsoleAction::Pending { json } => {
            let snapshot = console.refresh().await.map_err(|e| unreachable(config, e))?;
            if json {
                output::print_json(&snapshot.pending)
            } else {
                print_pending(&snapshot.pending);
                Ok(())
            }
        }
        ConsoleAction::Approve { approval_id } => console.approve(&approval_id).await,
        ConsoleAction::Deny { approval_id } => console.deny(&approval_id).await,
        ConsoleAction::History { resource, json } => {
            let history = client.appeals(Some(&resource)).await.map_err(|e| unreachable(config, e))?;
            if json {
                output::print_json(&history)
            } else {
                print_history(&resource, &history);
                Ok(())
            }
        }
        ConsoleAction::Lists { desktop, json } => {
            let snapshot = console.refresh().await.map_err(|e| unreachable(config, e))?;
            let lists = snapshot.lists(resource_kind(desktop));
            if json {
                output::print_json(&serde_json::json!({
                    "whitelist": lists.whitelist,
                    "blacklist": lists.blacklist,
                }))
            } else {
                print_lists(lists);
                Ok(())
            }
        }
        ConsoleAction::Add {
            list,
            identifier,
            desktop,
            reason,
        } => {
            console
                .add_entry(
                    resource_kind(desktop),
                    list.into(),
                    &identifier,
                    reason.as_deref(),
                )
                .await
        }
        ConsoleAction::Remove {
            list,
            identifier,
            desktop,
        } => {
            console
                .remove_entry(resource_kind(desktop), list.into(), &identifier)
                .await
        }
        ConsoleAction::ApproveApp { app_name } => console.approve_app(&app_name).await,
        ConsoleAction::Settings { json } => {
            let settings = client.settings().await.map_err(|e| unreachable(config, e))?;
            if json {
                output::print_json(&settings)
            } else {
                print_settings(&settings);
                Ok(())
            }
        }
        ConsoleAction::SetSettings {
            email,
            prompt,
            auto_approve,
            desktop_monitoring,
            screenshot_interval,
        } => {
            let current = client.settings().await.map_err(|e| unreachable(config, e))?;
            let update = SettingsUpdate {
                parent_email: email.unwrap_or(current.parent_email),
                monitoring_prompt: prompt.unwrap_or(current.monitoring_prompt),
                agent_can_auto_approve: auto_approve.unwrap_or(current.agent_can_auto_approve),
                desktop_monitoring_enabled: desktop_monitoring,
                screenshot_interval_secs: screenshot_interval,
                expected_version: Some(current.version),
            };
            console.save_settings(&update).await
        }
        ConsoleAction::Watch { interval } => {
            let secs = interval.unwrap_or(config.console.poll_interval_secs).max(1);
            return watch(&console, Duration::from_secs(secs)).await;
        }
    };

    // Errors are reported by the caller.
    if let Some(Notice::Info(msg)) = console.current().notice {
        output::print_success(&msg);
    }
    result.map_err(|e| unreachable(config, e))
}

async fn watch(console: &OversightConsole, interval: Duration) -> vigil_core::Result<()> {
    let mut rx = console.subscribe();
    let handle = console.watch(interval);
    println!(
        "{}",
        style(format!(
            "Refreshing every {}s, Ctrl-C to stop",
            interval.as_secs()
        ))
        .dim()
    );

    let mut last: Option<ConsoleSnapshot> = None;
    loop {
        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = rx.borrow_and_update().clone();
                print_changes(last.as_ref(), &snapshot);
                last = Some(snapshot);
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    handle.abort();
    Ok(())
}

fn print_changes(last: Option<&ConsoleSnapshot>, snapshot: &ConsoleSnapshot) {
    if let Some(Notice::Error(msg)) = &snapshot.notice
        && last.and_then(|l| l.notice.as_ref()) != snapshot.notice.as_ref()
    {
        output::print_error(msg);
    }
    let Some(at) = snapshot.refreshed_at else {
        return;
    };
    if last.and_then(|l| l.refreshed_at) == Some(at) {
        return;
    }
    let previous = last.map(|l| l.pending.as_slice()).unwrap_or(&[]);
    let fresh: Vec<_> = snapshot
        .pending
        .iter()
        .filter(|a| !previous.iter().any(|p| p.approval_id == a.approval_id))
        .cloned()
        .collect();
    println!(
        "{}  {} pending, {} blocked sites, {} blocked apps",
        style(at.format("%H:%M:%S")).dim(),
        snapshot.pending.len(),
        snapshot.websites.get(ListKind::Blacklist).len(),
        snapshot.desktop.get(ListKind::Blacklist).len(),
    );
    if !fresh.is_empty() {
        print_pending(&fresh);
    }
}

fn print_pending(pending: &[AppealRecord]) {
    if pending.is_empty() {
        println!("No appeals waiting for you.");
        return;
    }
    for appeal in pending {
        println!(
            "{}  {}  {}",
            style(appeal.approval_id).cyan(),
            style(&appeal.resource).bold(),
            style(appeal.created_at.format("%Y-%m-%d %H:%M")).dim()
        );
        println!("   \"{}\"", output::truncate(&appeal.child_reason, 100));
        if let Some(ai) = &appeal.ai_reasoning {
            println!("   {} {}", style("AI:").dim(), output::truncate(ai, 100));
        }
    }
}

fn print_history(resource: &str, history: &[AppealRecord]) {
    if history.is_empty() {
        println!("No appeals for {resource}.");
        return;
    }
    for appeal in history {
        println!(
            "{}  {:<14}  {}",
            style(appeal.created_at.format("%Y-%m-%d %H:%M")).dim(),
            appeal.state.as_str(),
            output::truncate(&appeal.child_reason, 80)
        );
    }
}

fn print_lists(lists: &Lists) {
    for (title, entries) in [
        ("Whitelist", &lists.whitelist),
        ("Blacklist", &lists.blacklist),
    ] {
        println!("{} ({})", style(title).bold(), entries.len());
        for entry in entries {
            println!(
                "   {:<32} {}",
                entry.identifier,
                style(output::truncate(&entry.reason, 60)).dim()
            );
        }
    }
}

fn print_settings(settings: &ParentSettings) {
    let email = if settings.parent_email.is_empty() {
        "(not set)"
    } else {
        settings.parent_email.as_str()
    };
    println!("Parent email:        {email}");
    println!("AI may approve:      {}", settings.agent_can_auto_approve);
    println!("Desktop monitoring:  {}", settings.desktop_monitoring_enabled);
    println!("Screenshot interval: {}s", settings.screenshot_interval_secs);
    println!("Version:             {}", settings.version);
    println!("Guidelines:");
    println!("   {}", settings.monitoring_prompt);
}
