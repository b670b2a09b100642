//! `check`, `check-app`, `appeal` and `escalate`: the enforcement point from a terminal.

use ::console::style;
use serde_json::json;
use std::path::PathBuf;

use vigil_client::{AppCheck, AppealFlow, EnforcementPoint, FlowState, GateView, PageCheck};
use vigil_config::VigilConfig;
use vigil_core::{ResourceKind, VigilError};

use super::api_client;
use crate::output;

fn enforcement_point(config: &VigilConfig) -> vigil_core::Result<EnforcementPoint> {
    Ok(EnforcementPoint::new(
        api_client(config)?,
        &config.enforcement,
    ))
}

pub(super) async fn cmd_check(
    config: &VigilConfig,
    url: String,
    title: Option<String>,
    content_file: Option<PathBuf>,
    json: bool,
) -> vigil_core::Result<()> {
    let content = content_file.map(std::fs::read_to_string).transpose()?;
    let point = enforcement_point(config)?;
    let view = point.check(&PageCheck { url, title, content }).await;
    print_view(&view, json)
}

pub(super) async fn cmd_check_app(
    config: &VigilConfig,
    app_name: String,
    window_title: Option<String>,
    screenshot: Option<PathBuf>,
    json: bool,
) -> vigil_core::Result<()> {
    let screenshot_png = screenshot.map(std::fs::read).transpose()?;
    let point = enforcement_point(config)?;
    let view = point
        .check_app(&AppCheck {
            app_name,
            window_title,
            screenshot_png,
        })
        .await;
    print_view(&view, json)
}

fn print_view(view: &GateView, json: bool) -> vigil_core::Result<()> {
    if json {
        let body = match view {
            GateView::Checking => json!({ "view": "checking" }),
            GateView::Allowed => json!({ "view": "allowed" }),
            GateView::Blocked {
                reason,
                appeal_form,
            } => json!({
                "view": "blocked",
                "reason": reason,
                "appeal_available": appeal_form.is_some(),
            }),
        };
        return output::print_json(&body);
    }
    match view {
        GateView::Checking => println!("{}", style("Checking...").dim()),
        GateView::Allowed => output::print_success("Allowed"),
        GateView::Blocked {
            reason,
            appeal_form,
        } => {
            println!("{} {reason}", style("Blocked:").red().bold());
            if appeal_form.is_some() {
                println!(
                    "   {}",
                    style("You can appeal with `vigil appeal <url> --reason ...`").dim()
                );
            }
        }
    }
    Ok(())
}

pub(super) async fn cmd_appeal(
    config: &VigilConfig,
    kind: ResourceKind,
    target: String,
    title: Option<String>,
    reason: String,
    escalate: bool,
) -> vigil_core::Result<()> {
    let point = enforcement_point(config)?;
    let mut flow = AppealFlow::new(kind, &target, title.as_deref());

    point.submit_appeal(&mut flow, &reason).await;
    print_flow(&flow, &target);

    if escalate && matches!(flow.state(), FlowState::AiDenied { .. }) {
        println!("{}", style("Asking your parent...").dim());
        point.escalate(&mut flow).await;
        print_flow(&flow, &target);
    }

    match flow.state() {
        FlowState::Editing { error: Some(e) } => Err(VigilError::Other(anyhow::anyhow!(e.clone()))),
        FlowState::AiDenied { error: Some(e), .. } | FlowState::Exhausted { message: e } => {
            Err(VigilError::Other(anyhow::anyhow!(e.clone())))
        }
        _ => Ok(()),
    }
}

/// Progress output. Error states are reported once, by the caller.
fn print_flow(flow: &AppealFlow, target: &str) {
    match flow.state() {
        FlowState::Editing { .. }
        | FlowState::Submitting
        | FlowState::Exhausted { .. }
        | FlowState::AiDenied { error: Some(_), .. } => {}
        FlowState::Approved { reasoning, .. } => {
            output::print_success(&format!("Approved. {reasoning}"));
        }
        FlowState::AiDenied {
            reasoning,
            appeal_id,
            error: None,
            ..
        } => {
            println!("{} {reasoning}", style("Not approved:").yellow().bold());
            println!(
                "   {}",
                style(format!("Ask your parent with `vigil escalate {appeal_id} {target}`")).dim()
            );
        }
        FlowState::Escalating { .. } => println!("{}", style("Sending to your parent...").dim()),
        FlowState::PendingParent { message } => output::print_info(message),
    }
}

pub(super) async fn cmd_escalate(
    config: &VigilConfig,
    approval_id: uuid::Uuid,
    target: String,
    reason: Option<String>,
) -> vigil_core::Result<()> {
    let client = api_client(config)?;
    let outcome = client
        .escalate(&approval_id, &target, reason.as_deref())
        .await?;
    output::print_info(&outcome.reason);
    Ok(())
}
