#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use std::time::Duration;

    use vigil_config::{SharedConfig, VigilConfig};
    use vigil_core::*;
    use vigil_engine::*;
    use vigil_moderation::{ModerationVerdict, StaticModerator};
    use vigil_store::{PolicyStore, ScreenshotStore};

    /// Collects notifications; optionally fails every delivery.
    #[derive(Default)]
    struct RecordingNotifier {
        sent: Mutex<Vec<Notification>>,
        fail: bool,
    }

    #[async_trait]
    impl ParentNotifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) -> Result<()> {
            self.sent.lock().push(notification.clone());
            if self.fail {
                return Err(VigilError::Transport("smtp down".into()));
            }
            Ok(())
        }
    }

    struct Harness {
        engine: Engine,
        moderator: Arc<StaticModerator>,
        notifier: Arc<RecordingNotifier>,
    }

    fn harness_with(moderator: StaticModerator, limit: u32) -> Harness {
        let store = PolicyStore::open_in_memory().unwrap();
        let moderator = Arc::new(moderator);
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = Engine::new(
            store,
            None,
            moderator.clone(),
            notifier.clone(),
            limit,
        );
        Harness {
            engine,
            moderator,
            notifier,
        }
    }

    fn harness(moderator: StaticModerator) -> Harness {
        harness_with(moderator, 1)
    }

    fn visit(url: &str) -> WebsiteRequest {
        WebsiteRequest {
            url: url.into(),
            title: Some("A page".into()),
            content: Some("some page text".into()),
        }
    }

    fn appeal(url: &str, reason: &str) -> AppealRequest {
        AppealRequest {
            kind: ResourceKind::Website,
            resource_link: url.into(),
            title: None,
            reason: reason.into(),
        }
    }

    fn set_auto_approve(store: &PolicyStore, enabled: bool) {
        store
            .save_settings(&SettingsUpdate {
                parent_email: "parent@example.com".into(),
                monitoring_prompt: "No games during school".into(),
                agent_can_auto_approve: enabled,
                desktop_monitoring_enabled: None,
                screenshot_interval_secs: None,
                expected_version: None,
            })
            .unwrap();
    }

    fn in_both_lists(store: &PolicyStore, kind: ResourceKind, id: &str) -> bool {
        let on = |list| {
            store
                .list_entries(kind, list)
                .unwrap()
                .iter()
                .any(|e| e.identifier == id)
        };
        on(ListKind::Whitelist) && on(ListKind::Blacklist)
    }

    // ── Decisions ──────────────────────────────────────────────

    #[tokio::test]
    async fn test_allow_has_no_side_effect() {
        let h = harness(StaticModerator::allowing());
        let decision = h
            .engine
            .decisions
            .evaluate_website(&visit("https://example.com/a"))
            .await
            .unwrap();
        assert!(decision.is_allowed());
        assert_eq!(decision.source, DecisionSource::Moderation);
        assert!(h.engine.store.get_entry(ResourceKind::Website, "example.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lock_table_does_not_grow_with_blocked_sites() {
        let locks = KeyLocks::new();
        let decisions = DecisionEngine::new(
            PolicyStore::open_in_memory().unwrap(),
            None,
            Arc::new(StaticModerator::blocking("Blocked")),
            locks.clone(),
            1,
        );
        for i in 0..500 {
            let decision = decisions
                .evaluate_website(&visit(&format!("https://site{i}.com")))
                .await
                .unwrap();
            assert_eq!(decision.action, Action::Block);
        }
        assert!(locks.is_empty());
    }

    #[tokio::test]
    async fn test_first_block_creates_blacklist_entry() {
        let h = harness(StaticModerator::blocking("Not during homework"));
        let decision = h
            .engine
            .decisions
            .evaluate_website(&visit("https://www.Games.com/play"))
            .await
            .unwrap();
        assert_eq!(decision.action, Action::Block);
        assert_eq!(decision.reason, "Not during homework");
        assert_eq!(decision.appeals_used, 0);
        assert!(decision.appeal_enabled);

        let entry = h
            .engine
            .store
            .get_entry(ResourceKind::Website, "games.com")
            .unwrap()
            .unwrap();
        assert_eq!(entry.list, ListKind::Blacklist);
        assert_eq!(
            entry.parental_reasoning.as_deref(),
            Some("Matches a blocked category")
        );
        let audit = h.engine.store.audit_log(10).unwrap();
        assert_eq!(audit[0].event_type, "blocked");
    }

    #[tokio::test]
    async fn test_blacklist_short_circuits_moderation() {
        let h = harness(StaticModerator::allowing());
        h.engine
            .policy
            .add(ResourceKind::Website, ListKind::Blacklist, "blockedsite.com", Some("No"))
            .await
            .unwrap();

        for _ in 0..3 {
            let d = h
                .engine
                .decisions
                .evaluate_website(&visit("http://blockedsite.com/x"))
                .await
                .unwrap();
            assert_eq!(d.action, Action::Block);
            assert_eq!(d.reason, "No");
            assert_eq!(d.source, DecisionSource::Blacklist);
        }
        assert_eq!(h.moderator.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_whitelist_allows_without_moderation() {
        let h = harness(StaticModerator::blocking("never"));
        h.engine
            .policy
            .add(ResourceKind::Website, ListKind::Whitelist, "khanacademy.org", None)
            .await
            .unwrap();
        let d = h
            .engine
            .decisions
            .evaluate_website(&visit("https://www.khanacademy.org/math"))
            .await
            .unwrap();
        assert!(d.is_allowed());
        assert_eq!(d.source, DecisionSource::Whitelist);
        assert_eq!(h.moderator.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_guidelines_come_from_settings() {
        let h = harness(StaticModerator::allowing());
        set_auto_approve(&h.engine.store, true);
        h.engine
            .decisions
            .evaluate_website(&visit("https://example.com"))
            .await
            .unwrap();
        assert_eq!(
            h.moderator.last_page().unwrap().guidelines,
            "No games during school"
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_validation_error() {
        let h = harness(StaticModerator::allowing());
        let err = h
            .engine
            .decisions
            .evaluate_website(&visit("   "))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation { .. }));
    }

    // ── Fail closed ────────────────────────────────────────────

    #[tokio::test]
    async fn test_unreachable_moderation_fails_closed_without_entry() {
        let h = harness(StaticModerator::unavailable());
        let d = h
            .engine
            .decisions
            .evaluate_website(&visit("https://unknown.com"))
            .await
            .unwrap();
        assert_eq!(d.action, Action::Block);
        assert_eq!(d.reason, FAIL_CLOSED_REASON);
        assert_eq!(d.source, DecisionSource::FailClosed);
        assert!(!d.appeal_enabled);
        assert!(h.engine.store.get_entry(ResourceKind::Website, "unknown.com").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_closed_reevaluates_on_next_visit() {
        let h = harness(StaticModerator::allowing().then_unavailable());
        let first = h
            .engine
            .decisions
            .evaluate_website(&visit("https://unknown.com"))
            .await
            .unwrap();
        assert_eq!(first.source, DecisionSource::FailClosed);
        let second = h
            .engine
            .decisions
            .evaluate_website(&visit("https://unknown.com"))
            .await
            .unwrap();
        assert!(second.is_allowed());
        assert_eq!(h.moderator.page_calls(), 2);
    }

    // ── Desktop apps ───────────────────────────────────────────

    #[tokio::test]
    async fn test_app_block_stores_screenshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = PolicyStore::open_in_memory().unwrap();
        let shots = ScreenshotStore::open(dir.path()).unwrap();
        let moderator = Arc::new(StaticModerator::blocking("Not now"));
        let engine = Engine::new(
            store,
            Some(shots.clone()),
            moderator,
            Arc::new(LogNotifier),
            1,
        );

        let d = engine
            .decisions
            .evaluate_app(&AppRequest {
                app_name: "  Discord.exe ".into(),
                window_title: Some("friends".into()),
                screenshot: Some(vec![0x89, b'P', b'N', b'G', 1, 2, 3]),
            })
            .await
            .unwrap();
        assert_eq!(d.action, Action::Block);

        let entry = engine
            .store
            .get_entry(ResourceKind::DesktopApp, "discord.exe")
            .unwrap()
            .unwrap();
        let reference = entry.screenshot_ref.unwrap();
        assert_eq!(shots.get(&reference).unwrap()[0], 0x89);
    }

    #[tokio::test]
    async fn test_monitoring_disabled_skips_moderation() {
        let h = harness(StaticModerator::blocking("no"));
        h.engine
            .store
            .save_settings(&SettingsUpdate {
                parent_email: "parent@example.com".into(),
                monitoring_prompt: "anything".into(),
                agent_can_auto_approve: true,
                desktop_monitoring_enabled: Some(false),
                screenshot_interval_secs: None,
                expected_version: None,
            })
            .unwrap();
        let d = h
            .engine
            .decisions
            .evaluate_app(&AppRequest {
                app_name: "steam".into(),
                ..AppRequest::default()
            })
            .await
            .unwrap();
        assert!(d.is_allowed());
        assert_eq!(d.source, DecisionSource::MonitoringDisabled);
        assert_eq!(h.moderator.app_calls(), 0);
    }

    #[tokio::test]
    async fn test_approve_app_is_idempotent() {
        let h = harness(StaticModerator::blocking("no"));
        h.engine
            .decisions
            .evaluate_app(&AppRequest {
                app_name: "Roblox".into(),
                ..AppRequest::default()
            })
            .await
            .unwrap();

        let first = h.engine.appeals.approve_app("roblox").await.unwrap();
        let second = h.engine.appeals.approve_app("ROBLOX ").await.unwrap();
        assert_eq!(first.list, ListKind::Whitelist);
        assert_eq!(first, second);
        assert!(!in_both_lists(&h.engine.store, ResourceKind::DesktopApp, "roblox"));
        assert!(h.engine.store.list_appeals(None).unwrap().is_empty());

        let d = h
            .engine
            .decisions
            .evaluate_app(&AppRequest {
                app_name: "roblox".into(),
                ..AppRequest::default()
            })
            .await
            .unwrap();
        assert!(d.is_allowed());
        assert_eq!(h.moderator.app_calls(), 1);
    }

    // ── Appeals ────────────────────────────────────────────────

    #[tokio::test]
    async fn test_ai_denied_appeal() {
        let h = harness(
            StaticModerator::blocking("Games are blocked")
                .then(ModerationVerdict::block("Games are blocked"))
                .then(ModerationVerdict::block("Still not for homework")),
        );
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();

        let outcome = h
            .engine
            .appeals
            .submit(&appeal("https://games.com", "I finished my homework"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::AiDenied);
        assert_eq!(outcome.reasoning, "Still not for homework");
        assert_eq!(outcome.appeals_used, 1);
        assert!(!outcome.reload);

        let record = h.engine.store.get_appeal(&outcome.appeal_id).unwrap().unwrap();
        assert_eq!(record.state, AppealState::AiDenied);
        assert_eq!(record.ai_decision, AiDecision::Deny);
        assert!(record.resolved_at.is_none());

        let d = h
            .engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        assert_eq!(d.action, Action::Block);
        assert_eq!(d.appeals_used, 1);
        assert!(!d.appeal_enabled);

        let review = h.moderator.last_appeal().unwrap();
        assert_eq!(review.previous_reason, "Games are blocked");
        assert_eq!(review.child_reason, "I finished my homework");
    }

    #[tokio::test]
    async fn test_ai_approved_appeal_whitelists() {
        let h = harness(
            StaticModerator::blocking("Blocked")
                .then(ModerationVerdict::block("Blocked"))
                .then(ModerationVerdict::allow("Fine for homework")),
        );
        h.engine
            .decisions
            .evaluate_website(&visit("https://wiki.org"))
            .await
            .unwrap();
        let outcome = h
            .engine
            .appeals
            .submit(&appeal("https://wiki.org/page", "School project"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::Approved);
        assert!(outcome.reload);

        let entry = h.engine.store.get_entry(ResourceKind::Website, "wiki.org").unwrap().unwrap();
        assert_eq!(entry.list, ListKind::Whitelist);
        assert_eq!(entry.appeals_used, 1);

        let record = h.engine.store.get_appeal(&outcome.appeal_id).unwrap().unwrap();
        assert_eq!(record.state, AppealState::AiApproved);
        assert!(record.resolved_at.is_some());

        let sent = h.notifier.sent.lock();
        assert!(matches!(sent[0], Notification::AutoApproved { .. }));
    }

    #[tokio::test]
    async fn test_appeal_moderation_failure_is_ai_denied() {
        let h = harness(
            StaticModerator::blocking("Blocked")
                .then(ModerationVerdict::block("Blocked"))
                .then_unavailable(),
        );
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        let outcome = h
            .engine
            .appeals
            .submit(&appeal("games.com", "please"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::AiDenied);
        let record = h.engine.store.get_appeal(&outcome.appeal_id).unwrap().unwrap();
        assert_eq!(record.ai_decision, AiDecision::None);
        assert_eq!(record.state, AppealState::AiDenied);
    }

    #[tokio::test]
    async fn test_second_appeal_is_conflict() {
        let h = harness(StaticModerator::blocking("Blocked"));
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        h.engine
            .appeals
            .submit(&appeal("https://games.com", "first"))
            .await
            .unwrap();
        let err = h
            .engine
            .appeals
            .submit(&appeal("https://games.com", "second"))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Conflict(_)));

        let entry = h.engine.store.get_entry(ResourceKind::Website, "games.com").unwrap().unwrap();
        assert_eq!(entry.appeals_used, 1);
    }

    #[tokio::test]
    async fn test_reloaded_appeal_limit_applies() {
        let shared = SharedConfig::new(VigilConfig::default());
        let mut h = harness(StaticModerator::blocking("Blocked"));
        h.engine = h.engine.clone().follow_config(shared.clone());

        let first = h
            .engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        assert!(first.appeal_enabled);
        h.engine
            .appeals
            .submit(&appeal("https://games.com", "first"))
            .await
            .unwrap();
        let exhausted = h
            .engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        assert!(!exhausted.appeal_enabled);

        let mut reloaded = shared.snapshot();
        reloaded.appeals.max_per_resource = 2;
        shared.replace(reloaded);

        let reopened = h
            .engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        assert!(reopened.appeal_enabled);
        h.engine
            .appeals
            .submit(&appeal("https://games.com", "second"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_appeal_requires_blacklist_entry() {
        let h = harness(StaticModerator::allowing());
        let err = h
            .engine
            .appeals
            .submit(&appeal("https://nowhere.com", "please"))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_empty_appeal_reason_is_validation_error() {
        let h = harness(StaticModerator::allowing());
        let err = h
            .engine
            .appeals
            .submit(&appeal("https://games.com", "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation { .. }));
        assert_eq!(h.moderator.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_appeals_charge_once() {
        let h = harness_with(
            StaticModerator::blocking("Blocked").with_delay(Duration::from_millis(20)),
            3,
        );
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();

        let mut tasks = Vec::new();
        for i in 0..5 {
            let appeals = h.engine.appeals.clone();
            tasks.push(tokio::spawn(async move {
                appeals
                    .submit(&appeal("https://games.com", &format!("try {i}")))
                    .await
            }));
        }
        let mut accepted = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(_) => accepted += 1,
                Err(e) => assert!(matches!(e, VigilError::Conflict(_))),
            }
        }
        // The first accepted appeal stays open (AI denied), blocking the rest.
        assert_eq!(accepted, 1);
        let entry = h.engine.store.get_entry(ResourceKind::Website, "games.com").unwrap().unwrap();
        assert_eq!(entry.appeals_used, 1);
    }

    // ── Escalation and parent verdicts ─────────────────────────

    async fn denied_appeal(h: &Harness) -> ApprovalId {
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        let outcome = h
            .engine
            .appeals
            .submit(&appeal("https://games.com", "homework"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::AiDenied);
        outcome.appeal_id
    }

    #[tokio::test]
    async fn test_no_silent_escalation() {
        let h = harness(StaticModerator::blocking("Blocked"));
        let id = denied_appeal(&h).await;
        assert!(h.engine.store.pending_appeals().unwrap().is_empty());
        assert!(h.notifier.sent.lock().is_empty());

        let record = h.engine.store.get_appeal(&id).unwrap().unwrap();
        assert!(!record.escalated_from_ai);
    }

    #[tokio::test]
    async fn test_parent_approve_then_allow_without_moderation() {
        let h = harness(StaticModerator::blocking("Blocked"));
        let id = denied_appeal(&h).await;

        let outcome = h
            .engine
            .appeals
            .escalate(&id, "https://games.com/level", Some("Dad said yes"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::PendingParent);
        let pending = h.engine.store.pending_appeals().unwrap();
        assert_eq!(pending.len(), 1);
        assert!(pending[0].escalated_from_ai);
        assert!(matches!(
            h.notifier.sent.lock()[0],
            Notification::ApprovalNeeded { .. }
        ));

        let calls_before = h.moderator.total_calls();
        let record = h.engine.appeals.resolve(&id, Verdict::Approve).await.unwrap();
        assert_eq!(record.state, AppealState::ParentApproved);
        assert!(record.resolved_at.is_some());
        assert!(h.engine.store.pending_appeals().unwrap().is_empty());

        let d = h
            .engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        assert!(d.is_allowed());
        assert_eq!(h.moderator.total_calls(), calls_before);
        assert!(!in_both_lists(&h.engine.store, ResourceKind::Website, "games.com"));
    }

    #[tokio::test]
    async fn test_escalate_is_idempotent() {
        let h = harness(StaticModerator::blocking("Blocked"));
        let id = denied_appeal(&h).await;
        h.engine.appeals.escalate(&id, "games.com", None).await.unwrap();
        h.engine.appeals.escalate(&id, "games.com", None).await.unwrap();
        assert_eq!(h.engine.store.pending_appeals().unwrap().len(), 1);
        assert_eq!(h.notifier.sent.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_escalate_validation() {
        let h = harness(StaticModerator::blocking("Blocked"));
        let id = denied_appeal(&h).await;

        let err = h
            .engine
            .appeals
            .escalate(&id, "https://other.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Validation { .. }));

        let err = h
            .engine
            .appeals
            .escalate(&uuid::Uuid::new_v4(), "games.com", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_escalate_after_ai_approval_is_conflict() {
        let h = harness(
            StaticModerator::blocking("Blocked")
                .then(ModerationVerdict::block("Blocked"))
                .then(ModerationVerdict::allow("ok")),
        );
        h.engine
            .decisions
            .evaluate_website(&visit("https://wiki.org"))
            .await
            .unwrap();
        let outcome = h
            .engine
            .appeals
            .submit(&appeal("wiki.org", "school"))
            .await
            .unwrap();
        let err = h
            .engine
            .appeals
            .escalate(&outcome.appeal_id, "wiki.org", None)
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_verdict_repeat_and_conflict() {
        let h = harness(StaticModerator::blocking("Blocked"));
        let id = denied_appeal(&h).await;
        h.engine.appeals.escalate(&id, "games.com", None).await.unwrap();

        let denied = h.engine.appeals.resolve(&id, Verdict::Deny).await.unwrap();
        assert_eq!(denied.state, AppealState::ParentDenied);
        let again = h.engine.appeals.resolve(&id, Verdict::Deny).await.unwrap();
        assert_eq!(again.resolved_at, denied.resolved_at);

        let err = h.engine.appeals.resolve(&id, Verdict::Approve).await.unwrap_err();
        assert!(matches!(err, VigilError::Conflict(_)));

        let entry = h.engine.store.get_entry(ResourceKind::Website, "games.com").unwrap().unwrap();
        assert_eq!(entry.list, ListKind::Blacklist);
    }

    #[tokio::test]
    async fn test_verdict_on_unescalated_appeal_is_conflict() {
        let h = harness(StaticModerator::blocking("Blocked"));
        let id = denied_appeal(&h).await;
        let err = h.engine.appeals.resolve(&id, Verdict::Approve).await.unwrap_err();
        assert!(matches!(err, VigilError::Conflict(_)));
    }

    // ── Parent-only mode ───────────────────────────────────────

    #[tokio::test]
    async fn test_parent_only_mode_escalates_directly() {
        let h = harness(StaticModerator::blocking("Blocked"));
        set_auto_approve(&h.engine.store, false);
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        let page_calls = h.moderator.total_calls();

        let outcome = h
            .engine
            .appeals
            .submit(&appeal("https://games.com", "please"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::PendingParent);
        assert_eq!(h.moderator.total_calls(), page_calls);

        let record = h.engine.store.get_appeal(&outcome.appeal_id).unwrap().unwrap();
        assert_eq!(record.state, AppealState::Escalated);
        assert!(!record.escalated_from_ai);

        match &h.notifier.sent.lock()[0] {
            Notification::ApprovalNeeded { parent_email, .. } => {
                assert_eq!(parent_email, "parent@example.com")
            }
            other => panic!("unexpected notification {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notification_failure_does_not_fail_appeal() {
        let store = PolicyStore::open_in_memory().unwrap();
        set_auto_approve(&store, false);
        let engine = Engine::new(
            store,
            None,
            Arc::new(StaticModerator::blocking("Blocked")),
            Arc::new(RecordingNotifier {
                fail: true,
                ..RecordingNotifier::default()
            }),
            1,
        );
        engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        let outcome = engine
            .appeals
            .submit(&appeal("https://games.com", "please"))
            .await
            .unwrap();
        assert_eq!(outcome.status, AppealStatus::PendingParent);
    }

    // ── Parent edits ───────────────────────────────────────────

    #[tokio::test]
    async fn test_parent_edit_moves_between_lists() {
        let h = harness(StaticModerator::blocking("Blocked"));
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        h.engine
            .policy
            .add(ResourceKind::Website, ListKind::Whitelist, "https://GAMES.com", None)
            .await
            .unwrap();
        assert!(!in_both_lists(&h.engine.store, ResourceKind::Website, "games.com"));

        h.engine
            .policy
            .remove(ResourceKind::Website, ListKind::Whitelist, "games.com")
            .await
            .unwrap();
        let err = h
            .engine
            .policy
            .remove(ResourceKind::Website, ListKind::Whitelist, "games.com")
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_parent_edit_during_moderation_wins() {
        let h = harness(StaticModerator::blocking("Blocked").with_delay(Duration::from_millis(50)));
        let decisions = h.engine.decisions.clone();
        let eval = tokio::spawn(async move {
            decisions.evaluate_website(&visit("https://games.com")).await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.engine
            .policy
            .add(ResourceKind::Website, ListKind::Whitelist, "games.com", None)
            .await
            .unwrap();

        let d = eval.await.unwrap().unwrap();
        assert!(d.is_allowed());
        let entry = h.engine.store.get_entry(ResourceKind::Website, "games.com").unwrap().unwrap();
        assert_eq!(entry.list, ListKind::Whitelist);
    }

    // ── Recovery ───────────────────────────────────────────────

    #[tokio::test]
    async fn test_recover_interrupted_appeals() {
        let h = harness(StaticModerator::blocking("Blocked"));
        h.engine
            .decisions
            .evaluate_website(&visit("https://games.com"))
            .await
            .unwrap();
        let record = AppealRecord {
            approval_id: uuid::Uuid::new_v4(),
            kind: ResourceKind::Website,
            resource: "games.com".into(),
            resource_link: "https://games.com".into(),
            child_reason: "please".into(),
            state: AppealState::Submitted,
            ai_decision: AiDecision::None,
            ai_reasoning: None,
            escalated_from_ai: false,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        };
        h.engine.store.begin_appeal(&record, 1).unwrap();

        assert_eq!(h.engine.appeals.recover_interrupted().await.unwrap(), 1);
        let recovered = h.engine.store.get_appeal(&record.approval_id).unwrap().unwrap();
        assert_eq!(recovered.state, AppealState::AiDenied);
        assert_eq!(h.engine.appeals.recover_interrupted().await.unwrap(), 0);

        h.engine
            .appeals
            .escalate(&record.approval_id, "games.com", None)
            .await
            .unwrap();
    }

    fn escalated_record(reason: &str) -> AppealRecord {
        AppealRecord {
            approval_id: uuid::Uuid::nil(),
            kind: ResourceKind::Website,
            resource: "games.com".into(),
            resource_link: "https://games.com/play".into(),
            child_reason: reason.into(),
            state: AppealState::Escalated,
            ai_decision: AiDecision::None,
            ai_reasoning: None,
            escalated_from_ai: false,
            created_at: chrono::Utc::now(),
            resolved_at: None,
        }
    }

    #[test]
    fn test_notification_serializes_with_event_tag() {
        let json = serde_json::to_value(Notification::ApprovalNeeded {
            parent_email: "p@example.com".into(),
            appeal: escalated_record("x"),
        })
        .unwrap();
        assert_eq!(json["event"], "approval_needed");
        assert_eq!(json["appeal"]["state"], "escalated");
    }

    #[test]
    fn test_approval_email_has_links_and_escapes_reason() {
        let message = Notification::ApprovalNeeded {
            parent_email: " p@example.com ".into(),
            appeal: escalated_record("<b>for school</b> & fun"),
        }
        .email("https://vigil.home.example")
        .unwrap();

        let id = uuid::Uuid::nil();
        assert_eq!(message.to, "p@example.com");
        assert!(message.subject.contains("games.com"));
        assert!(message.html.contains(&format!("https://vigil.home.example/respond/{id}/approve")));
        assert!(message.html.contains(&format!("https://vigil.home.example/respond/{id}/deny")));
        assert!(message.html.contains("&lt;b&gt;for school&lt;/b&gt; &amp; fun"));
        assert!(!message.html.contains("<b>for school"));
    }

    #[test]
    fn test_no_email_without_parent_address() {
        let n = Notification::AutoApproved {
            parent_email: "   ".into(),
            appeal: escalated_record("x"),
        };
        assert!(n.email("http://localhost:5000").is_none());
    }

    type Captured = Arc<Mutex<Vec<(String, Option<String>, serde_json::Value)>>>;

    /// Local HTTP endpoint recording every POST as (path, authorization, body).
    async fn capture_server() -> (String, Captured) {
        let seen: Captured = Arc::default();
        let app = axum::Router::new().route(
            "/{*path}",
            axum::routing::post({
                let seen = seen.clone();
                move |uri: axum::http::Uri,
                      headers: axum::http::HeaderMap,
                      axum::Json(body): axum::Json<serde_json::Value>| {
                    let seen = seen.clone();
                    async move {
                        let auth = headers
                            .get("authorization")
                            .and_then(|v| v.to_str().ok())
                            .map(String::from);
                        seen.lock().push((uri.path().to_string(), auth, body));
                    }
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{addr}"), seen)
    }

    #[tokio::test]
    async fn test_configured_notifier_follows_reload() {
        let (base, seen) = capture_server().await;
        let shared = SharedConfig::new(VigilConfig::default());
        let notifier = ConfiguredNotifier::new(shared.clone()).unwrap();
        let notification = Notification::ApprovalNeeded {
            parent_email: "p@example.com".into(),
            appeal: escalated_record("homework"),
        };

        // Nothing configured: logged only.
        notifier.notify(&notification).await.unwrap();
        assert!(seen.lock().is_empty());

        let mut reloaded = shared.snapshot();
        reloaded.notifications.webhook_url = Some(format!("{base}/hook"));
        reloaded.notifications.public_url = Some("https://vigil.home.example".into());
        reloaded.notifications.email = Some(vigil_config::EmailConfig {
            api_url: format!("{base}/mail"),
            api_key: Some("mail-key".into()),
            ..Default::default()
        });
        shared.replace(reloaded);
        notifier.notify(&notification).await.unwrap();

        let seen = seen.lock();
        assert_eq!(seen.len(), 2);
        let (path, _, hook) = &seen[0];
        assert_eq!(path, "/hook");
        assert_eq!(hook["event"], "approval_needed");
        let (path, auth, mail) = &seen[1];
        assert_eq!(path, "/mail");
        assert_eq!(auth.as_deref(), Some("Bearer mail-key"));
        assert_eq!(mail["to"], "p@example.com");
        assert!(mail["html"].as_str().unwrap().contains("https://vigil.home.example/respond/"));
    }

    #[tokio::test]
    async fn test_configured_notifier_reports_failed_delivery() {
        let shared = SharedConfig::new(VigilConfig::default());
        let mut config = shared.snapshot();
        // Nothing listens on port 9 of the loopback address.
        config.notifications.webhook_url = Some("http://127.0.0.1:9/hook".into());
        shared.replace(config);
        let notifier = ConfiguredNotifier::new(shared).unwrap();
        let err = notifier
            .notify(&Notification::AutoApproved {
                parent_email: String::new(),
                appeal: escalated_record("x"),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, VigilError::Transport(_)));
    }
}
