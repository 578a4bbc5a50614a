// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Billing System
//!
//! Tests critical boundary conditions in:
//! - Subscription state transitions
//! - Webhook signature verification
//! - Provider status normalization
//! - Billing period and access windows
//! - Signup opening and reminder dedupe rules
//! - Scheduler task selection

#[cfg(test)]
mod transition_matrix_tests {
    use tradelab_shared::SubscriptionStatus::{self, *};

    const ALL: [SubscriptionStatus; 5] = [Trialing, Active, PastDue, Cancelled, Expired];

    // =========================================================================
    // Full transition matrix - both transition APIs must agree on every pair
    // =========================================================================
    #[test]
    fn matrix_matches_valid_transition_lists() {
        for from in ALL {
            for to in ALL {
                let expected = from.valid_transitions().contains(&to);
                assert_eq!(
                    from.can_transition_to(to),
                    expected,
                    "{} -> {} should be {}",
                    from,
                    to,
                    if expected { "legal" } else { "rejected" }
                );
            }
        }
    }

    // =========================================================================
    // Lifecycle shape: 2 from trialing, 4 from active, 3 from past_due
    // =========================================================================
    #[test]
    fn legal_transition_count_is_nine() {
        let legal = ALL
            .iter()
            .flat_map(|from| ALL.iter().filter(move |to| from.can_transition_to(**to)))
            .count();
        assert_eq!(legal, 9, "lifecycle should have exactly 9 legal moves");
    }

    // =========================================================================
    // Terminal states absorb everything, including repeats of themselves
    // =========================================================================
    #[test]
    fn terminal_states_reject_self_transitions() {
        assert!(!Cancelled.can_transition_to(Cancelled));
        assert!(!Expired.can_transition_to(Expired));
    }
}

#[cfg(test)]
mod webhook_signature_tests {
    use crate::error::BillingError;
    use crate::webhooks::verify_stripe_signature;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use time::OffsetDateTime;

    const SECRET: &str = "whsec_test_secret";
    const PAYLOAD: &str = r#"{"id":"evt_1","type":"checkout.session.completed"}"#;

    fn stripe_header(secret: &str, payload: &str, timestamp: i64) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(format!("{}.{}", timestamp, payload).as_bytes());
        format!(
            "t={},v1={}",
            timestamp,
            hex::encode(mac.finalize().into_bytes())
        )
    }

    // =========================================================================
    // Timestamp 295s old - inside the 300s tolerance even if the test is slow
    // =========================================================================
    #[test]
    fn near_tolerance_timestamp_accepted() {
        let ts = OffsetDateTime::now_utc().unix_timestamp() - 295;
        let header = stripe_header(SECRET, PAYLOAD, ts);
        assert!(verify_stripe_signature(PAYLOAD, &header, SECRET).is_ok());
    }

    // =========================================================================
    // Future-dated timestamp - rejected the same as a stale one
    // =========================================================================
    #[test]
    fn future_dated_timestamp_rejected() {
        let ts = OffsetDateTime::now_utc().unix_timestamp() + 400;
        let header = stripe_header(SECRET, PAYLOAD, ts);
        let err = verify_stripe_signature(PAYLOAD, &header, SECRET).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    // =========================================================================
    // Unknown scheme entries (v0=...) are ignored, not treated as failures
    // =========================================================================
    #[test]
    fn unknown_schemes_in_header_ignored() {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("{},v0=legacy_scheme_junk", stripe_header(SECRET, PAYLOAD, ts));
        assert!(verify_stripe_signature(PAYLOAD, &header, SECRET).is_ok());
    }

    // =========================================================================
    // Header with timestamp but no v1 entry - rejected
    // =========================================================================
    #[test]
    fn header_without_signature_entries_rejected() {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = format!("t={}", ts);
        let err = verify_stripe_signature(PAYLOAD, &header, SECRET).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }

    // =========================================================================
    // Wrong secret produces a different digest - rejected in constant time
    // =========================================================================
    #[test]
    fn wrong_secret_rejected() {
        let ts = OffsetDateTime::now_utc().unix_timestamp();
        let header = stripe_header("whsec_other_secret", PAYLOAD, ts);
        let err = verify_stripe_signature(PAYLOAD, &header, SECRET).unwrap_err();
        assert!(matches!(err, BillingError::SignatureInvalid));
    }
}

#[cfg(test)]
mod provider_status_tests {
    use crate::flutterwave::map_charge_status;
    use crate::nowpayments::map_payment_status;
    use crate::providers::PaymentStatus;

    // =========================================================================
    // Terminal success strings activate; everything else must not
    // =========================================================================
    #[test]
    fn success_strings_map_to_succeeded() {
        assert_eq!(map_charge_status("successful"), PaymentStatus::Succeeded);
        assert_eq!(map_payment_status("finished"), PaymentStatus::Succeeded);
        assert_eq!(map_payment_status("confirmed"), PaymentStatus::Succeeded);
    }

    // =========================================================================
    // Terminal failure strings mark the payment failed
    // =========================================================================
    #[test]
    fn failure_strings_map_to_failed() {
        assert_eq!(map_charge_status("failed"), PaymentStatus::Failed);
        assert_eq!(map_payment_status("failed"), PaymentStatus::Failed);
        assert_eq!(map_payment_status("refunded"), PaymentStatus::Failed);
        assert_eq!(map_payment_status("expired"), PaymentStatus::Failed);
    }

    // =========================================================================
    // Unknown or interim strings stay pending - nothing activates on them
    // =========================================================================
    #[test]
    fn unknown_status_never_auto_succeeds() {
        for status in ["pending", "waiting", "confirming", "partially_paid", "???"] {
            assert_eq!(
                map_charge_status(status),
                PaymentStatus::Pending,
                "flutterwave '{}' must stay pending",
                status
            );
            assert_eq!(
                map_payment_status(status),
                PaymentStatus::Pending,
                "nowpayments '{}' must stay pending",
                status
            );
        }
    }

    // =========================================================================
    // Providers send lowercase; any other casing is treated as unrecognized
    // =========================================================================
    #[test]
    fn status_matching_is_case_sensitive() {
        assert_eq!(map_charge_status("SUCCESSFUL"), PaymentStatus::Pending);
        assert_eq!(map_payment_status("Finished"), PaymentStatus::Pending);
    }
}

#[cfg(test)]
mod access_window_tests {
    use time::{Duration, OffsetDateTime};
    use tradelab_shared::{SubscriptionStatus, UserSubscription};
    use uuid::Uuid;

    fn subscription(status: SubscriptionStatus, period_end: OffsetDateTime) -> UserSubscription {
        let now = OffsetDateTime::now_utc();
        UserSubscription {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            plan_id: Uuid::new_v4(),
            status,
            current_period_start: now - Duration::days(30),
            current_period_end: period_end,
            cancelled_at: None,
            reminder_sent_for: None,
            created_at: now - Duration::days(30),
            updated_at: now,
        }
    }

    // =========================================================================
    // At the exact period boundary: access is already gone, but the period
    // does not count as elapsed until strictly after the boundary
    // =========================================================================
    #[test]
    fn boundary_instant_ends_access_before_elapse() {
        let now = OffsetDateTime::now_utc();
        let trial = subscription(SubscriptionStatus::Trialing, now);
        let cancelled = subscription(SubscriptionStatus::Cancelled, now);

        assert!(!trial.has_access(now), "trial access ends at the boundary");
        assert!(!cancelled.has_access(now), "cancelled access ends at the boundary");
        assert!(
            !trial.period_elapsed(now),
            "period is not elapsed at the exact boundary"
        );
    }

    // =========================================================================
    // One second past the boundary the period is elapsed
    // =========================================================================
    #[test]
    fn one_second_past_boundary_is_elapsed() {
        let now = OffsetDateTime::now_utc();
        let sub = subscription(SubscriptionStatus::Active, now - Duration::seconds(1));
        assert!(sub.period_elapsed(now));
        assert!(sub.has_access(now), "active keeps access until the sweep expires it");
    }
}

#[cfg(test)]
mod signup_opening_tests {
    use crate::subscriptions::signup_opening;
    use time::OffsetDateTime;
    use tradelab_shared::{BillingCycle, SubscriptionPlan, SubscriptionStatus};
    use uuid::Uuid;

    fn plan(price_cents: i64, cycle: BillingCycle) -> SubscriptionPlan {
        let now = OffsetDateTime::now_utc();
        SubscriptionPlan {
            id: Uuid::new_v4(),
            name: "starter".to_string(),
            display_name: "Starter".to_string(),
            price_cents,
            currency: "USD".to_string(),
            billing_cycle: cycle,
            features: serde_json::json!([]),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    // =========================================================================
    // Zero-price signup: active immediately, full cycle, no trial window
    // =========================================================================
    #[test]
    fn zero_price_signup_activates_immediately() {
        let (status, days) = signup_opening(&plan(0, BillingCycle::Monthly), 7);
        assert_eq!(status, SubscriptionStatus::Active);
        assert_eq!(days, 30, "free signups get a full cycle, not the trial window");
    }

    // =========================================================================
    // One cent is already a paid plan - only exactly zero is free
    // =========================================================================
    #[test]
    fn one_cent_plan_waits_for_payment() {
        let (status, days) = signup_opening(&plan(1, BillingCycle::Monthly), 7);
        assert_eq!(status, SubscriptionStatus::Trialing);
        assert_eq!(days, 7);
    }

    #[test]
    fn negative_trial_window_clamps_to_zero() {
        let (status, days) = signup_opening(&plan(2999, BillingCycle::Yearly), -3);
        assert_eq!(status, SubscriptionStatus::Trialing);
        assert_eq!(days, 0);
    }
}

#[cfg(test)]
mod reminder_marker_tests {
    use crate::scheduler::reminder_owed;
    use time::{Duration, OffsetDateTime};

    // =========================================================================
    // Never-reminded period: a reminder is owed
    // =========================================================================
    #[test]
    fn unmarked_period_owes_a_reminder() {
        let period_end = OffsetDateTime::now_utc() + Duration::days(2);
        assert!(reminder_owed(None, period_end));
    }

    // =========================================================================
    // Marker matching the current period end dedupes repeat sweeps
    // =========================================================================
    #[test]
    fn marker_for_current_period_dedupes() {
        let period_end = OffsetDateTime::now_utc() + Duration::days(2);
        assert!(!reminder_owed(Some(period_end), period_end));
    }

    // =========================================================================
    // A renewal moves the period end, so an old marker re-arms the reminder
    // =========================================================================
    #[test]
    fn renewal_re_arms_the_reminder() {
        let old_end = OffsetDateTime::now_utc() + Duration::days(2);
        let renewed_end = old_end + Duration::days(30);
        assert!(reminder_owed(Some(old_end), renewed_end));
    }
}

#[cfg(test)]
mod scheduler_task_tests {
    use crate::scheduler::{AVAILABLE_TASKS, TASK_EXPIRATION, TASK_PENDING_REAPER, TASK_REMINDERS};

    // =========================================================================
    // Every task constant is runnable through the trigger endpoint filter
    // =========================================================================
    #[test]
    fn task_names_are_registered() {
        assert_eq!(AVAILABLE_TASKS.len(), 3);
        for task in [TASK_EXPIRATION, TASK_REMINDERS, TASK_PENDING_REAPER] {
            assert!(AVAILABLE_TASKS.contains(&task), "{} should be runnable", task);
        }
    }
}

#[cfg(test)]
mod serialization_tests {
    use crate::providers::PaymentStatus;
    use serde_json::json;
    use tradelab_shared::{BillingCycle, SubscriptionStatus};

    // =========================================================================
    // JSON casing is a wire contract with the frontend - lock it down
    // =========================================================================
    #[test]
    fn payment_status_serializes_lowercase() {
        assert_eq!(serde_json::to_value(PaymentStatus::Pending).unwrap(), json!("pending"));
        assert_eq!(
            serde_json::to_value(PaymentStatus::Succeeded).unwrap(),
            json!("succeeded")
        );
        assert_eq!(serde_json::to_value(PaymentStatus::Failed).unwrap(), json!("failed"));
    }

    #[test]
    fn subscription_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(SubscriptionStatus::PastDue).unwrap(),
            json!("past_due")
        );
        assert_eq!(
            serde_json::to_value(SubscriptionStatus::Trialing).unwrap(),
            json!("trialing")
        );
    }

    #[test]
    fn billing_cycle_serializes_lowercase() {
        assert_eq!(serde_json::to_value(BillingCycle::Monthly).unwrap(), json!("monthly"));
        assert_eq!(serde_json::to_value(BillingCycle::Yearly).unwrap(), json!("yearly"));
    }
}

#[cfg(test)]
mod notification_template_tests {
    use crate::notifications::templates;

    // =========================================================================
    // Template names are a contract with the notification service
    // =========================================================================
    #[test]
    fn template_names_are_stable() {
        assert_eq!(templates::SUBSCRIPTION_ACTIVATED, "subscription_activated");
        assert_eq!(templates::PAYMENT_FAILED, "payment_failed");
        assert_eq!(templates::SUBSCRIPTION_CANCELLED, "subscription_cancelled");
        assert_eq!(templates::SUBSCRIPTION_EXPIRED, "subscription_expired");
        assert_eq!(templates::RENEWAL_REMINDER, "renewal_reminder");
    }
}
