use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{NaiveDate, NaiveTime, TimeZone};
use chrono_tz::Tz;

use super::*;
use crate::limits::*;
use crate::store::{BookingRepository, MemoryStore};

/// Tuesday, 2030-01-01 12:00 UTC.
fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 12, 0, 0).unwrap()
}

fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2030, 1, 7).unwrap()
}

fn at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 7, h, m, 0).unwrap()
}

fn t(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

struct Fixture {
    engine: Arc<Engine>,
    store: Arc<MemoryStore>,
    workspace: Workspace,
}

async fn setup_with(timezone: Tz, auto_confirm: bool) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let workspace = Workspace {
        id: Ulid::new(),
        name: "Clinic".into(),
        timezone,
        business_hours: LocalWindow { start: t(9, 0), end: t(17, 0) },
        auto_confirm,
    };
    crate::store::WorkspaceDirectory::upsert_workspace(store.as_ref(), &workspace)
        .await
        .unwrap();
    let engine = Engine::new(Stores::from_backend(store.clone()), Arc::new(NotifyHub::new())).with_clock(fixed_now);
    Fixture { engine: Arc::new(engine), store, workspace }
}

async fn setup() -> Fixture {
    setup_with(Tz::UTC, false).await
}

impl Fixture {
    fn ws(&self) -> Ulid {
        self.workspace.id
    }

    /// Booking type open Mondays 09:00–11:00.
    async fn consultation(&self, minutes: u32) -> BookingType {
        let bt = self
            .engine
            .create_booking_type(
                self.ws(),
                NewBookingType {
                    name: "Consultation".into(),
                    duration_minutes: minutes,
                    location: Some("Room 4".into()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        self.engine
            .add_rule(self.ws(), bt.id, NewRule { day_of_week: 1, start_time: t(9, 0), end_time: t(11, 0) })
            .await
            .unwrap();
        bt
    }

    async fn contact(&self, email: &str) -> Contact {
        self.engine
            .find_or_create_contact(
                self.ws(),
                &ContactDetails {
                    first_name: "Ada".into(),
                    last_name: "Lovelace".into(),
                    email: Some(email.into()),
                    phone: None,
                },
            )
            .await
            .unwrap()
    }

    fn request(&self, bt: &BookingType, contact: &Contact, start: DateTime<Utc>) -> ReservationRequest {
        ReservationRequest {
            workspace_id: self.ws(),
            booking_type_id: bt.id,
            contact_id: contact.id,
            start,
            notes: None,
            metadata: None,
        }
    }

    async fn slot_starts(&self, bt: &BookingType, date: NaiveDate) -> Vec<DateTime<Utc>> {
        self.engine
            .available_slots(self.ws(), bt.id, date)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.start_time)
            .collect()
    }
}

fn public_request(bt: &BookingType, start: DateTime<Utc>, contact: ContactDetails) -> PublicBookingRequest {
    PublicBookingRequest { booking_type_id: bt.id, start_time: start, contact, notes: None }
}

fn details(first: &str, last: &str, email: Option<&str>, phone: Option<&str>) -> ContactDetails {
    ContactDetails {
        first_name: first.into(),
        last_name: last.into(),
        email: email.map(Into::into),
        phone: phone.map(Into::into),
    }
}

// ── Availability ─────────────────────────────────────────

#[tokio::test]
async fn monday_window_lists_four_half_hour_slots() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;

    let slots = fx.engine.available_slots(fx.ws(), bt.id, monday()).await.unwrap();
    let starts: Vec<_> = slots.iter().map(|s| s.start_time).collect();
    assert_eq!(starts, vec![at(9, 0), at(9, 30), at(10, 0), at(10, 30)]);
    assert!(slots.iter().all(|s| s.duration == 30 && s.end_time - s.start_time == chrono::Duration::minutes(30)));
}

#[tokio::test]
async fn confirmed_booking_removes_its_slot() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 30))).await.unwrap();
    fx.engine
        .transition_status(fx.ws(), booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();

    assert_eq!(fx.slot_starts(&bt, monday()).await, vec![at(9, 0), at(10, 0), at(10, 30)]);
}

#[tokio::test]
async fn other_weekdays_and_past_dates_are_empty() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let tuesday = NaiveDate::from_ymd_opt(2030, 1, 8).unwrap();
    let last_monday = NaiveDate::from_ymd_opt(2029, 12, 31).unwrap();
    assert!(fx.slot_starts(&bt, tuesday).await.is_empty());
    assert!(fx.slot_starts(&bt, last_monday).await.is_empty());
}

#[tokio::test]
async fn availability_beyond_horizon_is_rejected() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let far = fixed_now().date_naive() + chrono::Duration::days(MAX_BOOKING_HORIZON_DAYS + 7);
    let err = fx.engine.available_slots(fx.ws(), bt.id, far).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "date", .. }));
}

#[tokio::test]
async fn rules_follow_workspace_timezone() {
    let fx = setup_with(chrono_tz::Europe::Berlin, false).await;
    let bt = fx.consultation(60).await;
    // 09:00 and 10:00 in Berlin winter time are 08:00 and 09:00 UTC.
    assert_eq!(fx.slot_starts(&bt, monday()).await, vec![at(8, 0), at(9, 0)]);
}

#[tokio::test]
async fn unknown_or_foreign_booking_type_is_not_found() {
    let fx = setup().await;
    let other = setup().await;
    let foreign = other.consultation(30).await;

    let err = fx.engine.available_slots(fx.ws(), foreign.id, monday()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "booking type", .. }));
    let err = fx.engine.available_slots(Ulid::new(), foreign.id, monday()).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "workspace", .. }));
}

// ── Reservation ──────────────────────────────────────────

#[tokio::test]
async fn reserve_commits_pending_booking_with_reference() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(10, 0))).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.start_time, at(10, 0));
    assert_eq!(booking.end_time, at(10, 30));
    assert!(is_reference_code(&booking.reference_code));
    assert_eq!(booking.metadata, serde_json::json!({}));
    assert_eq!(fx.engine.get_booking(fx.ws(), booking.id).await.unwrap(), booking);
}

#[tokio::test]
async fn auto_confirm_workspace_starts_confirmed() {
    let fx = setup_with(Tz::UTC, true).await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
}

#[tokio::test]
async fn reserve_rejects_start_off_the_slot_grid() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    for start in [at(9, 15), at(11, 0), at(8, 30)] {
        let err = fx.engine.reserve(fx.request(&bt, &contact, start)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation { field: "startTime", .. }), "{start}");
    }
    assert_eq!(fx.store.booking_count(), 0);
}

#[tokio::test]
async fn reserve_rejects_past_slot() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let last_monday = Utc.with_ymd_and_hms(2029, 12, 31, 9, 0, 0).unwrap();
    let err = fx.engine.reserve(fx.request(&bt, &contact, last_monday)).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "startTime", .. }));
}

#[tokio::test]
async fn reserve_rejects_inactive_booking_type() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    fx.engine
        .update_booking_type(fx.ws(), bt.id, BookingTypeUpdate { is_active: Some(false), ..Default::default() })
        .await
        .unwrap();

    let err = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "bookingTypeId", .. }));
    assert!(fx.engine.list_public_booking_types(fx.ws()).await.unwrap().is_empty());
}

#[tokio::test]
async fn reserve_rejects_contact_of_another_workspace() {
    let fx = setup().await;
    let other = setup().await;
    let bt = fx.consultation(30).await;
    let stranger = other.contact("eve@example.com").await;
    let err = fx.engine.reserve(fx.request(&bt, &stranger, at(9, 0))).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "contact", .. }));
}

#[tokio::test]
async fn second_reservation_of_same_slot_conflicts() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    let err = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotConflict { .. }));
    // Adjacent slot is unaffected.
    fx.engine.reserve(fx.request(&bt, &contact, at(9, 30))).await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn simultaneous_requests_for_one_slot_commit_once() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    let first = fx.engine.clone();
    let second = fx.engine.clone();
    let (a, b) = tokio::join!(
        tokio::spawn({
            let req = fx.request(&bt, &contact, at(10, 0));
            async move { first.reserve(req).await }
        }),
        tokio::spawn({
            let req = fx.request(&bt, &contact, at(10, 0));
            async move { second.reserve(req).await }
        }),
    );
    let results = [a.unwrap(), b.unwrap()];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(EngineError::SlotConflict { .. })))
            .count(),
        1
    );
    assert_eq!(fx.store.booking_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_load_never_double_books() {
    let fx = setup().await;
    let bt = fx.consultation(15).await; // 8 slots
    let contact = fx.contact("ada@example.com").await;
    let starts = fx.slot_starts(&bt, monday()).await;
    assert_eq!(starts.len(), 8);

    let tasks: Vec<_> = (0..64)
        .map(|i| {
            let engine = fx.engine.clone();
            let req = fx.request(&bt, &contact, starts[i % starts.len()]);
            tokio::spawn(async move { engine.reserve(req).await })
        })
        .collect();
    let results = futures::future::join_all(tasks).await;
    let committed = results.iter().filter(|r| matches!(r, Ok(Ok(_)))).count();
    assert_eq!(committed, starts.len());

    let all = fx.engine.list_bookings(fx.ws(), BookingFilter::default()).await.unwrap();
    let active: Vec<_> = all.iter().filter(|b| b.status.blocks_schedule()).collect();
    for (i, a) in active.iter().enumerate() {
        for b in &active[i + 1..] {
            assert!(!a.span().overlaps(&b.span()), "{} overlaps {}", a.reference_code, b.reference_code);
        }
    }
    let codes: HashSet<_> = all.iter().map(|b| b.reference_code.as_str()).collect();
    assert_eq!(codes.len(), all.len());
    assert!(fx.slot_starts(&bt, monday()).await.is_empty());
}

#[tokio::test]
async fn booking_types_do_not_block_each_other() {
    let fx = setup().await;
    let a = fx.consultation(30).await;
    let b = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    fx.engine.reserve(fx.request(&a, &contact, at(9, 0))).await.unwrap();
    fx.engine.reserve(fx.request(&b, &contact, at(9, 0))).await.unwrap();
}

#[tokio::test]
async fn duration_change_only_affects_future_slots() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();

    fx.engine
        .update_booking_type(fx.ws(), bt.id, BookingTypeUpdate { duration_minutes: Some(60), ..Default::default() })
        .await
        .unwrap();

    let stored = fx.engine.get_booking(fx.ws(), booking.id).await.unwrap();
    assert_eq!(stored.end_time, at(9, 30));
    // 09:00 is still taken, so the hour grid only offers 10:00.
    assert_eq!(fx.slot_starts(&bt, monday()).await, vec![at(10, 0)]);
}

#[tokio::test]
async fn reserve_publishes_created_event() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let mut rx = fx.engine.notify.subscribe(fx.ws());

    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    assert_eq!(rx.try_recv().unwrap(), BookingEvent::Created(booking));
}

#[tokio::test]
async fn oversized_notes_are_rejected_before_commit() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let mut req = fx.request(&bt, &contact, at(9, 0));
    req.notes = Some("x".repeat(MAX_NOTES_LEN + 1));
    let err = fx.engine.reserve(req).await.unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "notes", .. }));
    assert_eq!(fx.store.booking_count(), 0);
}

// ── Lifecycle ────────────────────────────────────────────

#[tokio::test]
async fn lifecycle_runs_to_completion_then_locks() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    let mut rx = fx.engine.notify.subscribe(fx.ws());

    let confirmed = fx
        .engine
        .transition_status(fx.ws(), booking.id, BookingStatus::Confirmed)
        .await
        .unwrap();
    assert_eq!(confirmed.status, BookingStatus::Confirmed);
    assert_eq!(confirmed.updated_at, fixed_now());
    let completed = fx
        .engine
        .transition_status(fx.ws(), booking.id, BookingStatus::Completed)
        .await
        .unwrap();
    assert_eq!(completed.status, BookingStatus::Completed);

    let err = fx
        .engine
        .transition_status(fx.ws(), booking.id, BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition { from: BookingStatus::Completed, to: BookingStatus::Cancelled }
    ));
    let stored = fx.engine.get_booking(fx.ws(), booking.id).await.unwrap();
    assert_eq!(stored.status, BookingStatus::Completed);

    match rx.try_recv().unwrap() {
        BookingEvent::StatusChanged { booking, from } => {
            assert_eq!(from, BookingStatus::Pending);
            assert_eq!(booking.status, BookingStatus::Confirmed);
        }
        other => panic!("unexpected event {other:?}"),
    }
}

#[tokio::test]
async fn pending_cannot_skip_to_completed() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    let err = fx
        .engine
        .transition_status(fx.ws(), booking.id, BookingStatus::Completed)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition { .. }));
}

#[tokio::test]
async fn no_show_frees_the_slot() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(10, 0))).await.unwrap();
    assert!(!fx.slot_starts(&bt, monday()).await.contains(&at(10, 0)));

    fx.engine
        .transition_status(fx.ws(), booking.id, BookingStatus::NoShow)
        .await
        .unwrap();
    assert!(fx.slot_starts(&bt, monday()).await.contains(&at(10, 0)));
    fx.engine.reserve(fx.request(&bt, &contact, at(10, 0))).await.unwrap();
}

#[tokio::test]
async fn cancelled_booking_frees_the_slot() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    fx.engine
        .transition_status(fx.ws(), booking.id, BookingStatus::Cancelled)
        .await
        .unwrap();
    fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
}

#[tokio::test]
async fn transition_of_foreign_booking_is_not_found() {
    let fx = setup().await;
    let other = setup().await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;
    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();

    let err = other
        .engine
        .transition_status(other.ws(), booking.id, BookingStatus::Cancelled)
        .await;
    assert!(err.is_err());
    let err = fx
        .engine
        .transition_status(other.ws(), booking.id, BookingStatus::Cancelled)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "booking", .. }));
}

// ── Public gateway ───────────────────────────────────────

#[tokio::test]
async fn public_booking_returns_confirmation() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;

    let confirmation = fx
        .engine
        .submit_public_booking(
            fx.ws(),
            public_request(&bt, at(9, 30), details("Grace", "Hopper", Some("Grace@Example.com"), None)),
        )
        .await
        .unwrap();

    assert_eq!(confirmation.contact.display_name, "Grace Hopper");
    assert_eq!(confirmation.contact.email.as_deref(), Some("grace@example.com"));
    assert_eq!(confirmation.booking_type.name, "Consultation");
    assert_eq!(confirmation.booking_type.duration, 30);
    assert_eq!(confirmation.booking_type.location.as_deref(), Some("Room 4"));
    assert_eq!(confirmation.start_time, at(9, 30));
    assert_eq!(confirmation.end_time, at(10, 0));
    assert_eq!(confirmation.status, BookingStatus::Pending);
    assert!(is_reference_code(&confirmation.reference_code));

    let bookings = fx.engine.upcoming_bookings(fx.ws()).await.unwrap();
    assert_eq!(bookings.len(), 1);
    assert_eq!(bookings[0].metadata["source"], "public");
}

#[tokio::test]
async fn repeat_public_booker_reuses_contact_and_keeps_stored_fields() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;

    fx.engine
        .submit_public_booking(
            fx.ws(),
            public_request(&bt, at(9, 0), details("Grace", "Hopper", Some("grace@example.com"), Some("+1 555 0100"))),
        )
        .await
        .unwrap();
    fx.engine
        .submit_public_booking(
            fx.ws(),
            public_request(&bt, at(10, 0), details("Amazing Grace", "", Some("GRACE@example.com"), None)),
        )
        .await
        .unwrap();

    let bookings = fx.engine.list_bookings(fx.ws(), BookingFilter::default()).await.unwrap();
    assert_eq!(bookings.len(), 2);
    assert_eq!(bookings[0].contact_id, bookings[1].contact_id);

    let contact = crate::store::ContactDirectory::contact(fx.store.as_ref(), bookings[0].contact_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(contact.first_name, "Amazing Grace");
    assert_eq!(contact.last_name, "Hopper");
    assert_eq!(contact.phone.as_deref(), Some("+1 555 0100"));
}

#[tokio::test]
async fn phone_only_bookers_are_never_merged() {
    let fx = setup().await;
    let first = fx
        .engine
        .find_or_create_contact(fx.ws(), &details("Sam", "", None, Some("+1 555 0101")))
        .await
        .unwrap();
    let second = fx
        .engine
        .find_or_create_contact(fx.ws(), &details("Sam", "", None, Some("+1 555 0101")))
        .await
        .unwrap();
    assert_ne!(first.id, second.id);
}

#[tokio::test]
async fn public_booking_validates_contact_before_writing() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;

    let err = fx
        .engine
        .submit_public_booking(fx.ws(), public_request(&bt, at(9, 0), details("", "X", Some("x@example.com"), None)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "firstName", .. }));

    let err = fx
        .engine
        .submit_public_booking(fx.ws(), public_request(&bt, at(9, 0), details("Ada", "", None, None)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "email", .. }));
    assert_eq!(fx.store.booking_count(), 0);
}

#[tokio::test]
async fn public_booking_for_unknown_workspace_creates_nothing() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let err = fx
        .engine
        .submit_public_booking(Ulid::new(), public_request(&bt, at(9, 0), details("Ada", "", Some("a@example.com"), None)))
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "workspace", .. }));
    assert!(
        crate::store::ContactDirectory::find_by_email(fx.store.as_ref(), fx.ws(), "a@example.com")
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn public_booking_conflict_surfaces() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let req = public_request(&bt, at(9, 0), details("Ada", "", Some("a@example.com"), None));
    fx.engine.submit_public_booking(fx.ws(), req.clone()).await.unwrap();
    let err = fx.engine.submit_public_booking(fx.ws(), req).await.unwrap_err();
    assert!(matches!(err, EngineError::SlotConflict { .. }));
}

// ── Catalog ──────────────────────────────────────────────

#[tokio::test]
async fn business_hours_seed_weekday_rules() {
    let fx = setup().await;
    let bt = fx
        .engine
        .create_booking_type(
            fx.ws(),
            NewBookingType {
                name: "Intro call".into(),
                duration_minutes: 60,
                use_business_hours: true,
                ..Default::default()
            },
        )
        .await
        .unwrap();
    let rules = fx.engine.list_rules(fx.ws(), bt.id).await.unwrap();
    let days: Vec<u8> = rules.iter().map(|r| r.day_of_week).collect();
    assert_eq!(days, vec![1, 2, 3, 4, 5]);
    assert!(rules.iter().all(|r| r.start_time == t(9, 0) && r.end_time == t(17, 0)));
    assert_eq!(fx.slot_starts(&bt, monday()).await.len(), 8);
}

#[tokio::test]
async fn booking_type_validation() {
    let fx = setup().await;
    let err = fx
        .engine
        .create_booking_type(fx.ws(), NewBookingType { name: "  ".into(), duration_minutes: 30, ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "name", .. }));

    let err = fx
        .engine
        .create_booking_type(fx.ws(), NewBookingType { name: "Zero".into(), duration_minutes: 0, ..Default::default() })
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation { field: "duration", .. }));
}

#[tokio::test]
async fn rules_can_be_removed() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    let rules = fx.engine.list_rules(fx.ws(), bt.id).await.unwrap();
    assert_eq!(rules.len(), 1);

    fx.engine.remove_rule(fx.ws(), bt.id, rules[0].id).await.unwrap();
    assert!(fx.slot_starts(&bt, monday()).await.is_empty());

    let err = fx.engine.remove_rule(fx.ws(), bt.id, rules[0].id).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound { entity: "availability rule", .. }));
}

#[tokio::test]
async fn overlapping_rules_are_unioned() {
    let fx = setup().await;
    let bt = fx.consultation(60).await;
    fx.engine
        .add_rule(fx.ws(), bt.id, NewRule { day_of_week: 1, start_time: t(9, 30), end_time: t(11, 30) })
        .await
        .unwrap();
    assert_eq!(
        fx.slot_starts(&bt, monday()).await,
        vec![at(9, 0), at(9, 30), at(10, 0), at(10, 30)]
    );
}

// ── Staff lists ──────────────────────────────────────────

#[tokio::test]
async fn today_and_upcoming_lists() {
    let fx = setup().await;
    let bt = fx.consultation(30).await;
    // Tuesday afternoon, the fixed "today".
    fx.engine
        .add_rule(fx.ws(), bt.id, NewRule { day_of_week: 2, start_time: t(13, 0), end_time: t(14, 0) })
        .await
        .unwrap();
    let contact = fx.contact("ada@example.com").await;
    let today_start = Utc.with_ymd_and_hms(2030, 1, 1, 13, 0, 0).unwrap();

    let today = fx.engine.reserve(fx.request(&bt, &contact, today_start)).await.unwrap();
    let monday_booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    let cancelled = fx.engine.reserve(fx.request(&bt, &contact, at(10, 0))).await.unwrap();
    fx.engine
        .transition_status(fx.ws(), cancelled.id, BookingStatus::Cancelled)
        .await
        .unwrap();

    let todays: Vec<_> = fx.engine.todays_bookings(fx.ws()).await.unwrap().into_iter().map(|b| b.id).collect();
    assert_eq!(todays, vec![today.id]);

    let upcoming: Vec<_> = fx.engine.upcoming_bookings(fx.ws()).await.unwrap().into_iter().map(|b| b.id).collect();
    assert_eq!(upcoming, vec![today.id, monday_booking.id]);

    let only_cancelled = fx
        .engine
        .list_bookings(
            fx.ws(),
            BookingFilter { statuses: vec![BookingStatus::Cancelled], ..Default::default() },
        )
        .await
        .unwrap();
    assert_eq!(only_cancelled.len(), 1);
    assert_eq!(only_cancelled[0].id, cancelled.id);
}

/// Booking repository whose first `collisions` inserts report a reference
/// code already taken.
struct CollidingBookings {
    inner: Arc<MemoryStore>,
    collisions_left: AtomicUsize,
    attempts: AtomicUsize,
    codes: std::sync::Mutex<Vec<String>>,
}

#[async_trait::async_trait]
impl BookingRepository for CollidingBookings {
    async fn booking(&self, id: Ulid) -> Result<Option<Booking>, EngineError> {
        self.inner.booking(id).await
    }

    async fn bookings(&self, workspace_id: Ulid, filter: &BookingFilter) -> Result<Vec<Booking>, EngineError> {
        self.inner.bookings(workspace_id, filter).await
    }

    async fn active_in_range(&self, booking_type_id: Ulid, window: &Span) -> Result<Vec<Booking>, EngineError> {
        self.inner.active_in_range(booking_type_id, window).await
    }

    async fn insert_if_free(&self, booking: &Booking) -> Result<(), EngineError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.codes.lock().unwrap().push(booking.reference_code.clone());
        let collide = self
            .collisions_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if collide {
            return Err(EngineError::ReferenceCollision(booking.reference_code.clone()));
        }
        self.inner.insert_if_free(booking).await
    }

    async fn update_status(
        &self,
        id: Ulid,
        expected: BookingStatus,
        next: BookingStatus,
        at: DateTime<Utc>,
    ) -> Result<Booking, EngineError> {
        self.inner.update_status(id, expected, next, at).await
    }
}

async fn setup_colliding(collisions: usize) -> (Fixture, Arc<CollidingBookings>) {
    let base = setup().await;
    let bookings = Arc::new(CollidingBookings {
        inner: base.store.clone(),
        collisions_left: AtomicUsize::new(collisions),
        attempts: AtomicUsize::new(0),
        codes: std::sync::Mutex::new(Vec::new()),
    });
    let stores = Stores { bookings: bookings.clone(), ..Stores::from_backend(base.store.clone()) };
    let engine = Engine::new(stores, Arc::new(NotifyHub::new())).with_clock(fixed_now);
    let fx = Fixture { engine: Arc::new(engine), store: base.store, workspace: base.workspace };
    (fx, bookings)
}

#[tokio::test]
async fn reference_collisions_are_retried_with_fresh_codes() {
    let (fx, bookings) = setup_colliding(MAX_REFERENCE_ATTEMPTS - 1).await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    let booking = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap();
    assert!(is_reference_code(&booking.reference_code));
    assert_eq!(bookings.attempts.load(Ordering::SeqCst), MAX_REFERENCE_ATTEMPTS);
    assert_eq!(fx.store.booking_count(), 1);
    let codes = bookings.codes.lock().unwrap().clone();
    assert_eq!(codes.iter().collect::<HashSet<_>>().len(), codes.len());
    assert_eq!(codes.last(), Some(&booking.reference_code));
}

#[tokio::test]
async fn reference_collisions_give_up_after_the_attempt_limit() {
    let (fx, bookings) = setup_colliding(MAX_REFERENCE_ATTEMPTS).await;
    let bt = fx.consultation(30).await;
    let contact = fx.contact("ada@example.com").await;

    let err = fx.engine.reserve(fx.request(&bt, &contact, at(9, 0))).await.unwrap_err();
    assert!(matches!(err, EngineError::Internal(_)), "got {err:?}");
    assert_eq!(bookings.attempts.load(Ordering::SeqCst), MAX_REFERENCE_ATTEMPTS);
    assert_eq!(fx.store.booking_count(), 0);
    assert!(fx.slot_starts(&bt, monday()).await.contains(&at(9, 0)));
}
