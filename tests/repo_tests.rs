#![cfg(all(feature = "inmem-store", not(feature = "postgres-store")))]

use chrono::NaiveDate;

use velo::auth::Role;
use velo::models::*;
use velo::repo::inmem::InMemRepo;
use velo::repo::{BikeFilter, BikeRepo, BookingRepo, RepoError, ReviewRepo, UserRepo, VendorRepo};

fn new_user(email: &str) -> NewUser {
    NewUser {
        name: "Tester".into(),
        email: email.into(),
        password: "unused".into(),
    }
}

fn new_bike(title: &str) -> NewBike {
    NewBike {
        title: title.into(),
        model: "M".into(),
        category: "city".into(),
        price_per_day_cents: 1200,
        location: "Rotterdam".into(),
    }
}

fn date(s: &str) -> NaiveDate {
    s.parse().unwrap()
}

/// user + verified vendor + one bike, the starting point for most tests.
async fn seed(repo: &InMemRepo) -> (User, Vendor, Bike) {
    let user = repo
        .create_user(new_user("owner@velo.test"), "hash".into(), Role::Vendor)
        .await
        .unwrap();
    let vendor = repo
        .create_vendor(
            user.id,
            NewVendor { shop_name: "Shop".into(), description: String::new() },
        )
        .await
        .unwrap();
    let vendor = repo.set_vendor_verified(vendor.id, true).await.unwrap();
    let bike = repo.create_bike(vendor.id, new_bike("Cruiser")).await.unwrap();
    (user, vendor, bike)
}

#[tokio::test]
async fn duplicate_email_conflicts() {
    let repo = InMemRepo::new();
    repo.create_user(new_user("a@velo.test"), "h".into(), Role::User).await.unwrap();
    let err = repo
        .create_user(new_user("a@velo.test"), "h".into(), Role::User)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn one_vendor_record_per_user() {
    let repo = InMemRepo::new();
    let user = repo.create_user(new_user("v@velo.test"), "h".into(), Role::User).await.unwrap();
    repo.create_vendor(user.id, NewVendor { shop_name: "A".into(), description: String::new() })
        .await
        .unwrap();
    let err = repo
        .create_vendor(user.id, NewVendor { shop_name: "B".into(), description: String::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn average_rating_aggregates_over_reviews() {
    let repo = InMemRepo::new();
    let (_, _, bike) = seed(&repo).await;
    assert_eq!(repo.get_bike(bike.id).await.unwrap().avg_rating, None);

    let r1 = repo.create_user(new_user("r1@velo.test"), "h".into(), Role::User).await.unwrap();
    let r2 = repo.create_user(new_user("r2@velo.test"), "h".into(), Role::User).await.unwrap();
    repo.create_review(r1.id, NewReview { bike_id: bike.id, rating: 4, comment: String::new() })
        .await
        .unwrap();
    repo.create_review(r2.id, NewReview { bike_id: bike.id, rating: 5, comment: String::new() })
        .await
        .unwrap();

    assert_eq!(repo.get_bike(bike.id).await.unwrap().avg_rating, Some(4.5));

    // One review per user per bike.
    let err = repo
        .create_review(r1.id, NewReview { bike_id: bike.id, rating: 1, comment: String::new() })
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn booking_total_is_days_times_daily_price() {
    let repo = InMemRepo::new();
    let (_, _, bike) = seed(&repo).await;
    let renter = repo.create_user(new_user("r@velo.test"), "h".into(), Role::User).await.unwrap();
    let booking = repo
        .create_booking(
            renter.id,
            NewBooking { bike_id: bike.id, start_date: date("2026-08-10"), end_date: date("2026-08-14") },
        )
        .await
        .unwrap();
    assert_eq!(booking.total_amount_cents, 4 * 1200);
    assert_eq!(booking.status, BookingStatus::Pending);
    assert_eq!(booking.vendor_id, bike.vendor_id);
    assert!(!booking.reference.is_empty());
}

#[tokio::test]
async fn booking_rejects_bad_ranges_and_dead_bikes() {
    let repo = InMemRepo::new();
    let (_, _, bike) = seed(&repo).await;
    let renter = repo.create_user(new_user("r@velo.test"), "h".into(), Role::User).await.unwrap();

    let err = repo
        .create_booking(
            renter.id,
            NewBooking { bike_id: bike.id, start_date: date("2026-08-14"), end_date: date("2026-08-10") },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Invalid(_)));

    repo.update_bike(
        bike.id,
        UpdateBike { available: Some(false), title: None, model: None, category: None, price_per_day_cents: None, location: None },
    )
    .await
    .unwrap();
    let err = repo
        .create_booking(
            renter.id,
            NewBooking { bike_id: bike.id, start_date: date("2026-08-10"), end_date: date("2026-08-12") },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::NotFound));
}

#[tokio::test]
async fn settled_bookings_are_immutable() {
    let repo = InMemRepo::new();
    let (_, _, bike) = seed(&repo).await;
    let renter = repo.create_user(new_user("r@velo.test"), "h".into(), Role::User).await.unwrap();
    let booking = repo
        .create_booking(
            renter.id,
            NewBooking { bike_id: bike.id, start_date: date("2026-08-10"), end_date: date("2026-08-12") },
        )
        .await
        .unwrap();
    repo.set_booking_status(booking.id, BookingStatus::Cancelled).await.unwrap();
    let err = repo
        .set_booking_status(booking.id, BookingStatus::Confirmed)
        .await
        .unwrap_err();
    assert!(matches!(err, RepoError::Conflict));
}

#[tokio::test]
async fn soft_deleted_bikes_are_filtered_unless_asked() {
    let repo = InMemRepo::new();
    let (_, _, bike) = seed(&repo).await;
    repo.soft_delete_bike(bike.id).await.unwrap();

    let visible = repo.list_bikes(&BikeFilter::default(), false).await.unwrap();
    assert!(visible.is_empty());
    let all = repo.list_bikes(&BikeFilter::default(), true).await.unwrap();
    assert_eq!(all.len(), 1);

    repo.restore_bike(bike.id).await.unwrap();
    let visible = repo.list_bikes(&BikeFilter::default(), false).await.unwrap();
    assert_eq!(visible.len(), 1);
}

#[tokio::test]
async fn category_filter_is_exact_and_location_is_substring() {
    let repo = InMemRepo::new();
    let (_, vendor, _) = seed(&repo).await;
    let mut moto = new_bike("Tourer");
    moto.category = "motorcycle".into();
    moto.location = "Den Haag".into();
    repo.create_bike(vendor.id, moto).await.unwrap();

    let filter = BikeFilter { category: Some("MOTORCYCLE".into()), location: None };
    assert_eq!(repo.list_bikes(&filter, false).await.unwrap().len(), 1);
    let filter = BikeFilter { category: None, location: Some("haag".into()) };
    assert_eq!(repo.list_bikes(&filter, false).await.unwrap().len(), 1);
    let filter = BikeFilter { category: Some("road".into()), location: None };
    assert!(repo.list_bikes(&filter, false).await.unwrap().is_empty());
}

#[tokio::test]
async fn hard_deleting_a_vendor_drops_its_bikes() {
    let repo = InMemRepo::new();
    let (_, vendor, _) = seed(&repo).await;
    repo.hard_delete_vendor(vendor.id).await.unwrap();
    assert!(matches!(repo.get_vendor(vendor.id).await.unwrap_err(), RepoError::NotFound));
    assert!(repo.list_bikes(&BikeFilter::default(), true).await.unwrap().is_empty());
}

#[tokio::test]
async fn snapshot_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    {
        let repo = InMemRepo::with_snapshot(dir.path());
        repo.create_user(new_user("persist@velo.test"), "h".into(), Role::User)
            .await
            .unwrap();
    }
    let repo = InMemRepo::with_snapshot(dir.path());
    let user = repo.get_user_by_email("persist@velo.test").await.unwrap();
    assert_eq!(user.name, "Tester");
}
