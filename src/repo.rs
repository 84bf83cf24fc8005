use crate::auth::Role;
use crate::models::*;

use async_trait::async_trait;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")] NotFound,
    #[error("conflict")] Conflict,
    #[error("invalid: {0}")] Invalid(String),
    #[error("internal: {0}")] Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Listing filter for the public bike catalogue.
#[derive(Debug, Clone, Default)]
pub struct BikeFilter {
    pub category: Option<String>,
    pub location: Option<String>,
}

#[async_trait]
pub trait UserRepo: Send + Sync {
    async fn create_user(&self, new: NewUser, password_hash: String, role: Role) -> RepoResult<User>;
    async fn get_user(&self, id: Id) -> RepoResult<User>;
    async fn get_user_by_email(&self, email: &str) -> RepoResult<User>;
    async fn list_users(&self) -> RepoResult<Vec<User>>;
    async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User>;
}

#[async_trait]
pub trait VendorRepo: Send + Sync {
    async fn create_vendor(&self, user_id: Id, new: NewVendor) -> RepoResult<Vendor>;
    async fn get_vendor(&self, id: Id) -> RepoResult<Vendor>;
    async fn get_vendor_by_user(&self, user_id: Id) -> RepoResult<Vendor>;
    async fn set_vendor_verified(&self, id: Id, verified: bool) -> RepoResult<Vendor>;
    async fn soft_delete_vendor(&self, id: Id) -> RepoResult<()>;
    async fn restore_vendor(&self, id: Id) -> RepoResult<()>;
    async fn hard_delete_vendor(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait BikeRepo: Send + Sync {
    async fn list_bikes(&self, filter: &BikeFilter, include_deleted: bool) -> RepoResult<Vec<Bike>>;
    async fn get_bike(&self, id: Id) -> RepoResult<Bike>;
    async fn list_vendor_bikes(&self, vendor_id: Id, include_deleted: bool) -> RepoResult<Vec<Bike>>;
    async fn create_bike(&self, vendor_id: Id, new: NewBike) -> RepoResult<Bike>;
    async fn update_bike(&self, id: Id, upd: UpdateBike) -> RepoResult<Bike>;
    async fn soft_delete_bike(&self, id: Id) -> RepoResult<()>;
    async fn restore_bike(&self, id: Id) -> RepoResult<()>;
    async fn hard_delete_bike(&self, id: Id) -> RepoResult<()>;
}

#[async_trait]
pub trait BookingRepo: Send + Sync {
    async fn create_booking(&self, user_id: Id, new: NewBooking) -> RepoResult<Booking>;
    async fn get_booking(&self, id: Id) -> RepoResult<Booking>;
    async fn list_user_bookings(&self, user_id: Id) -> RepoResult<Vec<Booking>>;
    async fn list_vendor_bookings(&self, vendor_id: Id) -> RepoResult<Vec<Booking>>;
    async fn set_booking_status(&self, id: Id, status: BookingStatus) -> RepoResult<Booking>;
}

#[async_trait]
pub trait ReviewRepo: Send + Sync {
    async fn create_review(&self, user_id: Id, new: NewReview) -> RepoResult<Review>;
    async fn list_bike_reviews(&self, bike_id: Id) -> RepoResult<Vec<Review>>;
}

pub trait Repo: UserRepo + VendorRepo + BikeRepo + BookingRepo + ReviewRepo {}

impl<T> Repo for T where T: UserRepo + VendorRepo + BikeRepo + BookingRepo + ReviewRepo {}

/// Rental length in days; bookings shorter than one day are invalid.
pub(crate) fn rental_days(start: chrono::NaiveDate, end: chrono::NaiveDate) -> RepoResult<i64> {
    let days = (end - start).num_days();
    if days < 1 {
        return Err(RepoError::Invalid("end_date must be after start_date".into()));
    }
    Ok(days)
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};
    use uuid::Uuid;

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        users: HashMap<Id, User>,
        vendors: HashMap<Id, Vendor>,
        bikes: HashMap<Id, Bike>,
        bookings: HashMap<Id, Booking>,
        reviews: HashMap<Id, Review>,
        next_id: Id,
    }

    impl State {
        fn next_id(&mut self) -> Id {
            self.next_id += 1;
            self.next_id
        }

        /// Bikes carry their rating aggregate on the way out.
        fn rated(&self, bike: &Bike) -> Bike {
            let ratings: Vec<i64> = self
                .reviews
                .values()
                .filter(|r| r.bike_id == bike.id)
                .map(|r| i64::from(r.rating))
                .collect();
            let avg_rating = if ratings.is_empty() {
                None
            } else {
                Some(ratings.iter().sum::<i64>() as f64 / ratings.len() as f64)
            };
            Bike { avg_rating, ..bike.clone() }
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Option<Arc<PathBuf>>,
    }

    impl InMemRepo {
        pub fn new() -> Self {
            Self {
                state: Arc::new(RwLock::new(State::default())),
                snapshot_path: None,
            }
        }

        /// Snapshot-backed store: loads `<dir>/state.json` if present and
        /// rewrites it after every mutation.
        pub fn with_snapshot(dir: &Path) -> Self {
            let path = dir.join("state.json");
            let state = match std::fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        tracing::info!(path = %path.display(), "loaded snapshot");
                        s
                    }
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "snapshot unreadable, starting empty");
                        State::default()
                    }
                },
                Err(_) => State::default(),
            };
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Some(Arc::new(path)),
            }
        }

        fn persist(&self) {
            let Some(path) = &self.snapshot_path else { return };
            let bytes = match serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(error = %e, "snapshot serialize failed");
                    return;
                }
            };
            if let Some(dir) = path.parent() {
                let _ = std::fs::create_dir_all(dir);
            }
            if let Err(e) = std::fs::write(path.as_ref(), bytes) {
                tracing::warn!(path = %path.display(), error = %e, "snapshot write failed");
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl UserRepo for InMemRepo {
        async fn create_user(
            &self,
            new: NewUser,
            password_hash: String,
            role: Role,
        ) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            if s.users.values().any(|u| u.email == new.email) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let user = User {
                id,
                name: new.name,
                email: new.email,
                password_hash,
                role,
                created_at: Utc::now(),
                deleted_at: None,
            };
            s.users.insert(id, user.clone());
            drop(s);
            self.persist();
            Ok(user)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
            let s = self.state.read().unwrap();
            s.users
                .values()
                .find(|u| u.email == email)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s.users.values().cloned().collect();
            v.sort_by_key(|u| u.id);
            Ok(v)
        }

        async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User> {
            let mut s = self.state.write().unwrap();
            let user = s.users.get_mut(&id).ok_or(RepoError::NotFound)?;
            user.role = role;
            let updated = user.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl VendorRepo for InMemRepo {
        async fn create_vendor(&self, user_id: Id, new: NewVendor) -> RepoResult<Vendor> {
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            if s.vendors.values().any(|v| v.user_id == user_id) {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let vendor = Vendor {
                id,
                user_id,
                shop_name: new.shop_name,
                description: new.description,
                verified: false,
                created_at: Utc::now(),
                deleted_at: None,
            };
            s.vendors.insert(id, vendor.clone());
            drop(s);
            self.persist();
            Ok(vendor)
        }

        async fn get_vendor(&self, id: Id) -> RepoResult<Vendor> {
            let s = self.state.read().unwrap();
            s.vendors.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn get_vendor_by_user(&self, user_id: Id) -> RepoResult<Vendor> {
            let s = self.state.read().unwrap();
            s.vendors
                .values()
                .find(|v| v.user_id == user_id)
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn set_vendor_verified(&self, id: Id, verified: bool) -> RepoResult<Vendor> {
            let mut s = self.state.write().unwrap();
            let vendor = s.vendors.get_mut(&id).ok_or(RepoError::NotFound)?;
            vendor.verified = verified;
            let updated = vendor.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_vendor(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let vendor = s.vendors.get_mut(&id).ok_or(RepoError::NotFound)?;
            vendor.deleted_at = Some(Utc::now());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn restore_vendor(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let vendor = s.vendors.get_mut(&id).ok_or(RepoError::NotFound)?;
            vendor.deleted_at = None;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn hard_delete_vendor(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.vendors.remove(&id).ok_or(RepoError::NotFound)?;
            s.bikes.retain(|_, b| b.vendor_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl BikeRepo for InMemRepo {
        async fn list_bikes(
            &self,
            filter: &BikeFilter,
            include_deleted: bool,
        ) -> RepoResult<Vec<Bike>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .bikes
                .values()
                .filter(|b| include_deleted || b.deleted_at.is_none())
                .filter(|b| {
                    filter
                        .category
                        .as_ref()
                        .map_or(true, |c| b.category.eq_ignore_ascii_case(c))
                })
                .filter(|b| {
                    filter.location.as_ref().map_or(true, |l| {
                        b.location.to_lowercase().contains(&l.to_lowercase())
                    })
                })
                .map(|b| s.rated(b))
                .collect();
            v.sort_by_key(|b| b.id);
            Ok(v)
        }

        async fn get_bike(&self, id: Id) -> RepoResult<Bike> {
            let s = self.state.read().unwrap();
            s.bikes.get(&id).map(|b| s.rated(b)).ok_or(RepoError::NotFound)
        }

        async fn list_vendor_bikes(
            &self,
            vendor_id: Id,
            include_deleted: bool,
        ) -> RepoResult<Vec<Bike>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .bikes
                .values()
                .filter(|b| b.vendor_id == vendor_id)
                .filter(|b| include_deleted || b.deleted_at.is_none())
                .map(|b| s.rated(b))
                .collect();
            v.sort_by_key(|b| b.id);
            Ok(v)
        }

        async fn create_bike(&self, vendor_id: Id, new: NewBike) -> RepoResult<Bike> {
            let mut s = self.state.write().unwrap();
            match s.vendors.get(&vendor_id) {
                Some(v) if v.deleted_at.is_none() => {}
                _ => return Err(RepoError::NotFound),
            }
            let id = s.next_id();
            let bike = Bike {
                id,
                vendor_id,
                title: new.title,
                model: new.model,
                category: new.category,
                price_per_day_cents: new.price_per_day_cents,
                location: new.location,
                available: true,
                avg_rating: None,
                created_at: Utc::now(),
                deleted_at: None,
            };
            s.bikes.insert(id, bike.clone());
            drop(s);
            self.persist();
            Ok(bike)
        }

        async fn update_bike(&self, id: Id, upd: UpdateBike) -> RepoResult<Bike> {
            let mut s = self.state.write().unwrap();
            let bike = s.bikes.get_mut(&id).ok_or(RepoError::NotFound)?;
            if let Some(title) = upd.title {
                bike.title = title;
            }
            if let Some(model) = upd.model {
                bike.model = model;
            }
            if let Some(category) = upd.category {
                bike.category = category;
            }
            if let Some(price) = upd.price_per_day_cents {
                bike.price_per_day_cents = price;
            }
            if let Some(location) = upd.location {
                bike.location = location;
            }
            if let Some(available) = upd.available {
                bike.available = available;
            }
            let updated = bike.clone();
            let updated = s.rated(&updated);
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn soft_delete_bike(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let bike = s.bikes.get_mut(&id).ok_or(RepoError::NotFound)?;
            bike.deleted_at = Some(Utc::now());
            drop(s);
            self.persist();
            Ok(())
        }

        async fn restore_bike(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            let bike = s.bikes.get_mut(&id).ok_or(RepoError::NotFound)?;
            bike.deleted_at = None;
            drop(s);
            self.persist();
            Ok(())
        }

        async fn hard_delete_bike(&self, id: Id) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.bikes.remove(&id).ok_or(RepoError::NotFound)?;
            s.reviews.retain(|_, r| r.bike_id != id);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl BookingRepo for InMemRepo {
        async fn create_booking(&self, user_id: Id, new: NewBooking) -> RepoResult<Booking> {
            let days = rental_days(new.start_date, new.end_date)?;
            let mut s = self.state.write().unwrap();
            if !s.users.contains_key(&user_id) {
                return Err(RepoError::NotFound);
            }
            let bike = match s.bikes.get(&new.bike_id) {
                Some(b) if b.deleted_at.is_none() && b.available => b.clone(),
                _ => return Err(RepoError::NotFound),
            };
            // No reservation lock: overlapping bookings of the same bike are
            // not serialized and both may succeed.
            let id = s.next_id();
            let booking = Booking {
                id,
                reference: Uuid::new_v4().to_string(),
                user_id,
                vendor_id: bike.vendor_id,
                bike_id: bike.id,
                start_date: new.start_date,
                end_date: new.end_date,
                status: BookingStatus::Pending,
                total_amount_cents: days * bike.price_per_day_cents,
                created_at: Utc::now(),
            };
            s.bookings.insert(id, booking.clone());
            drop(s);
            self.persist();
            Ok(booking)
        }

        async fn get_booking(&self, id: Id) -> RepoResult<Booking> {
            let s = self.state.read().unwrap();
            s.bookings.get(&id).cloned().ok_or(RepoError::NotFound)
        }

        async fn list_user_bookings(&self, user_id: Id) -> RepoResult<Vec<Booking>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .bookings
                .values()
                .filter(|b| b.user_id == user_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn list_vendor_bookings(&self, vendor_id: Id) -> RepoResult<Vec<Booking>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .bookings
                .values()
                .filter(|b| b.vendor_id == vendor_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(v)
        }

        async fn set_booking_status(&self, id: Id, status: BookingStatus) -> RepoResult<Booking> {
            let mut s = self.state.write().unwrap();
            let booking = s.bookings.get_mut(&id).ok_or(RepoError::NotFound)?;
            if booking.status.is_terminal() {
                return Err(RepoError::Conflict);
            }
            booking.status = status;
            let updated = booking.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }
    }

    #[async_trait]
    impl ReviewRepo for InMemRepo {
        async fn create_review(&self, user_id: Id, new: NewReview) -> RepoResult<Review> {
            let mut s = self.state.write().unwrap();
            match s.bikes.get(&new.bike_id) {
                Some(b) if b.deleted_at.is_none() => {}
                _ => return Err(RepoError::NotFound),
            }
            if s
                .reviews
                .values()
                .any(|r| r.bike_id == new.bike_id && r.user_id == user_id)
            {
                return Err(RepoError::Conflict);
            }
            let id = s.next_id();
            let review = Review {
                id,
                bike_id: new.bike_id,
                user_id,
                rating: new.rating,
                comment: new.comment,
                created_at: Utc::now(),
            };
            s.reviews.insert(id, review.clone());
            drop(s);
            self.persist();
            Ok(review)
        }

        async fn list_bike_reviews(&self, bike_id: Id) -> RepoResult<Vec<Review>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .reviews
                .values()
                .filter(|r| r.bike_id == bike_id)
                .cloned()
                .collect();
            v.sort_by(|a, b| a.created_at.cmp(&b.created_at));
            Ok(v)
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, Row};
    use std::str::FromStr;
    use uuid::Uuid;

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        match e {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            e => RepoError::Internal(e.to_string()),
        }
    }

    fn user_from_row(row: &sqlx::postgres::PgRow) -> RepoResult<User> {
        let role_str: String = row.try_get("role").map_err(internal)?;
        let role = Role::from_str(&role_str)
            .map_err(|_| RepoError::Internal(format!("unknown role '{role_str}'")))?;
        Ok(User {
            id: row.try_get("id").map_err(internal)?,
            name: row.try_get("name").map_err(internal)?,
            email: row.try_get("email").map_err(internal)?,
            password_hash: row.try_get("password_hash").map_err(internal)?,
            role,
            created_at: row.try_get("created_at").map_err(internal)?,
            deleted_at: row.try_get("deleted_at").map_err(internal)?,
        })
    }

    fn booking_from_row(row: &sqlx::postgres::PgRow) -> RepoResult<Booking> {
        let status_str: String = row.try_get("status").map_err(internal)?;
        let status = match status_str.as_str() {
            "pending" => BookingStatus::Pending,
            "confirmed" => BookingStatus::Confirmed,
            "cancelled" => BookingStatus::Cancelled,
            "completed" => BookingStatus::Completed,
            other => return Err(RepoError::Internal(format!("unknown status '{other}'"))),
        };
        Ok(Booking {
            id: row.try_get("id").map_err(internal)?,
            reference: row.try_get("reference").map_err(internal)?,
            user_id: row.try_get("user_id").map_err(internal)?,
            vendor_id: row.try_get("vendor_id").map_err(internal)?,
            bike_id: row.try_get("bike_id").map_err(internal)?,
            start_date: row.try_get("start_date").map_err(internal)?,
            end_date: row.try_get("end_date").map_err(internal)?,
            status,
            total_amount_cents: row.try_get("total_amount_cents").map_err(internal)?,
            created_at: row.try_get("created_at").map_err(internal)?,
        })
    }

    const BIKE_COLS: &str = "b.id, b.vendor_id, b.title, b.model, b.category, \
         b.price_per_day_cents, b.location, b.available, \
         (SELECT AVG(r.rating)::float8 FROM reviews r WHERE r.bike_id = b.id) AS avg_rating, \
         b.created_at, b.deleted_at";

    #[async_trait]
    impl UserRepo for PgRepo {
        async fn create_user(
            &self,
            new: NewUser,
            password_hash: String,
            role: Role,
        ) -> RepoResult<User> {
            let row = sqlx::query(
                "INSERT INTO users (name, email, password_hash, role) VALUES ($1,$2,$3,$4) \
                 RETURNING id, name, email, password_hash, role, created_at, deleted_at",
            )
            .bind(&new.name)
            .bind(&new.email)
            .bind(&password_hash)
            .bind(role.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
                e => internal(e),
            })?;
            user_from_row(&row)
        }

        async fn get_user(&self, id: Id) -> RepoResult<User> {
            let row = sqlx::query(
                "SELECT id, name, email, password_hash, role, created_at, deleted_at \
                 FROM users WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            user_from_row(&row)
        }

        async fn get_user_by_email(&self, email: &str) -> RepoResult<User> {
            let row = sqlx::query(
                "SELECT id, name, email, password_hash, role, created_at, deleted_at \
                 FROM users WHERE email = $1",
            )
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            user_from_row(&row)
        }

        async fn list_users(&self) -> RepoResult<Vec<User>> {
            let rows = sqlx::query(
                "SELECT id, name, email, password_hash, role, created_at, deleted_at \
                 FROM users ORDER BY id",
            )
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(user_from_row).collect()
        }

        async fn set_user_role(&self, id: Id, role: Role) -> RepoResult<User> {
            let row = sqlx::query(
                "UPDATE users SET role = $2 WHERE id = $1 \
                 RETURNING id, name, email, password_hash, role, created_at, deleted_at",
            )
            .bind(id)
            .bind(role.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            user_from_row(&row)
        }
    }

    #[async_trait]
    impl VendorRepo for PgRepo {
        async fn create_vendor(&self, user_id: Id, new: NewVendor) -> RepoResult<Vendor> {
            sqlx::query("SELECT id FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            sqlx::query_as::<_, Vendor>(
                "INSERT INTO vendors (user_id, shop_name, description) VALUES ($1,$2,$3) \
                 RETURNING id, user_id, shop_name, description, verified, created_at, deleted_at",
            )
            .bind(user_id)
            .bind(&new.shop_name)
            .bind(&new.description)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
                e => internal(e),
            })
        }

        async fn get_vendor(&self, id: Id) -> RepoResult<Vendor> {
            sqlx::query_as::<_, Vendor>(
                "SELECT id, user_id, shop_name, description, verified, created_at, deleted_at \
                 FROM vendors WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }

        async fn get_vendor_by_user(&self, user_id: Id) -> RepoResult<Vendor> {
            sqlx::query_as::<_, Vendor>(
                "SELECT id, user_id, shop_name, description, verified, created_at, deleted_at \
                 FROM vendors WHERE user_id = $1",
            )
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }

        async fn set_vendor_verified(&self, id: Id, verified: bool) -> RepoResult<Vendor> {
            sqlx::query_as::<_, Vendor>(
                "UPDATE vendors SET verified = $2 WHERE id = $1 \
                 RETURNING id, user_id, shop_name, description, verified, created_at, deleted_at",
            )
            .bind(id)
            .bind(verified)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)
        }

        async fn soft_delete_vendor(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE vendors SET deleted_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn restore_vendor(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE vendors SET deleted_at = NULL WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn hard_delete_vendor(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM vendors WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BikeRepo for PgRepo {
        async fn list_bikes(
            &self,
            filter: &BikeFilter,
            include_deleted: bool,
        ) -> RepoResult<Vec<Bike>> {
            let sql = format!(
                "SELECT {BIKE_COLS} FROM bikes b \
                 WHERE ($1 OR b.deleted_at IS NULL) \
                 AND ($2::text IS NULL OR lower(b.category) = lower($2)) \
                 AND ($3::text IS NULL OR b.location ILIKE '%' || $3 || '%') \
                 ORDER BY b.id"
            );
            sqlx::query_as::<_, Bike>(&sql)
                .bind(include_deleted)
                .bind(filter.category.as_deref())
                .bind(filter.location.as_deref())
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn get_bike(&self, id: Id) -> RepoResult<Bike> {
            let sql = format!("SELECT {BIKE_COLS} FROM bikes b WHERE b.id = $1");
            sqlx::query_as::<_, Bike>(&sql)
                .bind(id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)
        }

        async fn list_vendor_bikes(
            &self,
            vendor_id: Id,
            include_deleted: bool,
        ) -> RepoResult<Vec<Bike>> {
            let sql = format!(
                "SELECT {BIKE_COLS} FROM bikes b \
                 WHERE b.vendor_id = $1 AND ($2 OR b.deleted_at IS NULL) ORDER BY b.id"
            );
            sqlx::query_as::<_, Bike>(&sql)
                .bind(vendor_id)
                .bind(include_deleted)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)
        }

        async fn create_bike(&self, vendor_id: Id, new: NewBike) -> RepoResult<Bike> {
            sqlx::query("SELECT id FROM vendors WHERE id = $1 AND deleted_at IS NULL")
                .bind(vendor_id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            let row = sqlx::query(
                "INSERT INTO bikes (vendor_id, title, model, category, price_per_day_cents, location) \
                 VALUES ($1,$2,$3,$4,$5,$6) RETURNING id",
            )
            .bind(vendor_id)
            .bind(&new.title)
            .bind(&new.model)
            .bind(&new.category)
            .bind(new.price_per_day_cents)
            .bind(&new.location)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            let id: Id = row.try_get("id").map_err(internal)?;
            self.get_bike(id).await
        }

        async fn update_bike(&self, id: Id, upd: UpdateBike) -> RepoResult<Bike> {
            let res = sqlx::query(
                "UPDATE bikes SET \
                   title = COALESCE($2, title), \
                   model = COALESCE($3, model), \
                   category = COALESCE($4, category), \
                   price_per_day_cents = COALESCE($5, price_per_day_cents), \
                   location = COALESCE($6, location), \
                   available = COALESCE($7, available) \
                 WHERE id = $1",
            )
            .bind(id)
            .bind(upd.title.as_deref())
            .bind(upd.model.as_deref())
            .bind(upd.category.as_deref())
            .bind(upd.price_per_day_cents)
            .bind(upd.location.as_deref())
            .bind(upd.available)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            self.get_bike(id).await
        }

        async fn soft_delete_bike(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE bikes SET deleted_at = now() WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn restore_bike(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("UPDATE bikes SET deleted_at = NULL WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }

        async fn hard_delete_bike(&self, id: Id) -> RepoResult<()> {
            let res = sqlx::query("DELETE FROM bikes WHERE id = $1")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::NotFound);
            }
            Ok(())
        }
    }

    #[async_trait]
    impl BookingRepo for PgRepo {
        async fn create_booking(&self, user_id: Id, new: NewBooking) -> RepoResult<Booking> {
            let days = rental_days(new.start_date, new.end_date)?;
            let bike = self.get_bike(new.bike_id).await?;
            if bike.deleted_at.is_some() || !bike.available {
                return Err(RepoError::NotFound);
            }
            // No reservation lock: overlapping bookings of the same bike are
            // not serialized and both may succeed.
            let row = sqlx::query(
                "INSERT INTO bookings \
                   (reference, user_id, vendor_id, bike_id, start_date, end_date, status, total_amount_cents) \
                 VALUES ($1,$2,$3,$4,$5,$6,'pending',$7) \
                 RETURNING id, reference, user_id, vendor_id, bike_id, start_date, end_date, \
                           status, total_amount_cents, created_at",
            )
            .bind(Uuid::new_v4().to_string())
            .bind(user_id)
            .bind(bike.vendor_id)
            .bind(bike.id)
            .bind(new.start_date)
            .bind(new.end_date)
            .bind(days * bike.price_per_day_cents)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            booking_from_row(&row)
        }

        async fn get_booking(&self, id: Id) -> RepoResult<Booking> {
            let row = sqlx::query(
                "SELECT id, reference, user_id, vendor_id, bike_id, start_date, end_date, \
                        status, total_amount_cents, created_at \
                 FROM bookings WHERE id = $1",
            )
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            booking_from_row(&row)
        }

        async fn list_user_bookings(&self, user_id: Id) -> RepoResult<Vec<Booking>> {
            let rows = sqlx::query(
                "SELECT id, reference, user_id, vendor_id, bike_id, start_date, end_date, \
                        status, total_amount_cents, created_at \
                 FROM bookings WHERE user_id = $1 ORDER BY created_at DESC",
            )
            .bind(user_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(booking_from_row).collect()
        }

        async fn list_vendor_bookings(&self, vendor_id: Id) -> RepoResult<Vec<Booking>> {
            let rows = sqlx::query(
                "SELECT id, reference, user_id, vendor_id, bike_id, start_date, end_date, \
                        status, total_amount_cents, created_at \
                 FROM bookings WHERE vendor_id = $1 ORDER BY created_at DESC",
            )
            .bind(vendor_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            rows.iter().map(booking_from_row).collect()
        }

        async fn set_booking_status(&self, id: Id, status: BookingStatus) -> RepoResult<Booking> {
            let current = self.get_booking(id).await?;
            if current.status.is_terminal() {
                return Err(RepoError::Conflict);
            }
            let status_str = match status {
                BookingStatus::Pending => "pending",
                BookingStatus::Confirmed => "confirmed",
                BookingStatus::Cancelled => "cancelled",
                BookingStatus::Completed => "completed",
            };
            let row = sqlx::query(
                "UPDATE bookings SET status = $2 WHERE id = $1 \
                 RETURNING id, reference, user_id, vendor_id, bike_id, start_date, end_date, \
                           status, total_amount_cents, created_at",
            )
            .bind(id)
            .bind(status_str)
            .fetch_one(&self.pool)
            .await
            .map_err(internal)?;
            booking_from_row(&row)
        }
    }

    #[async_trait]
    impl ReviewRepo for PgRepo {
        async fn create_review(&self, user_id: Id, new: NewReview) -> RepoResult<Review> {
            sqlx::query("SELECT id FROM bikes WHERE id = $1 AND deleted_at IS NULL")
                .bind(new.bike_id)
                .fetch_one(&self.pool)
                .await
                .map_err(internal)?;
            sqlx::query_as::<_, Review>(
                "INSERT INTO reviews (bike_id, user_id, rating, comment) VALUES ($1,$2,$3,$4) \
                 RETURNING id, bike_id, user_id, rating, comment, created_at",
            )
            .bind(new.bike_id)
            .bind(user_id)
            .bind(new.rating)
            .bind(&new.comment)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| match e {
                sqlx::Error::Database(ref db) if db.is_unique_violation() => RepoError::Conflict,
                e => internal(e),
            })
        }

        async fn list_bike_reviews(&self, bike_id: Id) -> RepoResult<Vec<Review>> {
            sqlx::query_as::<_, Review>(
                "SELECT id, bike_id, user_id, rating, comment, created_at \
                 FROM reviews WHERE bike_id = $1 ORDER BY created_at",
            )
            .bind(bike_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)
        }
    }
}
