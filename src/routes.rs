use std::sync::Arc;

use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::auth::{self, Auth, Role, VendorAuth};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::*;
use crate::repo::{BikeFilter, BikeRepo, BookingRepo, Repo, ReviewRepo, UserRepo, VendorRepo};
use crate::token::{self, VerifiedToken};
use crate::require_role;

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
}

/// API resources. Mount under a `/api/v1` scope (the rate limiter wraps that
/// scope, so budgets are enforced before any of these handlers run).
pub fn api(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::resource("/auth/register").route(web::post().to(register)),
    )
    .service(web::resource("/auth/login").route(web::post().to(login)))
    .service(web::resource("/auth/refresh").route(web::post().to(refresh)))
    .service(web::resource("/auth/me").route(web::get().to(me)))
    .service(
        web::resource("/bikes")
            .route(web::get().to(list_bikes))
            .route(web::post().to(create_bike)),
    )
    .service(
        web::resource("/bikes/{id}")
            .route(web::get().to(get_bike))
            .route(web::patch().to(update_bike)),
    )
    .service(web::resource("/bikes/{id}/reviews").route(web::get().to(bike_reviews)))
    .service(web::resource("/reviews").route(web::post().to(create_review)))
    .service(web::resource("/vendors").route(web::post().to(apply_vendor)))
    .service(web::resource("/vendors/me/bookings").route(web::get().to(my_vendor_bookings)))
    .service(web::resource("/vendors/{id}").route(web::get().to(get_vendor)))
    .service(web::resource("/vendors/{id}/bikes").route(web::get().to(vendor_bikes)))
    .service(
        web::resource("/bookings")
            .route(web::get().to(list_my_bookings))
            .route(web::post().to(create_booking)),
    )
    .service(web::resource("/bookings/{id}").route(web::get().to(get_booking)))
    .service(web::resource("/bookings/{id}/cancel").route(web::post().to(cancel_booking)))
    .service(web::resource("/bookings/{id}/status").route(web::post().to(update_booking_status)))
    // Admin moderation endpoints
    .service(web::resource("/admin/users").route(web::get().to(admin_list_users)))
    .service(web::resource("/admin/vendors/{id}/verify").route(web::post().to(admin_verify_vendor)))
    .service(
        web::resource("/admin/vendors/{id}/soft-delete")
            .route(web::post().to(admin_soft_delete_vendor)),
    )
    .service(
        web::resource("/admin/vendors/{id}/restore").route(web::post().to(admin_restore_vendor)),
    )
    .service(web::resource("/admin/vendors/{id}").route(web::delete().to(admin_hard_delete_vendor)))
    .service(
        web::resource("/admin/bikes/{id}/soft-delete").route(web::post().to(admin_soft_delete_bike)),
    )
    .service(web::resource("/admin/bikes/{id}/restore").route(web::post().to(admin_restore_bike)))
    .service(web::resource("/admin/bikes/{id}").route(web::delete().to(admin_hard_delete_bike)));
}

/// Liveness/readiness endpoints, outside the rate-limited API scope.
pub fn ops(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(healthz))
        .route("/readyz", web::get().to(readyz));
}

async fn healthz() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"status": "ok"}))
}

async fn readyz(data: web::Data<AppState>) -> HttpResponse {
    // The state being wired up is all readiness means here; storage faults
    // surface per-request.
    let _ = &data.repo;
    HttpResponse::Ok().json(serde_json::json!({"status": "ready"}))
}

/// Prometheus scrape endpoint; mounted by main where the recorder lives.
pub async fn metrics(handle: web::Data<metrics_exporter_prometheus::PrometheusHandle>) -> HttpResponse {
    HttpResponse::Ok()
        .content_type("text/plain; version=0.0.4")
        .body(handle.render())
}

// ---------------- auth -----------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct AuthResponse {
    pub token: String,
    pub user: UserPublic,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

fn subject_id(claims: &VerifiedToken) -> Result<Id, ApiError> {
    claims.subject_id.parse().map_err(|_| ApiError::Unauthorized)
}

/// Re-fetch the authoritative user record behind a verified token. A token
/// outlives account deletion, so this is where stale subjects get cut off.
async fn current_user(data: &AppState, claims: &VerifiedToken) -> Result<User, ApiError> {
    let id = subject_id(claims)?;
    let user = data.repo.get_user(id).await.map_err(|_| ApiError::Unauthorized)?;
    if user.deleted_at.is_some() {
        return Err(ApiError::Unauthorized);
    }
    Ok(user)
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/register",
    request_body = NewUser,
    responses(
        (status = 201, description = "Account created", body = AuthResponse),
        (status = 400, description = "Invalid fields"),
        (status = 409, description = "Email already registered")
    )
)]
pub async fn register(
    cfg: web::Data<AppConfig>,
    data: web::Data<AppState>,
    payload: web::Json<NewUser>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.name.trim().is_empty() || !new.email.contains('@') || new.password.len() < 8 {
        return Err(ApiError::BadRequest);
    }
    let role = if cfg.bootstrap_admin_emails.iter().any(|e| e == &new.email) {
        Role::Admin
    } else {
        Role::User
    };
    let hash = auth::hash_password(&new.password)?;
    let user = data.repo.create_user(new, hash, role).await?;
    let token = token::issue(&cfg.token_secret, &user.id.to_string(), user.role);
    Ok(HttpResponse::Created().json(AuthResponse { token, user: UserPublic::from(&user) }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Logged in", body = AuthResponse),
        (status = 401, description = "Unknown account or wrong password")
    )
)]
pub async fn login(
    cfg: web::Data<AppConfig>,
    data: web::Data<AppState>,
    payload: web::Json<LoginRequest>,
) -> Result<HttpResponse, ApiError> {
    // Every failure path is the same 401; nothing reveals which check failed.
    let user = data
        .repo
        .get_user_by_email(&payload.email)
        .await
        .map_err(|_| ApiError::Unauthorized)?;
    if user.deleted_at.is_some() || !auth::verify_password(&payload.password, &user.password_hash) {
        return Err(ApiError::Unauthorized);
    }
    let token = token::issue(&cfg.token_secret, &user.id.to_string(), user.role);
    Ok(HttpResponse::Ok().json(AuthResponse { token, user: UserPublic::from(&user) }))
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/refresh",
    responses(
        (status = 200, description = "Fresh token with the subject's current role", body = AuthResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn refresh(
    auth: Auth,
    cfg: web::Data<AppConfig>,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    // Roles can change between issue and refresh; mint from the record, not
    // from the old token.
    let user = current_user(&data, &auth.0).await?;
    let token = token::issue(&cfg.token_secret, &user.id.to_string(), user.role);
    Ok(HttpResponse::Ok().json(AuthResponse { token, user: UserPublic::from(&user) }))
}

#[utoipa::path(
    get,
    path = "/api/v1/auth/me",
    responses(
        (status = 200, description = "Current account", body = UserPublic),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn me(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let user = current_user(&data, &auth.0).await?;
    Ok(HttpResponse::Ok().json(UserPublic::from(&user)))
}

// ---------------- bikes -----------------------------------------------------

#[derive(Debug, Deserialize, utoipa::IntoParams)]
pub struct BikeListQuery {
    pub category: Option<String>,
    pub location: Option<String>,
    /// Admin only: include soft-deleted listings.
    pub include_deleted: Option<bool>,
}

fn is_admin(auth: &Option<Auth>) -> bool {
    auth.as_ref().map(|a| a.0.role == Role::Admin).unwrap_or(false)
}

#[utoipa::path(
    get,
    path = "/api/v1/bikes",
    params(BikeListQuery),
    responses((status = 200, description = "Bike catalogue", body = [Bike]))
)]
pub async fn list_bikes(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    query: web::Query<BikeListQuery>,
) -> Result<HttpResponse, ApiError> {
    let filter = BikeFilter {
        category: query.category.clone(),
        location: query.location.clone(),
    };
    let want_deleted = query.include_deleted.unwrap_or(false);
    let bikes = data
        .repo
        .list_bikes(&filter, is_admin(&auth) && want_deleted)
        .await?;
    Ok(HttpResponse::Ok().json(bikes))
}

#[utoipa::path(
    get,
    path = "/api/v1/bikes/{id}",
    params(("id" = Id, Path, description = "Bike id")),
    responses(
        (status = 200, description = "Bike", body = Bike),
        (status = 404, description = "Bike not found")
    )
)]
pub async fn get_bike(
    auth: Option<Auth>,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    query: web::Query<BikeListQuery>,
) -> Result<HttpResponse, ApiError> {
    let bike = data.repo.get_bike(path.into_inner()).await?;
    let want_deleted = query.include_deleted.unwrap_or(false);
    if bike.deleted_at.is_some() && !(is_admin(&auth) && want_deleted) {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(bike))
}

#[utoipa::path(
    post,
    path = "/api/v1/bikes",
    request_body = NewBike,
    responses(
        (status = 201, description = "Listing created", body = Bike),
        (status = 400, description = "Invalid fields"),
        (status = 403, description = "Not a verified vendor")
    )
)]
pub async fn create_bike(
    auth: VendorAuth,
    data: web::Data<AppState>,
    payload: web::Json<NewBike>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.title.trim().is_empty() || new.price_per_day_cents <= 0 {
        return Err(ApiError::BadRequest);
    }
    let user_id = subject_id(&auth.0)?;
    let vendor = data
        .repo
        .get_vendor_by_user(user_id)
        .await
        .map_err(|_| ApiError::Forbidden)?;
    if !vendor.verified || vendor.deleted_at.is_some() {
        return Err(ApiError::Forbidden);
    }
    let bike = data.repo.create_bike(vendor.id, new).await?;
    Ok(HttpResponse::Created().json(bike))
}

#[utoipa::path(
    patch,
    path = "/api/v1/bikes/{id}",
    request_body = UpdateBike,
    params(("id" = Id, Path, description = "Bike id")),
    responses(
        (status = 200, description = "Listing updated", body = Bike),
        (status = 403, description = "Not the owning vendor"),
        (status = 404, description = "Bike not found")
    )
)]
pub async fn update_bike(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateBike>,
) -> Result<HttpResponse, ApiError> {
    let bike_id = path.into_inner();
    let bike = data.repo.get_bike(bike_id).await?;
    if auth.0.role != Role::Admin {
        require_role!(auth, Role::Vendor);
        let user_id = subject_id(&auth.0)?;
        let vendor = data
            .repo
            .get_vendor_by_user(user_id)
            .await
            .map_err(|_| ApiError::Forbidden)?;
        if bike.vendor_id != vendor.id {
            return Err(ApiError::Forbidden);
        }
    }
    let updated = data.repo.update_bike(bike_id, payload.into_inner()).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[utoipa::path(
    get,
    path = "/api/v1/bikes/{id}/reviews",
    params(("id" = Id, Path, description = "Bike id")),
    responses(
        (status = 200, description = "Reviews for a bike", body = [Review]),
        (status = 404, description = "Bike not found")
    )
)]
pub async fn bike_reviews(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let bike_id = path.into_inner();
    let bike = data.repo.get_bike(bike_id).await?;
    if bike.deleted_at.is_some() {
        return Err(ApiError::NotFound);
    }
    let reviews = data.repo.list_bike_reviews(bike_id).await?;
    Ok(HttpResponse::Ok().json(reviews))
}

#[utoipa::path(
    post,
    path = "/api/v1/reviews",
    request_body = NewReview,
    responses(
        (status = 201, description = "Review created", body = Review),
        (status = 400, description = "Rating out of range"),
        (status = 404, description = "Bike not found"),
        (status = 409, description = "Already reviewed")
    )
)]
pub async fn create_review(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewReview>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if !(1..=5).contains(&new.rating) {
        return Err(ApiError::BadRequest);
    }
    let user = current_user(&data, &auth.0).await?;
    let review = data.repo.create_review(user.id, new).await?;
    Ok(HttpResponse::Created().json(review))
}

// ---------------- vendors ---------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/vendors",
    request_body = NewVendor,
    responses(
        (status = 201, description = "Application submitted (unverified)", body = Vendor),
        (status = 409, description = "Already applied")
    )
)]
pub async fn apply_vendor(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewVendor>,
) -> Result<HttpResponse, ApiError> {
    let new = payload.into_inner();
    if new.shop_name.trim().is_empty() {
        return Err(ApiError::BadRequest);
    }
    let user = current_user(&data, &auth.0).await?;
    let vendor = data.repo.create_vendor(user.id, new).await?;
    Ok(HttpResponse::Created().json(vendor))
}

#[utoipa::path(
    get,
    path = "/api/v1/vendors/{id}",
    params(("id" = Id, Path, description = "Vendor id")),
    responses(
        (status = 200, description = "Vendor profile", body = Vendor),
        (status = 404, description = "Vendor not found")
    )
)]
pub async fn get_vendor(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let vendor = data.repo.get_vendor(path.into_inner()).await?;
    if vendor.deleted_at.is_some() {
        return Err(ApiError::NotFound);
    }
    Ok(HttpResponse::Ok().json(vendor))
}

#[utoipa::path(
    get,
    path = "/api/v1/vendors/{id}/bikes",
    params(("id" = Id, Path, description = "Vendor id")),
    responses(
        (status = 200, description = "Vendor's listings", body = [Bike]),
        (status = 404, description = "Vendor not found")
    )
)]
pub async fn vendor_bikes(
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let vendor_id = path.into_inner();
    let vendor = data.repo.get_vendor(vendor_id).await?;
    if vendor.deleted_at.is_some() {
        return Err(ApiError::NotFound);
    }
    let bikes = data.repo.list_vendor_bikes(vendor_id, false).await?;
    Ok(HttpResponse::Ok().json(bikes))
}

#[utoipa::path(
    get,
    path = "/api/v1/vendors/me/bookings",
    responses(
        (status = 200, description = "Bookings against this vendor's bikes", body = [Booking]),
        (status = 403, description = "Not a vendor")
    )
)]
pub async fn my_vendor_bookings(
    auth: VendorAuth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user_id = subject_id(&auth.0)?;
    let vendor = data
        .repo
        .get_vendor_by_user(user_id)
        .await
        .map_err(|_| ApiError::Forbidden)?;
    let bookings = data.repo.list_vendor_bookings(vendor.id).await?;
    Ok(HttpResponse::Ok().json(bookings))
}

// ---------------- bookings --------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/bookings",
    request_body = NewBooking,
    responses(
        (status = 201, description = "Booking created (pending)", body = Booking),
        (status = 400, description = "Invalid date range"),
        (status = 404, description = "Bike unavailable")
    )
)]
pub async fn create_booking(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewBooking>,
) -> Result<HttpResponse, ApiError> {
    let user = current_user(&data, &auth.0).await?;
    let booking = data.repo.create_booking(user.id, payload.into_inner()).await?;
    Ok(HttpResponse::Created().json(booking))
}

#[utoipa::path(
    get,
    path = "/api/v1/bookings",
    responses((status = 200, description = "Own bookings, newest first", body = [Booking]))
)]
pub async fn list_my_bookings(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let user_id = subject_id(&auth.0)?;
    let bookings = data.repo.list_user_bookings(user_id).await?;
    Ok(HttpResponse::Ok().json(bookings))
}

async fn booking_visible_to(
    data: &AppState,
    claims: &VerifiedToken,
    booking: &Booking,
) -> Result<bool, ApiError> {
    if claims.role == Role::Admin {
        return Ok(true);
    }
    let user_id = subject_id(claims)?;
    if booking.user_id == user_id {
        return Ok(true);
    }
    if claims.role == Role::Vendor {
        if let Ok(vendor) = data.repo.get_vendor_by_user(user_id).await {
            return Ok(booking.vendor_id == vendor.id);
        }
    }
    Ok(false)
}

#[utoipa::path(
    get,
    path = "/api/v1/bookings/{id}",
    params(("id" = Id, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking", body = Booking),
        (status = 403, description = "Not yours"),
        (status = 404, description = "Booking not found")
    )
)]
pub async fn get_booking(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let booking = data.repo.get_booking(path.into_inner()).await?;
    if !booking_visible_to(&data, &auth.0, &booking).await? {
        return Err(ApiError::Forbidden);
    }
    Ok(HttpResponse::Ok().json(booking))
}

#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/cancel",
    params(("id" = Id, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Booking cancelled", body = Booking),
        (status = 403, description = "Not yours"),
        (status = 409, description = "Already settled")
    )
)]
pub async fn cancel_booking(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let booking = data.repo.get_booking(id).await?;
    let user_id = subject_id(&auth.0)?;
    if auth.0.role != Role::Admin && booking.user_id != user_id {
        return Err(ApiError::Forbidden);
    }
    let cancelled = data
        .repo
        .set_booking_status(id, BookingStatus::Cancelled)
        .await?;
    Ok(HttpResponse::Ok().json(cancelled))
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct UpdateBookingStatus {
    pub status: BookingStatus,
}

#[utoipa::path(
    post,
    path = "/api/v1/bookings/{id}/status",
    request_body = UpdateBookingStatus,
    params(("id" = Id, Path, description = "Booking id")),
    responses(
        (status = 200, description = "Status updated", body = Booking),
        (status = 400, description = "Pending is not a target status"),
        (status = 403, description = "Not the owning vendor"),
        (status = 409, description = "Already settled")
    )
)]
pub async fn update_booking_status(
    auth: VendorAuth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
    payload: web::Json<UpdateBookingStatus>,
) -> Result<HttpResponse, ApiError> {
    let target = payload.into_inner().status;
    if target == BookingStatus::Pending {
        return Err(ApiError::BadRequest);
    }
    let id = path.into_inner();
    let booking = data.repo.get_booking(id).await?;
    let user_id = subject_id(&auth.0)?;
    let vendor = data
        .repo
        .get_vendor_by_user(user_id)
        .await
        .map_err(|_| ApiError::Forbidden)?;
    if booking.vendor_id != vendor.id {
        return Err(ApiError::Forbidden);
    }
    let updated = data.repo.set_booking_status(id, target).await?;
    Ok(HttpResponse::Ok().json(updated))
}

// ---------------- admin -----------------------------------------------------

pub async fn admin_list_users(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let users = data.repo.list_users().await?;
    let out: Vec<UserPublic> = users.iter().map(UserPublic::from).collect();
    Ok(HttpResponse::Ok().json(out))
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/vendors/{id}/verify",
    params(("id" = Id, Path, description = "Vendor id")),
    responses(
        (status = 200, description = "Vendor verified and account promoted", body = Vendor),
        (status = 403, description = "Admins only"),
        (status = 404, description = "Vendor not found")
    )
)]
pub async fn admin_verify_vendor(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<Id>,
) -> Result<HttpResponse, ApiError> {
    require_role!(auth, Role::Admin);
    let vendor = data.repo.set_vendor_verified(path.into_inner(), true).await?;
    // Promotion lands on next login/refresh; outstanding tokens keep their
    // old role until then.
    data.repo.set_user_role(vendor.user_id, Role::Vendor).await?;
    Ok(HttpResponse::Ok().json(vendor))
}

macro_rules! ensure_admin {
    ($auth:expr) => {
        if $auth.0.role != Role::Admin {
            return Err(ApiError::Forbidden);
        }
    };
}

pub async fn admin_soft_delete_vendor(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.soft_delete_vendor(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}
pub async fn admin_restore_vendor(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.restore_vendor(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}
pub async fn admin_hard_delete_vendor(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.hard_delete_vendor(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

pub async fn admin_soft_delete_bike(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.soft_delete_bike(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}
pub async fn admin_restore_bike(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.restore_bike(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status": "ok"})))
}
pub async fn admin_hard_delete_bike(auth: Auth, data: web::Data<AppState>, path: web::Path<Id>) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    data.repo.hard_delete_bike(path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}
