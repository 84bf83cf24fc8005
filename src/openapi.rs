use crate::auth::Role;
use crate::models::{
    Bike, Booking, BookingStatus, NewBike, NewBooking, NewReview, NewUser, NewVendor, Review,
    UpdateBike, UserPublic, Vendor,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::register,
        crate::routes::login,
        crate::routes::refresh,
        crate::routes::me,
        crate::routes::list_bikes,
        crate::routes::get_bike,
        crate::routes::create_bike,
        crate::routes::update_bike,
        crate::routes::bike_reviews,
        crate::routes::create_review,
        crate::routes::apply_vendor,
        crate::routes::get_vendor,
        crate::routes::vendor_bikes,
        crate::routes::my_vendor_bookings,
        crate::routes::create_booking,
        crate::routes::list_my_bookings,
        crate::routes::get_booking,
        crate::routes::cancel_booking,
        crate::routes::update_booking_status,
        crate::routes::admin_verify_vendor,
    ),
    components(schemas(
        Role, UserPublic, NewUser, Vendor, NewVendor, Bike, NewBike, UpdateBike,
        Booking, NewBooking, BookingStatus, Review, NewReview,
        crate::routes::AuthResponse, crate::routes::LoginRequest,
        crate::routes::UpdateBookingStatus,
    )),
    tags(
        (name = "auth", description = "Registration, login, token refresh"),
        (name = "bikes", description = "Bike catalogue and listings"),
        (name = "vendors", description = "Vendor profiles and applications"),
        (name = "bookings", description = "Rental bookings"),
    )
)]
pub struct ApiDoc;
